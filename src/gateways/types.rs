use crate::gateways::error::GatewayError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayName {
    Paystack,
    Flutterwave,
}

impl GatewayName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Paystack => "paystack",
            GatewayName::Flutterwave => "flutterwave",
        }
    }

    /// HTTP header carrying the webhook signature for this provider
    pub fn signature_header(&self) -> &'static str {
        match self {
            GatewayName::Paystack => "x-paystack-signature",
            GatewayName::Flutterwave => "verif-hash",
        }
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "paystack" => Ok(GatewayName::Paystack),
            "flutterwave" => Ok(GatewayName::Flutterwave),
            _ => Err(GatewayError::Validation {
                message: format!("unsupported gateway: {}", value),
                field: Some("gateway".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), GatewayError> {
        if self.amount <= Decimal::ZERO {
            return Err(GatewayError::Validation {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(GatewayError::Validation {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerContact {
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Charge initiation request handed to a gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Our reference for the charge, echoed back by the provider
    pub reference: String,
    pub amount: Money,
    pub customer: CustomerContact,
    pub callback_url: Option<String>,
}

/// Outcome of a charge initiation.
///
/// Business declines are encoded as `accepted = false`, never as errors;
/// only transport-level failures surface as `GatewayError`.
#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub accepted: bool,
    pub transaction_ref: Option<String>,
    pub checkout_url: Option<String>,
    pub message: Option<String>,
    pub raw: Option<JsonValue>,
}

/// Settlement status as reported by a gateway
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Paid,
    Pending,
    Failed,
    Cancelled,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub status: SettlementStatus,
    pub amount: Option<Money>,
    pub raw: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub accepted: bool,
    pub refund_id: Option<String>,
    pub message: Option<String>,
}

/// Normalized webhook event parsed by a provider implementation
#[derive(Debug, Clone)]
pub struct GatewayWebhookEvent {
    pub gateway: GatewayName,
    pub event_type: String,
    pub transaction_ref: Option<String>,
    pub status: Option<SettlementStatus>,
    pub payload: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_name_round_trips() {
        assert_eq!(
            "paystack".parse::<GatewayName>().unwrap(),
            GatewayName::Paystack
        );
        assert_eq!(
            "Flutterwave".parse::<GatewayName>().unwrap(),
            GatewayName::Flutterwave
        );
        assert!("stripe".parse::<GatewayName>().is_err());
    }

    #[test]
    fn signature_headers_are_provider_specific() {
        assert_eq!(
            GatewayName::Paystack.signature_header(),
            "x-paystack-signature"
        );
        assert_eq!(GatewayName::Flutterwave.signature_header(), "verif-hash");
    }

    #[test]
    fn money_rejects_non_positive_amounts() {
        let zero = Money::new(Decimal::ZERO, "NGN");
        assert!(zero.validate_positive("amount").is_err());

        let negative = Money::new(Decimal::from_str("-10.00").unwrap(), "NGN");
        assert!(negative.validate_positive("amount").is_err());

        let valid = Money::new(Decimal::from_str("1000.50").unwrap(), "NGN");
        assert!(valid.validate_positive("amount").is_ok());
    }
}
