use crate::gateways::client::PaymentGateway;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::http::{verify_hmac_sha512_hex, GatewayHttpClient};
use crate::gateways::types::{
    ChargeOutcome, ChargeRequest, GatewayName, GatewayWebhookEvent, Money, RefundOutcome,
    SettlementStatus, VerifyOutcome,
};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.paystack.co".to_string(),
            timeout_secs: 30,
        }
    }
}

impl PaystackConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let secret_key =
            std::env::var("PAYSTACK_SECRET_KEY").map_err(|_| GatewayError::Validation {
                message: "PAYSTACK_SECRET_KEY environment variable is required".to_string(),
                field: Some("PAYSTACK_SECRET_KEY".to_string()),
            })?;

        Ok(Self {
            webhook_secret: std::env::var("PAYSTACK_WEBHOOK_SECRET").ok(),
            base_url: std::env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            timeout_secs: std::env::var("PAYSTACK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            secret_key,
        })
    }
}

pub struct PaystackGateway {
    config: PaystackConfig,
    http: GatewayHttpClient,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(PaystackConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Paystack expects amounts in the currency's minor unit (kobo for NGN).
    fn to_minor_units(amount: &Money) -> GatewayResult<i64> {
        (amount.amount * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| GatewayError::Validation {
                message: format!("amount {} out of range for minor units", amount.amount),
                field: Some("amount".to_string()),
            })
    }

    fn map_status(status: &str) -> SettlementStatus {
        match status {
            "success" => SettlementStatus::Paid,
            "pending" | "ongoing" | "processing" => SettlementStatus::Pending,
            "failed" => SettlementStatus::Failed,
            "abandoned" | "reversed" => SettlementStatus::Cancelled,
            _ => SettlementStatus::Unknown,
        }
    }

    fn parse_envelope<T: serde::de::DeserializeOwned>(
        raw: &JsonValue,
    ) -> GatewayResult<PaystackEnvelope<T>> {
        serde_json::from_value(raw.clone()).map_err(|e| GatewayError::Provider {
            provider: "paystack".to_string(),
            message: format!("unexpected response shape: {}", e),
            status_code: None,
            retryable: true,
        })
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Paystack
    }

    async fn initiate(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome> {
        request.amount.validate_positive("amount")?;
        let email = request
            .customer
            .email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| GatewayError::Validation {
                message: "customer.email is required for paystack initialization".to_string(),
                field: Some("customer.email".to_string()),
            })?;

        let payload = serde_json::json!({
            "email": email,
            "amount": Self::to_minor_units(&request.amount)?,
            "currency": request.amount.currency,
            "reference": request.reference,
            "callback_url": request.callback_url,
        });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transaction/initialize"),
                Some(&self.config.secret_key),
                Some(&payload),
            )
            .await?;
        let envelope: PaystackEnvelope<PaystackInitializeData> = Self::parse_envelope(&raw)?;

        // Envelope status=false is a business decline, not a transport failure
        if !envelope.status {
            return Ok(ChargeOutcome {
                accepted: false,
                transaction_ref: None,
                checkout_url: None,
                message: Some(envelope.message),
                raw: Some(raw),
            });
        }

        let data = envelope.data.ok_or_else(|| GatewayError::Provider {
            provider: "paystack".to_string(),
            message: "initialize response missing data".to_string(),
            status_code: None,
            retryable: true,
        })?;
        info!(reference = %data.reference, "paystack charge initiated");

        Ok(ChargeOutcome {
            accepted: true,
            transaction_ref: Some(data.reference),
            checkout_url: Some(data.authorization_url),
            message: None,
            raw: Some(raw),
        })
    }

    async fn verify(&self, transaction_ref: &str) -> GatewayResult<VerifyOutcome> {
        if transaction_ref.trim().is_empty() {
            return Err(GatewayError::Validation {
                message: "transaction reference is required".to_string(),
                field: Some("transaction_ref".to_string()),
            });
        }

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transaction/verify/{}", transaction_ref)),
                Some(&self.config.secret_key),
                None,
            )
            .await?;
        let envelope: PaystackEnvelope<PaystackVerifyData> = Self::parse_envelope(&raw)?;

        if !envelope.status {
            return Ok(VerifyOutcome {
                status: SettlementStatus::Unknown,
                amount: None,
                raw: Some(raw),
            });
        }

        let data = envelope.data.ok_or_else(|| GatewayError::Provider {
            provider: "paystack".to_string(),
            message: "verify response missing data".to_string(),
            status_code: None,
            retryable: true,
        })?;

        Ok(VerifyOutcome {
            status: Self::map_status(&data.status),
            amount: Some(Money::new(
                Decimal::from(data.amount) / Decimal::from(100),
                data.currency,
            )),
            raw: Some(raw),
        })
    }

    async fn refund(
        &self,
        transaction_ref: &str,
        amount: Money,
        reason: &str,
    ) -> GatewayResult<RefundOutcome> {
        let payload = serde_json::json!({
            "transaction": transaction_ref,
            "amount": Self::to_minor_units(&amount)?,
            "merchant_note": reason,
        });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/refund"),
                Some(&self.config.secret_key),
                Some(&payload),
            )
            .await?;
        let envelope: PaystackEnvelope<PaystackRefundData> = Self::parse_envelope(&raw)?;

        if !envelope.status {
            return Ok(RefundOutcome {
                accepted: false,
                refund_id: None,
                message: Some(envelope.message),
            });
        }

        Ok(RefundOutcome {
            accepted: true,
            refund_id: envelope.data.map(|d| d.id.to_string()),
            message: None,
        })
    }

    fn validate_signature(&self, payload: &[u8], signature: &str) -> bool {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.config.secret_key);
        verify_hmac_sha512_hex(payload, secret, signature)
    }

    fn parse_webhook(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookPayload {
                message: format!("invalid webhook JSON payload: {}", e),
            })?;

        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let transaction_ref = parsed
            .get("data")
            .and_then(|v| v.get("reference"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let status = parsed
            .get("data")
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str())
            .map(Self::map_status);

        Ok(GatewayWebhookEvent {
            gateway: GatewayName::Paystack,
            event_type,
            transaction_ref,
            status,
            payload: parsed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct PaystackVerifyData {
    amount: i64,
    currency: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PaystackRefundData {
    id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::http::sign_hmac_sha512_hex;
    use std::str::FromStr;

    fn gateway() -> PaystackGateway {
        PaystackGateway::new(PaystackConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: Some("whsec_test".to_string()),
            base_url: "https://api.paystack.co".to_string(),
            timeout_secs: 5,
        })
        .expect("gateway init should succeed")
    }

    #[test]
    fn minor_unit_conversion() {
        let amount = Money::new(Decimal::from_str("1250.50").unwrap(), "NGN");
        assert_eq!(PaystackGateway::to_minor_units(&amount).unwrap(), 125050);

        let whole = Money::new(Decimal::from(1000), "NGN");
        assert_eq!(PaystackGateway::to_minor_units(&whole).unwrap(), 100000);
    }

    #[test]
    fn webhook_signature_accepts_valid_hmac() {
        let gateway = gateway();
        let payload = br#"{"event":"charge.success"}"#;
        let signature = sign_hmac_sha512_hex(payload, "whsec_test");
        assert!(gateway.validate_signature(payload, &signature));
    }

    #[test]
    fn webhook_signature_rejects_garbage_and_empty() {
        let gateway = gateway();
        let payload = br#"{"event":"charge.success"}"#;
        assert!(!gateway.validate_signature(payload, "invalid_signature"));
        assert!(!gateway.validate_signature(payload, ""));
    }

    #[test]
    fn webhook_parsing_extracts_reference_and_status() {
        let gateway = gateway();
        let payload = br#"{"event":"charge.success","data":{"reference":"ps_ref_1","status":"success"}}"#;
        let event = gateway.parse_webhook(payload).expect("payload is valid");
        assert_eq!(event.event_type, "charge.success");
        assert_eq!(event.transaction_ref.as_deref(), Some("ps_ref_1"));
        assert_eq!(event.status, Some(SettlementStatus::Paid));
    }

    #[test]
    fn webhook_parsing_rejects_malformed_json() {
        let gateway = gateway();
        let result = gateway.parse_webhook(b"not json at all");
        assert!(matches!(
            result,
            Err(GatewayError::WebhookPayload { .. })
        ));
    }

    #[test]
    fn decline_envelope_without_data_parses() {
        let raw = serde_json::json!({"status": false, "message": "Invalid key"});
        let envelope: PaystackEnvelope<PaystackInitializeData> =
            PaystackGateway::parse_envelope(&raw).expect("envelope should parse");
        assert!(!envelope.status);
        assert_eq!(envelope.message, "Invalid key");
        assert!(envelope.data.is_none());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(PaystackGateway::map_status("success"), SettlementStatus::Paid);
        assert_eq!(
            PaystackGateway::map_status("abandoned"),
            SettlementStatus::Cancelled
        );
        assert_eq!(
            PaystackGateway::map_status("weird"),
            SettlementStatus::Unknown
        );
    }
}
