use crate::gateways::client::PaymentGateway;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::http::{verify_hmac_sha256_base64, GatewayHttpClient};
use crate::gateways::types::{
    ChargeOutcome, ChargeRequest, GatewayName, GatewayWebhookEvent, Money, RefundOutcome,
    SettlementStatus, VerifyOutcome,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for FlutterwaveConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: String::new(),
            base_url: "https://api.flutterwave.com/v3".to_string(),
            timeout_secs: 30,
        }
    }
}

impl FlutterwaveConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let secret_key =
            std::env::var("FLUTTERWAVE_SECRET_KEY").map_err(|_| GatewayError::Validation {
                message: "FLUTTERWAVE_SECRET_KEY environment variable is required".to_string(),
                field: Some("FLUTTERWAVE_SECRET_KEY".to_string()),
            })?;
        let webhook_secret =
            std::env::var("FLUTTERWAVE_WEBHOOK_SECRET").map_err(|_| GatewayError::Validation {
                message: "FLUTTERWAVE_WEBHOOK_SECRET environment variable is required".to_string(),
                field: Some("FLUTTERWAVE_WEBHOOK_SECRET".to_string()),
            })?;

        Ok(Self {
            base_url: std::env::var("FLUTTERWAVE_BASE_URL")
                .unwrap_or_else(|_| "https://api.flutterwave.com/v3".to_string()),
            timeout_secs: std::env::var("FLUTTERWAVE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            secret_key,
            webhook_secret,
        })
    }
}

pub struct FlutterwaveGateway {
    config: FlutterwaveConfig,
    http: GatewayHttpClient,
}

impl FlutterwaveGateway {
    pub fn new(config: FlutterwaveConfig) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(FlutterwaveConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn map_status(status: &str) -> SettlementStatus {
        match status {
            "successful" | "success" => SettlementStatus::Paid,
            "pending" => SettlementStatus::Pending,
            "failed" => SettlementStatus::Failed,
            "cancelled" => SettlementStatus::Cancelled,
            _ => SettlementStatus::Unknown,
        }
    }

    fn parse_envelope<T: serde::de::DeserializeOwned>(
        raw: &JsonValue,
    ) -> GatewayResult<FlutterwaveEnvelope<T>> {
        serde_json::from_value(raw.clone()).map_err(|e| GatewayError::Provider {
            provider: "flutterwave".to_string(),
            message: format!("unexpected response shape: {}", e),
            status_code: None,
            retryable: true,
        })
    }
}

#[async_trait]
impl PaymentGateway for FlutterwaveGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Flutterwave
    }

    async fn initiate(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome> {
        request.amount.validate_positive("amount")?;

        // Flutterwave takes amounts in major units, no conversion
        let payload = serde_json::json!({
            "tx_ref": request.reference,
            "amount": request.amount.amount.to_string(),
            "currency": request.amount.currency,
            "redirect_url": request.callback_url,
            "customer": {
                "email": request.customer.email,
                "phonenumber": request.customer.phone,
            },
        });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/payments"),
                Some(&self.config.secret_key),
                Some(&payload),
            )
            .await?;
        let envelope: FlutterwaveEnvelope<FlutterwavePaymentData> = Self::parse_envelope(&raw)?;

        if envelope.status != "success" {
            return Ok(ChargeOutcome {
                accepted: false,
                transaction_ref: None,
                checkout_url: None,
                message: Some(envelope.message),
                raw: Some(raw),
            });
        }

        let data = envelope.data.ok_or_else(|| GatewayError::Provider {
            provider: "flutterwave".to_string(),
            message: "payment response missing data".to_string(),
            status_code: None,
            retryable: true,
        })?;
        info!(tx_ref = %request.reference, "flutterwave charge initiated");

        Ok(ChargeOutcome {
            accepted: true,
            transaction_ref: Some(request.reference),
            checkout_url: Some(data.link),
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
                &self.endpoint(&format!(
                    "/transactions/verify_by_reference?tx_ref={}",
                    transaction_ref
                )),
                Some(&self.config.secret_key),
                None,
            )
            .await?;
        let envelope: FlutterwaveEnvelope<FlutterwaveVerifyData> = Self::parse_envelope(&raw)?;

        if envelope.status != "success" {
            return Ok(VerifyOutcome {
                status: SettlementStatus::Unknown,
                amount: None,
                raw: Some(raw),
            });
        }

        let data = envelope.data.ok_or_else(|| GatewayError::Provider {
            provider: "flutterwave".to_string(),
            message: "verify response missing data".to_string(),
            status_code: None,
            retryable: true,
        })?;

        Ok(VerifyOutcome {
            status: Self::map_status(&data.status),
            amount: Some(Money::new(data.amount, data.currency)),
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
            "tx_ref": transaction_ref,
            "amount": amount.amount.to_string(),
            "comments": reason,
        });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/refunds"),
                Some(&self.config.secret_key),
                Some(&payload),
            )
            .await?;
        let envelope: FlutterwaveEnvelope<FlutterwaveRefundData> = Self::parse_envelope(&raw)?;

        if envelope.status != "success" {
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
        verify_hmac_sha256_base64(payload, &self.config.webhook_secret, signature)
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
            .and_then(|v| v.get("tx_ref"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let status = parsed
            .get("data")
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str())
            .map(Self::map_status);

        Ok(GatewayWebhookEvent {
            gateway: GatewayName::Flutterwave,
            event_type,
            transaction_ref,
            status,
            payload: parsed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FlutterwaveEnvelope<T> {
    status: String,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct FlutterwavePaymentData {
    link: String,
}

#[derive(Debug, Deserialize)]
struct FlutterwaveVerifyData {
    status: String,
    amount: Decimal,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct FlutterwaveRefundData {
    id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::http::{sign_hmac_sha256_base64, sign_hmac_sha512_hex};

    fn gateway() -> FlutterwaveGateway {
        FlutterwaveGateway::new(FlutterwaveConfig {
            secret_key: "FLWSECK_TEST".to_string(),
            webhook_secret: "fw-webhook-secret".to_string(),
            base_url: "https://api.flutterwave.com/v3".to_string(),
            timeout_secs: 5,
        })
        .expect("gateway init should succeed")
    }

    #[test]
    fn webhook_signature_accepts_valid_base64_hmac() {
        let gateway = gateway();
        let payload = br#"{"event":"charge.completed"}"#;
        let signature = sign_hmac_sha256_base64(payload, "fw-webhook-secret");
        assert!(gateway.validate_signature(payload, &signature));
    }

    #[test]
    fn webhook_signature_rejects_wrong_encoding() {
        // A hex SHA512 signature must not validate against the base64 SHA256 scheme
        let gateway = gateway();
        let payload = br#"{"event":"charge.completed"}"#;
        let hex_signature = sign_hmac_sha512_hex(payload, "fw-webhook-secret");
        assert!(!gateway.validate_signature(payload, &hex_signature));
        assert!(!gateway.validate_signature(payload, ""));
    }

    #[test]
    fn webhook_parsing_extracts_tx_ref_and_status() {
        let gateway = gateway();
        let payload =
            br#"{"event":"charge.completed","data":{"tx_ref":"pay_42","status":"successful"}}"#;
        let event = gateway.parse_webhook(payload).expect("payload is valid");
        assert_eq!(event.event_type, "charge.completed");
        assert_eq!(event.transaction_ref.as_deref(), Some("pay_42"));
        assert_eq!(event.status, Some(SettlementStatus::Paid));
    }

    #[test]
    fn error_envelope_without_data_parses() {
        let raw = serde_json::json!({"status": "error", "message": "invalid tx_ref"});
        let envelope: FlutterwaveEnvelope<FlutterwaveVerifyData> =
            FlutterwaveGateway::parse_envelope(&raw).expect("envelope should parse");
        assert_eq!(envelope.status, "error");
        assert!(envelope.data.is_none());
    }

    #[test]
    fn verify_amount_deserializes_as_decimal() {
        use std::str::FromStr;

        let raw = serde_json::json!({
            "status": "success",
            "message": "ok",
            "data": {"status": "successful", "amount": 1250.5, "currency": "NGN"}
        });
        let envelope: FlutterwaveEnvelope<FlutterwaveVerifyData> =
            FlutterwaveGateway::parse_envelope(&raw).expect("envelope should parse");
        let data = envelope.data.expect("data present");
        assert_eq!(data.amount, Decimal::from_str("1250.5").unwrap());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            FlutterwaveGateway::map_status("successful"),
            SettlementStatus::Paid
        );
        assert_eq!(
            FlutterwaveGateway::map_status("cancelled"),
            SettlementStatus::Cancelled
        );
        assert_eq!(
            FlutterwaveGateway::map_status("??"),
            SettlementStatus::Unknown
        );
    }
}
