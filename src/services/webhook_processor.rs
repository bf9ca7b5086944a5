//! Webhook ingress pipeline.
//!
//! Order of checks matters: the HMAC signature is verified against the raw
//! body before anything is parsed, so unauthenticated payloads never reach
//! the state machine. Authenticated-but-malformed payloads are acknowledged
//! and dropped; bouncing them would only make the provider redeliver the
//! same garbage forever.

use crate::database::payment_store::Payment;
use crate::error::{AppError, AppResult, ExternalError, InfrastructureError};
use crate::gateways::client::PaymentGateway;
use crate::gateways::types::GatewayName;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to an authenticated webhook delivery.
#[derive(Debug)]
pub enum WebhookDisposition {
    /// Settlement applied (or replayed) against a known payment.
    Processed(Payment),
    /// Acknowledged and dropped.
    Ignored(IgnoreReason),
}

#[derive(Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Signature was valid but the body was not parseable.
    MalformedPayload,
    /// Parsed fine, but no payment carries this transaction reference.
    UnknownReference,
}

pub struct WebhookProcessor {
    gateways: Vec<Arc<dyn PaymentGateway>>,
    orchestrator: Arc<PaymentOrchestrator>,
}

impl WebhookProcessor {
    pub fn new(
        gateways: Vec<Arc<dyn PaymentGateway>>,
        orchestrator: Arc<PaymentOrchestrator>,
    ) -> Self {
        Self {
            gateways,
            orchestrator,
        }
    }

    pub async fn process(
        &self,
        gateway_name: GatewayName,
        payload: &[u8],
        signature: Option<&str>,
    ) -> AppResult<WebhookDisposition> {
        let gateway = self
            .gateways
            .iter()
            .find(|g| g.name() == gateway_name)
            .ok_or_else(|| {
                AppError::infrastructure(InfrastructureError::Configuration {
                    message: format!("gateway '{}' is not configured", gateway_name),
                })
            })?;

        let signature = signature.unwrap_or("");
        if !gateway.validate_signature(payload, signature) {
            warn!(gateway = %gateway_name, "webhook signature rejected");
            return Err(AppError::external(ExternalError::SignatureInvalid {
                gateway: gateway_name.to_string(),
            }));
        }

        let event = match gateway.parse_webhook(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(gateway = %gateway_name, error = %e, "unparseable webhook payload");
                return Ok(WebhookDisposition::Ignored(IgnoreReason::MalformedPayload));
            }
        };

        info!(
            gateway = %gateway_name,
            event_type = %event.event_type,
            transaction_ref = event.transaction_ref.as_deref().unwrap_or("-"),
            "webhook received"
        );

        match self.orchestrator.process_webhook_event(event).await? {
            Some(payment) => Ok(WebhookDisposition::Processed(payment)),
            None => Ok(WebhookDisposition::Ignored(IgnoreReason::UnknownReference)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryPaymentStore;
    use crate::error::{AppErrorKind, ValidationError};
    use crate::gateways::error::{GatewayError, GatewayResult};
    use crate::gateways::types::{
        ChargeOutcome, ChargeRequest, GatewayWebhookEvent, Money, RefundOutcome,
        SettlementStatus, VerifyOutcome,
    };
    use crate::services::idempotency::InMemoryIdempotencyStore;
    use crate::services::orders::InMemoryOrderService;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Accepts only the literal signature "valid"; counts parse attempts so
    /// tests can assert that rejected deliveries never get parsed.
    struct SignatureGateway {
        parse_calls: AtomicU32,
    }

    #[async_trait]
    impl PaymentGateway for SignatureGateway {
        fn name(&self) -> GatewayName {
            GatewayName::Paystack
        }

        async fn initiate(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome> {
            Ok(ChargeOutcome {
                accepted: true,
                transaction_ref: Some(request.reference),
                checkout_url: None,
                message: None,
                raw: None,
            })
        }

        async fn verify(&self, _transaction_ref: &str) -> GatewayResult<VerifyOutcome> {
            Ok(VerifyOutcome {
                status: SettlementStatus::Pending,
                amount: None,
                raw: None,
            })
        }

        async fn refund(
            &self,
            _transaction_ref: &str,
            _amount: Money,
            _reason: &str,
        ) -> GatewayResult<RefundOutcome> {
            Ok(RefundOutcome {
                accepted: true,
                refund_id: None,
                message: None,
            })
        }

        fn validate_signature(&self, _payload: &[u8], signature: &str) -> bool {
            signature == "valid"
        }

        fn parse_webhook(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
            self.parse_calls.fetch_add(1, Ordering::SeqCst);
            let parsed: serde_json::Value =
                serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookPayload {
                    message: e.to_string(),
                })?;
            Ok(GatewayWebhookEvent {
                gateway: GatewayName::Paystack,
                event_type: "charge.success".to_string(),
                transaction_ref: parsed
                    .get("reference")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string()),
                status: Some(SettlementStatus::Paid),
                payload: parsed,
            })
        }
    }

    fn processor() -> (WebhookProcessor, Arc<SignatureGateway>) {
        let gateway = Arc::new(SignatureGateway {
            parse_calls: AtomicU32::new(0),
        });
        let gateways: Vec<Arc<dyn PaymentGateway>> = vec![gateway.clone()];
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            gateways.clone(),
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(InMemoryOrderService::new()),
            Arc::new(InMemoryIdempotencyStore::new(Duration::from_secs(3600))),
        ));
        (WebhookProcessor::new(gateways, orchestrator), gateway)
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected_before_parsing() {
        let (processor, gateway) = processor();

        let err = processor
            .process(GatewayName::Paystack, br#"{"reference":"x"}"#, Some("bogus"))
            .await
            .unwrap_err();

        assert!(matches!(
            err.kind,
            AppErrorKind::External(ExternalError::SignatureInvalid { .. })
        ));
        assert_eq!(gateway.parse_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let (processor, _) = processor();

        let err = processor
            .process(GatewayName::Paystack, br#"{"reference":"x"}"#, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            AppErrorKind::External(ExternalError::SignatureInvalid { .. })
        ));
    }

    #[tokio::test]
    async fn authenticated_malformed_payload_is_ignored() {
        let (processor, _) = processor();

        let disposition = processor
            .process(GatewayName::Paystack, b"not json", Some("valid"))
            .await
            .unwrap();
        assert!(matches!(
            disposition,
            WebhookDisposition::Ignored(IgnoreReason::MalformedPayload)
        ));
    }

    #[tokio::test]
    async fn payload_without_reference_is_a_validation_error() {
        let (processor, _) = processor();

        let err = processor
            .process(GatewayName::Paystack, br#"{"event":"x"}"#, Some("valid"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            AppErrorKind::Validation(ValidationError::MissingField { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_reference_is_acknowledged() {
        let (processor, _) = processor();

        let disposition = processor
            .process(
                GatewayName::Paystack,
                br#"{"reference":"pay_missing"}"#,
                Some("valid"),
            )
            .await
            .unwrap();
        assert!(matches!(
            disposition,
            WebhookDisposition::Ignored(IgnoreReason::UnknownReference)
        ));
    }
}
