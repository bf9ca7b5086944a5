use crate::gateways::error::GatewayResult;
use crate::gateways::types::{
    ChargeOutcome, ChargeRequest, GatewayName, GatewayWebhookEvent, Money, RefundOutcome,
    VerifyOutcome,
};
use async_trait::async_trait;

/// Capability contract shared by every payment gateway.
///
/// The orchestrator holds an ordered list of these and tries them in sequence;
/// adding a third provider means implementing this trait and registering it,
/// nothing else.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> GatewayName;

    /// Start a charge. Business declines come back as `accepted = false`;
    /// only transport-level failures (timeout, 5xx, malformed response) are
    /// errors, so the resilience wrapper can count them.
    async fn initiate(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome>;

    /// Idempotent status check, safe to call repeatedly.
    async fn verify(&self, transaction_ref: &str) -> GatewayResult<VerifyOutcome>;

    async fn refund(
        &self,
        transaction_ref: &str,
        amount: Money,
        reason: &str,
    ) -> GatewayResult<RefundOutcome>;

    /// Constant-time HMAC check against the provider-specific secret and
    /// encoding. A missing or empty signature is always invalid.
    fn validate_signature(&self, payload: &[u8], signature: &str) -> bool;

    fn parse_webhook(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent>;
}
