//! Payment orchestration service.
//!
//! Routes charges through the configured gateways in order, manages the
//! payment state machine under optimistic concurrency, and enforces
//! idempotency on initiation. Settlement arrives through webhooks or
//! explicit verification; both funnel into the same transition logic.

use crate::database::payment_store::{NewPayment, Payment, PaymentStore, PaymentUpdate};
use crate::error::{
    AppError, AppResult, DomainError, ExternalError, InfrastructureError, ValidationError,
};
use crate::gateways::client::PaymentGateway;
use crate::gateways::types::{
    ChargeRequest, CustomerContact, GatewayWebhookEvent, Money, SettlementStatus,
};
use crate::services::idempotency::{Acquisition, IdempotencyStore};
use crate::services::orders::OrderService;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Payment lifecycle states.
///
/// PENDING is the only state settlement can move out of; SUCCESS can only
/// move to REFUNDED, and FAILED / CANCELLED / REFUNDED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
        }
    }

    pub fn can_transition_to(&self, to: PaymentStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Success)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Success, Self::Refunded)
        )
    }

    /// Whether settlement signals (webhook, verify) are no-ops in this state.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "REFUNDED" => Ok(Self::Refunded),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for starting a payment.
#[derive(Debug, Clone)]
pub struct InitiatePayment {
    pub order_id: Uuid,
    pub idempotency_key: String,
    pub customer: CustomerContact,
    pub callback_url: Option<String>,
}

/// How many times a settlement write retries after losing the version race.
const MAX_SETTLEMENT_ATTEMPTS: u32 = 3;

pub struct PaymentOrchestrator {
    gateways: Vec<Arc<dyn PaymentGateway>>,
    payments: Arc<dyn PaymentStore>,
    orders: Arc<dyn OrderService>,
    idempotency: Arc<dyn IdempotencyStore>,
}

impl PaymentOrchestrator {
    pub fn new(
        gateways: Vec<Arc<dyn PaymentGateway>>,
        payments: Arc<dyn PaymentStore>,
        orders: Arc<dyn OrderService>,
        idempotency: Arc<dyn IdempotencyStore>,
    ) -> Self {
        Self {
            gateways,
            payments,
            orders,
            idempotency,
        }
    }

    fn gateway_named(&self, name: &str) -> Option<&Arc<dyn PaymentGateway>> {
        self.gateways.iter().find(|g| g.name().as_str() == name)
    }

    fn status_of(payment: &Payment) -> AppResult<PaymentStatus> {
        PaymentStatus::from_str(&payment.status).map_err(|message| {
            AppError::infrastructure(InfrastructureError::Database {
                message,
                is_retryable: false,
            })
        })
    }

    /// Start (or resume) a payment for an order.
    ///
    /// The order must be payable before the idempotency key is consulted;
    /// a replayed request returns the stored payment without touching a
    /// gateway, unless the stored payment never reached one.
    pub async fn initiate_payment(&self, request: InitiatePayment) -> AppResult<Payment> {
        if request.idempotency_key.trim().is_empty() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "idempotency_key".to_string(),
            }));
        }
        if self.gateways.is_empty() {
            return Err(AppError::infrastructure(
                InfrastructureError::Configuration {
                    message: "no payment gateways configured".to_string(),
                },
            ));
        }

        let order = match self.orders.find(request.order_id).await? {
            Some(order) => order,
            None => {
                return Err(AppError::domain(DomainError::OrderNotFound {
                    order_id: request.order_id.to_string(),
                }));
            }
        };
        if !order.is_payable() {
            return Err(AppError::domain(DomainError::OrderNotPayable {
                order_id: request.order_id.to_string(),
            }));
        }

        let key = request.idempotency_key.trim().to_string();
        let acquisition = self.idempotency.try_acquire(&key, request.order_id).await?;

        match acquisition {
            Acquisition::Conflict { existing_order_id } => {
                return Err(AppError::domain(DomainError::IdempotencyConflict {
                    key,
                    existing_order_id,
                }));
            }
            Acquisition::Replay => {
                if let Some(payment) = self.payments.find_by_idempotency_key(&key).await? {
                    // A pending payment that never reached a gateway resumes
                    // the charge attempt; everything else replays verbatim.
                    let status = Self::status_of(&payment)?;
                    if status == PaymentStatus::Pending && payment.transaction_ref.is_none() {
                        debug!(payment_id = %payment.id, "resuming stalled initiation");
                        return self.attempt_gateways(payment, &request).await;
                    }
                    info!(payment_id = %payment.id, key = %key, "idempotent replay");
                    return Ok(payment);
                }
                // Key was bound but the row never landed; fall through and
                // create it now.
            }
            Acquisition::Acquired => {}
        }

        let new_payment = NewPayment {
            order_id: order.id,
            user_id: order.user_id,
            idempotency_key: key.clone(),
            amount: order.amount,
            currency: order.currency.clone(),
        };
        let payment = match self.payments.insert(new_payment).await {
            Ok(payment) => payment,
            Err(e) if e.is_unique_violation() => {
                // Lost an insert race with a concurrent identical request
                return self
                    .payments
                    .find_by_idempotency_key(&key)
                    .await?
                    .ok_or_else(|| AppError::from(e));
            }
            Err(e) => {
                // Leave no key bound to a row that never landed
                self.idempotency.release(&key).await?;
                return Err(e.into());
            }
        };

        self.attempt_gateways(payment, &request).await
    }

    /// Try each gateway in order until one takes the charge.
    ///
    /// Declines, transport failures, and open circuits all fail over to the
    /// next gateway. Exhaustion marks the payment FAILED only when every
    /// attempt provably produced no charge; a timed-out call may have landed,
    /// so the payment stays PENDING for webhook or verify reconciliation.
    async fn attempt_gateways(
        &self,
        payment: Payment,
        request: &InitiatePayment,
    ) -> AppResult<Payment> {
        let reference = format!("pay_{}", payment.id.simple());
        let mut failures: Vec<String> = Vec::new();
        let mut charge_may_exist = false;
        let mut last_decline: Option<String> = None;

        for gateway in &self.gateways {
            let charge = ChargeRequest {
                reference: reference.clone(),
                amount: Money::new(payment.amount, payment.currency.clone()),
                customer: request.customer.clone(),
                callback_url: request.callback_url.clone(),
            };

            match gateway.initiate(charge).await {
                Ok(outcome) if outcome.accepted => {
                    info!(
                        payment_id = %payment.id,
                        gateway = %gateway.name(),
                        "charge accepted"
                    );
                    let update = PaymentUpdate {
                        status: PaymentStatus::Pending.as_str().to_string(),
                        from_status: payment.status.clone(),
                        gateway: Some(gateway.name().as_str().to_string()),
                        transaction_ref: outcome
                            .transaction_ref
                            .or_else(|| Some(reference.clone())),
                        checkout_url: outcome.checkout_url,
                        gateway_response: outcome.raw,
                        reason: Some("gateway accepted charge".to_string()),
                        ..Default::default()
                    };
                    return self
                        .payments
                        .update_status(payment.id, payment.version, update)
                        .await
                        .map_err(Into::into);
                }
                Ok(outcome) => {
                    let message = outcome
                        .message
                        .unwrap_or_else(|| "declined by gateway".to_string());
                    warn!(
                        payment_id = %payment.id,
                        gateway = %gateway.name(),
                        message = %message,
                        "charge declined, failing over"
                    );
                    failures.push(format!("{}: {}", gateway.name(), message));
                    last_decline = Some(message);
                }
                Err(e) => {
                    warn!(
                        payment_id = %payment.id,
                        gateway = %gateway.name(),
                        error = %e,
                        "gateway call failed, failing over"
                    );
                    charge_may_exist = charge_may_exist || e.may_have_charged();
                    failures.push(format!("{}: {}", gateway.name(), e));
                }
            }
        }

        if charge_may_exist {
            // A request may have reached a provider before dying, so FAILED
            // cannot be asserted. The payment stays PENDING and a replay of
            // the same idempotency key resumes the attempt.
            return Err(AppError::external(ExternalError::AllGatewaysFailed {
                errors: failures,
            }));
        }

        // Every attempt provably left no charge behind
        let update = PaymentUpdate {
            status: PaymentStatus::Failed.as_str().to_string(),
            from_status: payment.status.clone(),
            failure_reason: last_decline.or_else(|| Some(failures.join("; "))),
            reason: Some("all gateways failed".to_string()),
            ..Default::default()
        };
        self.payments
            .update_status(payment.id, payment.version, update)
            .await?;
        Err(AppError::external(ExternalError::AllGatewaysFailed {
            errors: failures,
        }))
    }

    pub async fn get_payment(&self, id: Uuid) -> AppResult<Payment> {
        self.payments
            .find_by_id(id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::PaymentNotFound {
                    reference: id.to_string(),
                })
            })
    }

    /// Query the owning gateway for the authoritative charge status and
    /// apply it. Safe to call at any time; settled payments are returned
    /// unchanged and a gateway timeout changes nothing.
    pub async fn verify_payment(&self, id: Uuid) -> AppResult<Payment> {
        let payment = self.get_payment(id).await?;
        if Self::status_of(&payment)?.is_settled() {
            return Ok(payment);
        }
        let (gateway_name, transaction_ref) =
            match (payment.gateway.clone(), payment.transaction_ref.clone()) {
                (Some(g), Some(r)) => (g, r),
                // Never reached a gateway; there is nothing to verify yet
                _ => return Ok(payment),
            };

        let gateway = self.gateway_named(&gateway_name).ok_or_else(|| {
            AppError::infrastructure(InfrastructureError::Configuration {
                message: format!("gateway '{}' is not configured", gateway_name),
            })
        })?;

        let outcome = gateway.verify(&transaction_ref).await.map_err(|e| {
            AppError::external(ExternalError::GatewayUnavailable {
                gateway: gateway_name.clone(),
                message: e.to_string(),
            })
        })?;

        if let Some(reported) = &outcome.amount {
            if reported.amount != payment.amount {
                warn!(
                    payment_id = %payment.id,
                    expected = %payment.amount,
                    reported = %reported.amount,
                    "gateway reported a different amount"
                );
            }
        }

        self.apply_settlement(payment.id, outcome.status, outcome.raw, "verify")
            .await
    }

    /// Apply a settlement signal carried by a validated webhook event.
    ///
    /// Returns `Ok(None)` when the transaction reference is unknown, which
    /// the ingress layer acknowledges so the provider stops retrying.
    pub async fn process_webhook_event(
        &self,
        event: GatewayWebhookEvent,
    ) -> AppResult<Option<Payment>> {
        let transaction_ref = match &event.transaction_ref {
            Some(r) => r.clone(),
            None => {
                return Err(AppError::validation(ValidationError::MissingField {
                    field: "transaction_ref".to_string(),
                }));
            }
        };

        let payment = match self
            .payments
            .find_by_transaction_ref(event.gateway.as_str(), &transaction_ref)
            .await?
        {
            Some(p) => p,
            None => {
                warn!(
                    gateway = %event.gateway,
                    transaction_ref = %transaction_ref,
                    "webhook for unknown transaction"
                );
                return Ok(None);
            }
        };

        let status = event.status.unwrap_or(SettlementStatus::Unknown);
        let payment = self
            .apply_settlement(payment.id, status, Some(event.payload), "webhook")
            .await?;
        Ok(Some(payment))
    }

    /// Translate a gateway settlement status into a state transition and
    /// write it with a bounded compare-and-set loop. Replays and races with
    /// an already-settled row are idempotent no-ops.
    async fn apply_settlement(
        &self,
        payment_id: Uuid,
        settlement: SettlementStatus,
        raw: Option<serde_json::Value>,
        actor: &str,
    ) -> AppResult<Payment> {
        let target = match settlement {
            SettlementStatus::Paid => PaymentStatus::Success,
            SettlementStatus::Failed => PaymentStatus::Failed,
            SettlementStatus::Cancelled => PaymentStatus::Cancelled,
            // Still in flight or unrecognized; leave the payment alone
            SettlementStatus::Pending | SettlementStatus::Unknown => {
                return self.get_payment(payment_id).await;
            }
        };

        for attempt in 0..MAX_SETTLEMENT_ATTEMPTS {
            let payment = self.get_payment(payment_id).await?;
            let current = Self::status_of(&payment)?;

            if current == target || current.is_settled() {
                // Duplicate delivery or a concurrent writer got there first
                debug!(
                    payment_id = %payment.id,
                    status = %current,
                    "settlement already applied"
                );
                return Ok(payment);
            }
            if !current.can_transition_to(target) {
                return Err(AppError::domain(DomainError::InvalidStateTransition {
                    from: current.to_string(),
                    to: target.to_string(),
                }));
            }

            let update = PaymentUpdate {
                status: target.as_str().to_string(),
                from_status: current.as_str().to_string(),
                gateway_response: raw.clone(),
                failure_reason: match target {
                    PaymentStatus::Failed => Some("reported failed by gateway".to_string()),
                    _ => None,
                },
                actor: Some(actor.to_string()),
                ..Default::default()
            };

            match self
                .payments
                .update_status(payment.id, payment.version, update)
                .await
            {
                Ok(updated) => {
                    info!(
                        payment_id = %updated.id,
                        from = %current,
                        to = %target,
                        actor = actor,
                        "payment settled"
                    );
                    if target == PaymentStatus::Success {
                        if let Err(e) = self.orders.mark_paid(updated.order_id).await {
                            // The payment is the source of truth; order sync
                            // failures are logged and reconciled out of band
                            error!(
                                order_id = %updated.order_id,
                                error = %e,
                                "failed to mark order paid"
                            );
                        }
                    }
                    return Ok(updated);
                }
                Err(e) if e.is_version_conflict() => {
                    debug!(
                        payment_id = %payment_id,
                        attempt,
                        "settlement lost version race, retrying"
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::domain(DomainError::ConcurrencyConflict {
            payment_id: payment_id.to_string(),
        }))
    }

    /// Refund a successful payment in full.
    ///
    /// The refund is claimed with a version-guarded write before the gateway
    /// is called, so when two refunds race the loser gets a concurrency
    /// conflict before it can reach the provider. A claim whose gateway call
    /// then fails leaves the payment SUCCESS and retryable.
    pub async fn refund_payment(
        &self,
        id: Uuid,
        reason: &str,
        admin_id: &str,
    ) -> AppResult<Payment> {
        if reason.trim().is_empty() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "reason".to_string(),
            }));
        }

        let payment = self.get_payment(id).await?;
        let current = Self::status_of(&payment)?;
        if current != PaymentStatus::Success {
            return Err(AppError::domain(DomainError::RefundNotAllowed {
                status: current.to_string(),
            }));
        }
        let (gateway_name, transaction_ref) =
            match (payment.gateway.clone(), payment.transaction_ref.clone()) {
                (Some(g), Some(r)) => (g, r),
                _ => {
                    return Err(AppError::domain(DomainError::RefundNotAllowed {
                        status: current.to_string(),
                    }));
                }
            };

        let gateway = self.gateway_named(&gateway_name).ok_or_else(|| {
            AppError::infrastructure(InfrastructureError::Configuration {
                message: format!("gateway '{}' is not configured", gateway_name),
            })
        })?;

        // Claim the refund under the version guard before touching the
        // network: a concurrent refund that read the same version loses
        // here, not after a second provider call.
        let claimed = self
            .payments
            .update_status(
                payment.id,
                payment.version,
                PaymentUpdate {
                    status: current.as_str().to_string(),
                    from_status: current.as_str().to_string(),
                    actor: Some(admin_id.to_string()),
                    reason: Some("refund requested".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let outcome = gateway
            .refund(
                &transaction_ref,
                Money::new(claimed.amount, claimed.currency.clone()),
                reason,
            )
            .await
            .map_err(|e| {
                AppError::external(ExternalError::GatewayUnavailable {
                    gateway: gateway_name.clone(),
                    message: e.to_string(),
                })
            })?;

        if !outcome.accepted {
            return Err(AppError::external(ExternalError::RefundRejected {
                gateway: gateway_name,
                message: outcome.message.unwrap_or_else(|| "refund rejected".to_string()),
            }));
        }

        let update = PaymentUpdate {
            status: PaymentStatus::Refunded.as_str().to_string(),
            from_status: current.as_str().to_string(),
            refund_reason: Some(reason.to_string()),
            refunded_by: Some(admin_id.to_string()),
            refunded_at: Some(Utc::now()),
            actor: Some(admin_id.to_string()),
            reason: Some(reason.to_string()),
            ..Default::default()
        };

        let refunded = self
            .payments
            .update_status(claimed.id, claimed.version, update)
            .await
            .map_err(AppError::from)?;

        info!(payment_id = %refunded.id, admin_id, "payment refunded");
        if let Err(e) = self.orders.mark_refunded(refunded.order_id).await {
            error!(
                order_id = %refunded.order_id,
                error = %e,
                "failed to mark order refunded"
            );
        }
        Ok(refunded)
    }

    pub async fn payment_audit(
        &self,
        id: Uuid,
    ) -> AppResult<Vec<crate::database::payment_store::PaymentAudit>> {
        // Ensure the payment exists so callers get a 404 instead of []
        let payment = self.get_payment(id).await?;
        self.payments.list_audit(payment.id).await.map_err(Into::into)
    }
}
