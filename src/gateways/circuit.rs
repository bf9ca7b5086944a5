//! Circuit breaker wrapper around a payment gateway.
//!
//! Tracks transport failures in a rolling window; once the threshold is hit
//! the circuit opens and calls short-circuit without touching the network
//! until the cooldown elapses, after which a single probe is let through
//! (half-open). The probe's outcome closes or reopens the circuit.

use crate::config::CircuitConfig;
use crate::gateways::client::PaymentGateway;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{
    ChargeOutcome, ChargeRequest, GatewayName, GatewayWebhookEvent, Money, RefundOutcome,
    VerifyOutcome,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug)]
enum BreakerState {
    Closed { failures: VecDeque<Instant> },
    Open { since: Instant },
    HalfOpen,
}

pub struct CircuitBreaker {
    config: CircuitConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::Closed {
                failures: VecDeque::new(),
            }),
        }
    }

    /// Whether a call may proceed. Transitions Open -> HalfOpen once the
    /// cooldown has elapsed, admitting exactly one probe.
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        match &*state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { since } => {
                if since.elapsed() >= self.config.cooldown {
                    *state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            // Probe already in flight
            BreakerState::HalfOpen => false,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        *state = BreakerState::Closed {
            failures: VecDeque::new(),
        };
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        match &mut *state {
            BreakerState::Closed { failures } => {
                let now = Instant::now();
                failures.push_back(now);
                while let Some(oldest) = failures.front() {
                    if now.duration_since(*oldest) > self.config.window {
                        failures.pop_front();
                    } else {
                        break;
                    }
                }
                if failures.len() as u32 >= self.config.failure_threshold {
                    *state = BreakerState::Open { since: now };
                }
            }
            BreakerState::HalfOpen => {
                *state = BreakerState::Open {
                    since: Instant::now(),
                };
            }
            BreakerState::Open { .. } => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            &*self.state.lock().expect("breaker lock poisoned"),
            BreakerState::Open { .. }
        )
    }
}

/// A gateway composed with its circuit breaker. Implements the same trait, so
/// the orchestrator treats wrapped and bare gateways identically.
pub struct ResilientGateway {
    inner: Arc<dyn PaymentGateway>,
    breaker: CircuitBreaker,
}

impl ResilientGateway {
    pub fn new(inner: Arc<dyn PaymentGateway>, config: CircuitConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new(config),
        }
    }

    fn guard(&self) -> GatewayResult<()> {
        if self.breaker.allow_request() {
            Ok(())
        } else {
            warn!(gateway = %self.inner.name(), "circuit open, rejecting call");
            Err(GatewayError::CircuitOpen {
                gateway: self.inner.name().to_string(),
            })
        }
    }

    fn observe<T>(&self, result: GatewayResult<T>) -> GatewayResult<T> {
        match &result {
            // Business outcomes (including declines) prove the provider is up
            Ok(_) => self.breaker.record_success(),
            Err(e) if e.is_transport() => {
                self.breaker.record_failure();
                if self.breaker.is_open() {
                    info!(gateway = %self.inner.name(), "circuit opened");
                }
            }
            Err(_) => self.breaker.record_success(),
        }
        result
    }
}

#[async_trait]
impl PaymentGateway for ResilientGateway {
    fn name(&self) -> GatewayName {
        self.inner.name()
    }

    async fn initiate(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome> {
        self.guard()?;
        let result = self.inner.initiate(request).await;
        self.observe(result)
    }

    async fn verify(&self, transaction_ref: &str) -> GatewayResult<VerifyOutcome> {
        self.guard()?;
        let result = self.inner.verify(transaction_ref).await;
        self.observe(result)
    }

    async fn refund(
        &self,
        transaction_ref: &str,
        amount: Money,
        reason: &str,
    ) -> GatewayResult<RefundOutcome> {
        self.guard()?;
        let result = self.inner.refund(transaction_ref, amount, reason).await;
        self.observe(result)
    }

    fn validate_signature(&self, payload: &[u8], signature: &str) -> bool {
        // Local computation, no network involved
        self.inner.validate_signature(payload, signature)
    }

    fn parse_webhook(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
        self.inner.parse_webhook(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::{CustomerContact, SettlementStatus};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct ScriptedGateway {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        fn name(&self) -> GatewayName {
            GatewayName::Paystack
        }

        async fn initiate(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(GatewayError::Network {
                    message: "connect timeout".to_string(),
                })
            } else {
                Ok(ChargeOutcome {
                    accepted: true,
                    transaction_ref: Some(request.reference),
                    checkout_url: Some("https://example.com/pay".to_string()),
                    message: None,
                    raw: None,
                })
            }
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

        fn validate_signature(&self, _payload: &[u8], _signature: &str) -> bool {
            true
        }

        fn parse_webhook(&self, _payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
            Err(GatewayError::WebhookPayload {
                message: "not used".to_string(),
            })
        }
    }

    fn charge_request() -> ChargeRequest {
        ChargeRequest {
            reference: "pay_1".to_string(),
            amount: Money::new(Decimal::from(1000), "NGN"),
            customer: CustomerContact {
                email: Some("test@example.com".to_string()),
                phone: None,
            },
            callback_url: None,
        }
    }

    fn config(threshold: u32, cooldown: Duration) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: threshold,
            window: Duration::from_secs(60),
            cooldown,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_and_short_circuits() {
        let inner = Arc::new(ScriptedGateway {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let gateway = ResilientGateway::new(inner.clone(), config(3, Duration::from_secs(60)));

        for _ in 0..3 {
            let err = gateway.initiate(charge_request()).await.unwrap_err();
            assert!(matches!(err, GatewayError::Network { .. }));
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);

        // Circuit is open: rejected without touching the inner gateway
        let err = gateway.initiate(charge_request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_circuit() {
        let inner = Arc::new(ScriptedGateway {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let gateway = ResilientGateway::new(inner.clone(), config(2, Duration::from_millis(20)));

        for _ in 0..2 {
            let _ = gateway.initiate(charge_request()).await;
        }
        assert!(matches!(
            gateway.initiate(charge_request()).await.unwrap_err(),
            GatewayError::CircuitOpen { .. }
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;

        // Probe goes through and succeeds, closing the circuit
        let outcome = gateway
            .initiate(charge_request())
            .await
            .expect("probe should succeed");
        assert!(outcome.accepted);

        let outcome = gateway
            .initiate(charge_request())
            .await
            .expect("circuit should be closed again");
        assert!(outcome.accepted);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens_circuit() {
        let inner = Arc::new(ScriptedGateway {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let gateway = ResilientGateway::new(inner.clone(), config(2, Duration::from_millis(20)));

        for _ in 0..2 {
            let _ = gateway.initiate(charge_request()).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Probe fails, circuit reopens immediately
        let err = gateway.initiate(charge_request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Network { .. }));

        let err = gateway.initiate(charge_request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn business_decline_does_not_trip_breaker() {
        struct DecliningGateway;

        #[async_trait]
        impl PaymentGateway for DecliningGateway {
            fn name(&self) -> GatewayName {
                GatewayName::Flutterwave
            }

            async fn initiate(&self, _request: ChargeRequest) -> GatewayResult<ChargeOutcome> {
                Ok(ChargeOutcome {
                    accepted: false,
                    transaction_ref: None,
                    checkout_url: None,
                    message: Some("insufficient funds".to_string()),
                    raw: None,
                })
            }

            async fn verify(&self, _transaction_ref: &str) -> GatewayResult<VerifyOutcome> {
                Ok(VerifyOutcome {
                    status: SettlementStatus::Unknown,
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
                    accepted: false,
                    refund_id: None,
                    message: None,
                })
            }

            fn validate_signature(&self, _payload: &[u8], _signature: &str) -> bool {
                true
            }

            fn parse_webhook(&self, _payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
                Err(GatewayError::WebhookPayload {
                    message: "not used".to_string(),
                })
            }
        }

        let gateway = ResilientGateway::new(
            Arc::new(DecliningGateway),
            config(2, Duration::from_secs(60)),
        );

        for _ in 0..5 {
            let outcome = gateway
                .initiate(charge_request())
                .await
                .expect("decline is not an error");
            assert!(!outcome.accepted);
        }
        // Breaker never opened
        let outcome = gateway.initiate(charge_request()).await.unwrap();
        assert!(!outcome.accepted);
    }
}
