//! Payment gateway integrations.
//!
//! Every provider implements [`client::PaymentGateway`]; the orchestrator only
//! ever sees the trait. [`circuit::ResilientGateway`] composes a provider with
//! its circuit breaker behind the same trait.

pub mod circuit;
pub mod client;
pub mod error;
pub mod http;
pub mod providers;
pub mod types;

pub use circuit::{CircuitBreaker, ResilientGateway};
pub use client::PaymentGateway;
pub use error::{GatewayError, GatewayResult};
pub use types::{
    ChargeOutcome, ChargeRequest, CustomerContact, GatewayName, GatewayWebhookEvent, Money,
    RefundOutcome, SettlementStatus, VerifyOutcome,
};
