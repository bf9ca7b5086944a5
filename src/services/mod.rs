pub mod idempotency;
pub mod orders;
pub mod payment_orchestrator;
pub mod webhook_processor;

pub use idempotency::{
    Acquisition, IdempotencyStore, InMemoryIdempotencyStore, RedisIdempotencyStore,
};
pub use orders::{InMemoryOrderService, Order, OrderService, PgOrderService};
pub use payment_orchestrator::{InitiatePayment, PaymentOrchestrator, PaymentStatus};
pub use webhook_processor::{IgnoreReason, WebhookDisposition, WebhookProcessor};
