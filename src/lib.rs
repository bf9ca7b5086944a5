//! Payment orchestration core.
//!
//! Routes charges across multiple payment gateways with idempotent
//! initiation, circuit-breaker failover, webhook-driven settlement, and an
//! optimistically-versioned payment state machine backed by Postgres.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod gateways;
pub mod services;
