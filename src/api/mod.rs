pub mod payments;
pub mod webhooks;

use axum::http::header::HeaderName;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum::extract::State;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::webhook_processor::WebhookProcessor;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
    /// Absent in dev mode, where the in-memory stores back everything.
    pub pool: Option<PgPool>,
}

pub fn build_router(state: AppState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .route("/health", get(health))
        .route(
            "/payments/{order_id}/initiate",
            post(payments::initiate_payment),
        )
        .route("/payments/{id}", get(payments::get_payment))
        .route("/payments/{id}/verify", get(payments::verify_payment))
        .route("/payments/{id}/audit", get(payments::payment_audit))
        .route(
            "/admin/payments/{id}/refund",
            post(payments::refund_payment),
        )
        .route("/webhook/{gateway}", post(webhooks::handle_webhook))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match &state.pool {
        Some(pool) => match crate::database::health_check(pool).await {
            Ok(()) => "up",
            Err(_) => "down",
        },
        None => "disabled",
    };

    Json(HealthResponse {
        status: if database == "down" { "degraded" } else { "ok" },
        database,
    })
}
