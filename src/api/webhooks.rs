//! Webhook ingress endpoint.
//!
//! Response codes are chosen for provider retry behavior: 401 tells an
//! unauthenticated sender nothing useful, 200 acknowledges everything we
//! can never act on (so the provider stops redelivering), and 422 flags a
//! payload the provider should fix.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::str::FromStr;
use tracing::info;

use crate::api::AppState;
use crate::error::AppErrorKind;
use crate::gateways::types::GatewayName;
use crate::services::webhook_processor::{IgnoreReason, WebhookDisposition};

/// POST /webhook/{gateway}
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let gateway = match GatewayName::from_str(&gateway) {
        Ok(g) => g,
        Err(_) => {
            return (StatusCode::NOT_FOUND, "unknown gateway").into_response();
        }
    };

    let signature = headers
        .get(gateway.signature_header())
        .and_then(|v| v.to_str().ok());

    match state.webhooks.process(gateway, &body, signature).await {
        Ok(WebhookDisposition::Processed(payment)) => {
            info!(
                gateway = %gateway,
                payment_id = %payment.id,
                status = %payment.status,
                "webhook applied"
            );
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Ok(WebhookDisposition::Ignored(reason)) => {
            let reason = match reason {
                IgnoreReason::MalformedPayload => "malformed payload",
                IgnoreReason::UnknownReference => "unknown reference",
            };
            (
                StatusCode::OK,
                Json(serde_json::json!({"status": "ignored", "reason": reason})),
            )
                .into_response()
        }
        // A parseable event with no transaction reference is the one shape
        // worth bouncing back to the provider
        Err(e) if matches!(e.kind, AppErrorKind::Validation(_)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({"status": "error", "message": e.user_message()})),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
