//! Payment endpoints.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::AppState;
use crate::database::payment_store::{Payment, PaymentAudit};
use crate::error::{AppError, AppResult, ValidationError};
use crate::gateways::types::CustomerContact;
use crate::services::payment_orchestrator::InitiatePayment;

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    /// Client-chosen key; may instead arrive in the `Idempotency-Key` header.
    pub idempotency_key: Option<String>,
    pub customer: Option<CustomerInput>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerInput {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub gateway: Option<String>,
    pub transaction_ref: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub checkout_url: Option<String>,
    pub failure_reason: Option<String>,
    pub refund_reason: Option<String>,
    pub refunded_by: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        Self {
            id: p.id,
            order_id: p.order_id,
            user_id: p.user_id,
            status: p.status,
            gateway: p.gateway,
            transaction_ref: p.transaction_ref,
            amount: p.amount,
            currency: p.currency,
            checkout_url: p.checkout_url,
            failure_reason: p.failure_reason,
            refund_reason: p.refund_reason,
            refunded_by: p.refunded_by,
            refunded_at: p.refunded_at,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditEntryResponse {
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<PaymentAudit> for AuditEntryResponse {
    fn from(a: PaymentAudit) -> Self {
        Self {
            from_status: a.from_status,
            to_status: a.to_status,
            actor: a.actor,
            reason: a.reason,
            created_at: a.created_at,
        }
    }
}

/// POST /payments/{order_id}/initiate
pub async fn initiate_payment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<InitiatePaymentRequest>,
) -> AppResult<(StatusCode, Json<PaymentResponse>)> {
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .or(body.idempotency_key)
        .ok_or_else(|| {
            AppError::validation(ValidationError::MissingField {
                field: "idempotency_key".to_string(),
            })
        })?;

    let customer = body
        .customer
        .map(|c| CustomerContact {
            email: c.email,
            phone: c.phone,
        })
        .unwrap_or(CustomerContact {
            email: None,
            phone: None,
        });

    info!(order_id = %order_id, "payment initiation requested");
    let payment = state
        .orchestrator
        .initiate_payment(InitiatePayment {
            order_id,
            idempotency_key,
            customer,
            callback_url: body.callback_url,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(payment.into())))
}

/// GET /payments/{id}
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PaymentResponse>> {
    let payment = state.orchestrator.get_payment(id).await?;
    Ok(Json(payment.into()))
}

/// GET /payments/{id}/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PaymentResponse>> {
    let payment = state.orchestrator.verify_payment(id).await?;
    Ok(Json(payment.into()))
}

/// GET /payments/{id}/audit
pub async fn payment_audit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<AuditEntryResponse>>> {
    let audit = state.orchestrator.payment_audit(id).await?;
    Ok(Json(audit.into_iter().map(Into::into).collect()))
}

/// POST /admin/payments/{id}/refund
///
/// The acting admin is identified by the `x-admin-id` header and recorded
/// on the payment and in the audit trail.
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RefundRequest>,
) -> AppResult<Json<PaymentResponse>> {
    let admin_id = headers
        .get("x-admin-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            AppError::validation(ValidationError::MissingField {
                field: "x-admin-id".to_string(),
            })
        })?;

    let payment = state
        .orchestrator
        .refund_payment(id, &body.reason, admin_id)
        .await?;
    Ok(Json(payment.into()))
}
