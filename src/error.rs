//! Unified error handling for the payment orchestration core
//!
//! Provides a single application error type with stable machine-readable
//! codes, HTTP status mapping, and user-facing messages for client handling.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "ORDER_NOT_PAYABLE")]
    OrderNotPayable,
    #[serde(rename = "IDEMPOTENCY_CONFLICT")]
    IdempotencyConflict,
    #[serde(rename = "INVALID_STATE_TRANSITION")]
    InvalidStateTransition,
    #[serde(rename = "REFUND_NOT_ALLOWED")]
    RefundNotAllowed,
    #[serde(rename = "CONCURRENCY_CONFLICT")]
    ConcurrencyConflict,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "IDEMPOTENCY_STORE_ERROR")]
    IdempotencyStoreError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (4xx/5xx at the gateway boundary)
    #[serde(rename = "GATEWAY_UNAVAILABLE")]
    GatewayUnavailable,
    #[serde(rename = "PAYMENT_FAILED")]
    PaymentFailed,
    #[serde(rename = "REFUND_REJECTED")]
    RefundRejected,
    #[serde(rename = "SIGNATURE_INVALID")]
    SignatureInvalid,

    // Generic
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business-rule errors owned by the orchestration core
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Payment with the given id or transaction reference doesn't exist
    PaymentNotFound { reference: String },
    /// Order doesn't exist
    OrderNotFound { order_id: String },
    /// Order exists but is not in a payable state
    OrderNotPayable { order_id: String },
    /// Idempotency key already bound to a different order
    IdempotencyConflict {
        key: String,
        existing_order_id: String,
    },
    /// Requested transition is not permitted by the state machine
    InvalidStateTransition { from: String, to: String },
    /// Refund requested while the payment is not in SUCCESS
    RefundNotAllowed { status: String },
    /// Optimistic version check failed; the row changed underneath the writer
    ConcurrencyConflict { payment_id: String },
}

/// Infrastructure-level errors (database, idempotency store, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    IdempotencyStore { message: String },
    Configuration { message: String },
}

/// Errors originating at the gateway boundary
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// All configured gateways were tried and none accepted the charge
    AllGatewaysFailed { errors: Vec<String> },
    /// A single gateway was unreachable (transport, 5xx, timeout)
    GatewayUnavailable { gateway: String, message: String },
    /// Gateway explicitly refused a refund; message is verbatim
    RefundRejected { gateway: String, message: String },
    /// Webhook signature missing or failed verification
    SignatureInvalid { gateway: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    MissingField { field: String },
    InvalidValue { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn infrastructure(err: InfrastructureError) -> Self {
        Self::new(AppErrorKind::Infrastructure(err))
    }

    pub fn external(err: ExternalError) -> Self {
        Self::new(AppErrorKind::External(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => StatusCode::NOT_FOUND,
                DomainError::OrderNotFound { .. } => StatusCode::NOT_FOUND,
                DomainError::OrderNotPayable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                DomainError::IdempotencyConflict { .. } => StatusCode::CONFLICT,
                DomainError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
                DomainError::RefundNotAllowed { .. } => StatusCode::CONFLICT,
                DomainError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
            },
            AppErrorKind::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppErrorKind::External(err) => match err {
                ExternalError::AllGatewaysFailed { .. } => StatusCode::BAD_GATEWAY,
                ExternalError::GatewayUnavailable { .. } => StatusCode::BAD_GATEWAY,
                ExternalError::RefundRejected { .. } => StatusCode::BAD_GATEWAY,
                ExternalError::SignatureInvalid { .. } => StatusCode::UNAUTHORIZED,
            },
            AppErrorKind::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::OrderNotPayable { .. } => ErrorCode::OrderNotPayable,
                DomainError::IdempotencyConflict { .. } => ErrorCode::IdempotencyConflict,
                DomainError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
                DomainError::RefundNotAllowed { .. } => ErrorCode::RefundNotAllowed,
                DomainError::ConcurrencyConflict { .. } => ErrorCode::ConcurrencyConflict,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::IdempotencyStore { .. } => ErrorCode::IdempotencyStoreError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::AllGatewaysFailed { .. } => ErrorCode::PaymentFailed,
                ExternalError::GatewayUnavailable { .. } => ErrorCode::GatewayUnavailable,
                ExternalError::RefundRejected { .. } => ErrorCode::RefundRejected,
                ExternalError::SignatureInvalid { .. } => ErrorCode::SignatureInvalid,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-facing error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { reference } => {
                    format!("Payment '{}' not found", reference)
                }
                DomainError::OrderNotFound { order_id } => {
                    format!("Order '{}' not found", order_id)
                }
                DomainError::OrderNotPayable { order_id } => {
                    format!("Order '{}' is not payable", order_id)
                }
                DomainError::IdempotencyConflict {
                    key,
                    existing_order_id,
                } => {
                    format!(
                        "Idempotency key '{}' is already used for order '{}'",
                        key, existing_order_id
                    )
                }
                DomainError::InvalidStateTransition { from, to } => {
                    format!("Invalid payment state transition from {} to {}", from, to)
                }
                DomainError::RefundNotAllowed { status } => {
                    format!("Cannot refund payment in state {}", status)
                }
                DomainError::ConcurrencyConflict { payment_id } => {
                    format!(
                        "Payment '{}' was modified concurrently; retry the operation",
                        payment_id
                    )
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::AllGatewaysFailed { errors } => {
                    format!("Payment failed on all gateways: {}", errors.join("; "))
                }
                ExternalError::GatewayUnavailable { gateway, .. } => {
                    format!("Payment gateway ({}) is temporarily unavailable", gateway)
                }
                ExternalError::RefundRejected { gateway, message } => {
                    format!("Refund rejected by {}: {}", gateway, message)
                }
                ExternalError::SignatureInvalid { gateway } => {
                    format!("Invalid webhook signature for {}", gateway)
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidValue { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if the caller may safely retry the whole operation
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(err) => {
                matches!(err, DomainError::ConcurrencyConflict { .. })
            }
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::IdempotencyStore { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => {
                matches!(
                    err,
                    ExternalError::AllGatewaysFailed { .. }
                        | ExternalError::GatewayUnavailable { .. }
                )
            }
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<crate::database::error::DatabaseError> for AppError {
    fn from(err: crate::database::error::DatabaseError) -> Self {
        use crate::database::error::DatabaseErrorKind;
        match &err.kind {
            DatabaseErrorKind::NotFound { id, .. } => {
                AppError::domain(DomainError::PaymentNotFound {
                    reference: id.clone(),
                })
            }
            DatabaseErrorKind::VersionConflict { id, .. } => {
                AppError::domain(DomainError::ConcurrencyConflict {
                    payment_id: id.clone(),
                })
            }
            DatabaseErrorKind::Connection { message } => {
                AppError::infrastructure(InfrastructureError::Database {
                    message: message.clone(),
                    is_retryable: true,
                })
            }
            _ => AppError::infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: false,
            }),
        }
    }
}

/// Wire format for error responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.user_message(),
                request_id: self.request_id.clone(),
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
