use crate::database::error::DatabaseError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Payment entity. `status` holds the wire form of the state machine
/// (PENDING, SUCCESS, FAILED, CANCELLED, REFUNDED); `version` is the
/// optimistic-concurrency counter bumped on every successful update.
/// `gateway` stays NULL until a gateway accepts the charge and is
/// immutable from then on.
#[derive(Debug, Clone, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub gateway: Option<String>,
    pub transaction_ref: Option<String>,
    pub idempotency_key: String,
    pub amount: Decimal,
    pub currency: String,
    pub checkout_url: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
    pub refund_reason: Option<String>,
    pub refunded_by: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a payment row. Status always starts at PENDING
/// with no gateway assigned.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub idempotency_key: String,
    pub amount: Decimal,
    pub currency: String,
}

/// A compare-and-set status update. `from_status` is the status the caller
/// observed when it loaded the row; it lands in the audit trail. Option
/// fields left as `None` keep the current column value. `gateway` is only
/// applied when the column is still NULL; a set gateway never changes.
#[derive(Debug, Clone, Default)]
pub struct PaymentUpdate {
    pub status: String,
    pub from_status: String,
    pub gateway: Option<String>,
    pub transaction_ref: Option<String>,
    pub checkout_url: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
    pub refund_reason: Option<String>,
    pub refunded_by: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub actor: Option<String>,
    pub reason: Option<String>,
}

/// Append-only record of a status transition. `gateway_payload` carries the
/// raw provider response that drove the transition, so later settlements do
/// not erase the evidence for earlier ones.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentAudit {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub gateway_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Persistence contract for payments. The orchestrator only talks to this
/// trait; the Postgres implementation backs production and the in-memory
/// one backs dev mode and tests.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, new: NewPayment) -> Result<Payment, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError>;

    async fn find_by_idempotency_key(&self, key: &str)
        -> Result<Option<Payment>, DatabaseError>;

    async fn find_by_transaction_ref(
        &self,
        gateway: &str,
        transaction_ref: &str,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Apply `update` only if the row still carries `expected_version`.
    /// Returns `VersionConflict` when a concurrent writer got there first.
    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i32,
        update: PaymentUpdate,
    ) -> Result<Payment, DatabaseError>;

    async fn list_audit(&self, payment_id: Uuid) -> Result<Vec<PaymentAudit>, DatabaseError>;
}

const PAYMENT_COLUMNS: &str = "id, order_id, user_id, status, gateway, transaction_ref, \
     idempotency_key, amount, currency, checkout_url, gateway_response, failure_reason, \
     refund_reason, refunded_by, refunded_at, version, is_deleted, created_at, updated_at";

pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert(&self, new: NewPayment) -> Result<Payment, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments (order_id, user_id, status, idempotency_key, amount, currency)
             VALUES ($1, $2, 'PENDING', $3, $4, $5)
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(new.order_id)
        .bind(new.user_id)
        .bind(&new.idempotency_key)
        .bind(new.amount)
        .bind(&new.currency)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO payment_status_audit (payment_id, from_status, to_status, actor)
             VALUES ($1, NULL, 'PENDING', 'system')",
        )
        .bind(payment.id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(payment)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 AND is_deleted = false"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE idempotency_key = $1 AND is_deleted = false"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_transaction_ref(
        &self,
        gateway: &str,
        transaction_ref: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE gateway = $1 AND transaction_ref = $2 AND is_deleted = false"
        ))
        .bind(gateway)
        .bind(transaction_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i32,
        update: PaymentUpdate,
    ) -> Result<Payment, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let updated = sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments SET
                status = $3,
                gateway = COALESCE(gateway, $4),
                transaction_ref = COALESCE($5, transaction_ref),
                checkout_url = COALESCE($6, checkout_url),
                gateway_response = COALESCE($7, gateway_response),
                failure_reason = COALESCE($8, failure_reason),
                refund_reason = COALESCE($9, refund_reason),
                refunded_by = COALESCE($10, refunded_by),
                refunded_at = COALESCE($11, refunded_at),
                version = version + 1,
                updated_at = NOW()
             WHERE id = $1 AND version = $2 AND is_deleted = false
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(expected_version)
        .bind(&update.status)
        .bind(&update.gateway)
        .bind(&update.transaction_ref)
        .bind(&update.checkout_url)
        .bind(&update.gateway_response)
        .bind(&update.failure_reason)
        .bind(&update.refund_reason)
        .bind(&update.refunded_by)
        .bind(update.refunded_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let payment = match updated {
            Some(payment) => payment,
            None => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                // Distinguish a stale version from a missing row
                let exists = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM payments WHERE id = $1 AND is_deleted = false",
                )
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
                return if exists > 0 {
                    Err(DatabaseError::version_conflict("Payment", id))
                } else {
                    Err(DatabaseError::not_found("Payment", id))
                };
            }
        };

        sqlx::query(
            "INSERT INTO payment_status_audit
                 (payment_id, from_status, to_status, actor, reason, gateway_payload)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(payment.id)
        .bind(&update.from_status)
        .bind(&update.status)
        .bind(update.actor.as_deref().unwrap_or("system"))
        .bind(&update.reason)
        .bind(&update.gateway_response)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(payment)
    }

    async fn list_audit(&self, payment_id: Uuid) -> Result<Vec<PaymentAudit>, DatabaseError> {
        sqlx::query_as::<_, PaymentAudit>(
            "SELECT id, payment_id, from_status, to_status, actor, reason, gateway_payload,
                    created_at
             FROM payment_status_audit
             WHERE payment_id = $1
             ORDER BY created_at ASC",
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
