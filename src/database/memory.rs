//! In-memory [`PaymentStore`] used in dev mode and tests. Mirrors the
//! Postgres semantics exactly: unique idempotency keys, version counters,
//! and the append-only audit trail.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::payment_store::{
    NewPayment, Payment, PaymentAudit, PaymentStore, PaymentUpdate,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    payments: HashMap<Uuid, Payment>,
    audit: Vec<PaymentAudit>,
}

#[derive(Default)]
pub struct InMemoryPaymentStore {
    inner: Mutex<Inner>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, new: NewPayment) -> Result<Payment, DatabaseError> {
        let mut inner = self.inner.lock().map_err(|_| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: "store lock poisoned".to_string(),
            })
        })?;

        if inner
            .payments
            .values()
            .any(|p| p.idempotency_key == new.idempotency_key && !p.is_deleted)
        {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "payments_idempotency_key_key".to_string(),
            }));
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            order_id: new.order_id,
            user_id: new.user_id,
            status: "PENDING".to_string(),
            gateway: None,
            transaction_ref: None,
            idempotency_key: new.idempotency_key,
            amount: new.amount,
            currency: new.currency,
            checkout_url: None,
            gateway_response: None,
            failure_reason: None,
            refund_reason: None,
            refunded_by: None,
            refunded_at: None,
            version: 1,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        inner.audit.push(PaymentAudit {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            from_status: None,
            to_status: "PENDING".to_string(),
            actor: Some("system".to_string()),
            reason: None,
            gateway_payload: None,
            created_at: now,
        });
        inner.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        let inner = self.inner.lock().map_err(|_| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: "store lock poisoned".to_string(),
            })
        })?;
        Ok(inner.payments.get(&id).filter(|p| !p.is_deleted).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let inner = self.inner.lock().map_err(|_| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: "store lock poisoned".to_string(),
            })
        })?;
        Ok(inner
            .payments
            .values()
            .find(|p| p.idempotency_key == key && !p.is_deleted)
            .cloned())
    }

    async fn find_by_transaction_ref(
        &self,
        gateway: &str,
        transaction_ref: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let inner = self.inner.lock().map_err(|_| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: "store lock poisoned".to_string(),
            })
        })?;
        Ok(inner
            .payments
            .values()
            .find(|p| {
                p.gateway.as_deref() == Some(gateway)
                    && p.transaction_ref.as_deref() == Some(transaction_ref)
                    && !p.is_deleted
            })
            .cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i32,
        update: PaymentUpdate,
    ) -> Result<Payment, DatabaseError> {
        let mut inner = self.inner.lock().map_err(|_| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: "store lock poisoned".to_string(),
            })
        })?;

        let payment = match inner.payments.get_mut(&id).filter(|p| !p.is_deleted) {
            Some(p) => p,
            None => return Err(DatabaseError::not_found("Payment", id)),
        };
        if payment.version != expected_version {
            return Err(DatabaseError::version_conflict("Payment", id));
        }

        payment.status = update.status.clone();
        // Set once; an assigned gateway never changes
        if payment.gateway.is_none() {
            payment.gateway = update.gateway.clone();
        }
        if update.transaction_ref.is_some() {
            payment.transaction_ref = update.transaction_ref.clone();
        }
        if update.checkout_url.is_some() {
            payment.checkout_url = update.checkout_url.clone();
        }
        if update.gateway_response.is_some() {
            payment.gateway_response = update.gateway_response.clone();
        }
        if update.failure_reason.is_some() {
            payment.failure_reason = update.failure_reason.clone();
        }
        if update.refund_reason.is_some() {
            payment.refund_reason = update.refund_reason.clone();
        }
        if update.refunded_by.is_some() {
            payment.refunded_by = update.refunded_by.clone();
        }
        if update.refunded_at.is_some() {
            payment.refunded_at = update.refunded_at;
        }
        payment.version += 1;
        payment.updated_at = Utc::now();
        let snapshot = payment.clone();

        inner.audit.push(PaymentAudit {
            id: Uuid::new_v4(),
            payment_id: id,
            from_status: Some(update.from_status),
            to_status: update.status,
            actor: update.actor.or_else(|| Some("system".to_string())),
            reason: update.reason,
            gateway_payload: update.gateway_response,
            created_at: snapshot.updated_at,
        });
        Ok(snapshot)
    }

    async fn list_audit(&self, payment_id: Uuid) -> Result<Vec<PaymentAudit>, DatabaseError> {
        let inner = self.inner.lock().map_err(|_| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: "store lock poisoned".to_string(),
            })
        })?;
        Ok(inner
            .audit
            .iter()
            .filter(|a| a.payment_id == payment_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn new_payment(key: &str) -> NewPayment {
        NewPayment {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            idempotency_key: key.to_string(),
            amount: Decimal::from(1000),
            currency: "NGN".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_starts_pending_at_version_one() {
        let store = InMemoryPaymentStore::new();
        let payment = store.insert(new_payment("k1")).await.unwrap();
        assert_eq!(payment.status, "PENDING");
        assert_eq!(payment.version, 1);

        let audit = store.list_audit(payment.id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].to_status, "PENDING");
        assert_eq!(audit[0].from_status, None);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_rejected() {
        let store = InMemoryPaymentStore::new();
        store.insert(new_payment("dup")).await.unwrap();
        let err = store.insert(new_payment("dup")).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = InMemoryPaymentStore::new();
        let payment = store.insert(new_payment("k2")).await.unwrap();

        let update = PaymentUpdate {
            status: "SUCCESS".to_string(),
            from_status: "PENDING".to_string(),
            ..Default::default()
        };
        let updated = store
            .update_status(payment.id, payment.version, update.clone())
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        // Same expected_version again loses the race
        let err = store
            .update_status(payment.id, payment.version, update)
            .await
            .unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[tokio::test]
    async fn gateway_is_set_once_and_never_changes() {
        let store = InMemoryPaymentStore::new();
        let payment = store.insert(new_payment("k4")).await.unwrap();
        assert_eq!(payment.gateway, None);

        let updated = store
            .update_status(
                payment.id,
                1,
                PaymentUpdate {
                    status: "PENDING".to_string(),
                    from_status: "PENDING".to_string(),
                    gateway: Some("flutterwave".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.gateway.as_deref(), Some("flutterwave"));

        let updated = store
            .update_status(
                payment.id,
                2,
                PaymentUpdate {
                    status: "SUCCESS".to_string(),
                    from_status: "PENDING".to_string(),
                    gateway: Some("paystack".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.gateway.as_deref(), Some("flutterwave"));
    }

    #[tokio::test]
    async fn audit_trail_records_transitions_in_order() {
        let store = InMemoryPaymentStore::new();
        let payment = store.insert(new_payment("k3")).await.unwrap();

        store
            .update_status(
                payment.id,
                1,
                PaymentUpdate {
                    status: "SUCCESS".to_string(),
                    from_status: "PENDING".to_string(),
                    actor: Some("webhook".to_string()),
                    gateway_response: Some(serde_json::json!({"status": "success"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let audit = store.list_audit(payment.id).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[1].from_status.as_deref(), Some("PENDING"));
        assert_eq!(audit[1].to_status, "SUCCESS");
        assert_eq!(audit[1].actor.as_deref(), Some("webhook"));
        assert_eq!(
            audit[1].gateway_payload,
            Some(serde_json::json!({"status": "success"}))
        );
    }
}
