use crate::database::error::DatabaseError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Order snapshot as the payment core sees it. The order lifecycle itself is
/// owned elsewhere; payments only need the amount and whether it can be paid.
#[derive(Debug, Clone, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_payable(&self) -> bool {
        self.status == "AWAITING_PAYMENT"
    }
}

#[async_trait]
pub trait OrderService: Send + Sync {
    async fn find(&self, order_id: Uuid) -> Result<Option<Order>, DatabaseError>;

    async fn mark_paid(&self, order_id: Uuid) -> Result<(), DatabaseError>;

    async fn mark_refunded(&self, order_id: Uuid) -> Result<(), DatabaseError>;
}

pub struct PgOrderService {
    pool: PgPool,
}

impl PgOrderService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderService for PgOrderService {
    async fn find(&self, order_id: Uuid) -> Result<Option<Order>, DatabaseError> {
        sqlx::query_as::<_, Order>(
            "SELECT id, user_id, amount, currency, status, created_at, updated_at
             FROM orders WHERE id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn mark_paid(&self, order_id: Uuid) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'PAID', updated_at = NOW()
             WHERE id = $1 AND status = 'AWAITING_PAYMENT'",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Order", order_id));
        }
        Ok(())
    }

    async fn mark_refunded(&self, order_id: Uuid) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'REFUNDED', updated_at = NOW()
             WHERE id = $1 AND status = 'PAID'",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Order", order_id));
        }
        Ok(())
    }
}

/// In-memory order service for dev mode and tests.
#[derive(Default)]
pub struct InMemoryOrderService {
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl InMemoryOrderService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, order: Order) {
        if let Ok(mut orders) = self.orders.lock() {
            orders.insert(order.id, order);
        }
    }

    pub fn seed_payable(&self, amount: Decimal, currency: &str) -> Order {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount,
            currency: currency.to_string(),
            status: "AWAITING_PAYMENT".to_string(),
            created_at: now,
            updated_at: now,
        };
        self.seed(order.clone());
        order
    }
}

#[async_trait]
impl OrderService for InMemoryOrderService {
    async fn find(&self, order_id: Uuid) -> Result<Option<Order>, DatabaseError> {
        let orders = self.orders.lock().map_err(|_| {
            DatabaseError::new(crate::database::error::DatabaseErrorKind::Unknown {
                message: "order lock poisoned".to_string(),
            })
        })?;
        Ok(orders.get(&order_id).cloned())
    }

    async fn mark_paid(&self, order_id: Uuid) -> Result<(), DatabaseError> {
        let mut orders = self.orders.lock().map_err(|_| {
            DatabaseError::new(crate::database::error::DatabaseErrorKind::Unknown {
                message: "order lock poisoned".to_string(),
            })
        })?;
        match orders.get_mut(&order_id) {
            Some(order) if order.status == "AWAITING_PAYMENT" => {
                order.status = "PAID".to_string();
                order.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(DatabaseError::not_found("Order", order_id)),
        }
    }

    async fn mark_refunded(&self, order_id: Uuid) -> Result<(), DatabaseError> {
        let mut orders = self.orders.lock().map_err(|_| {
            DatabaseError::new(crate::database::error::DatabaseErrorKind::Unknown {
                message: "order lock poisoned".to_string(),
            })
        })?;
        match orders.get_mut(&order_id) {
            Some(order) if order.status == "PAID" => {
                order.status = "REFUNDED".to_string();
                order.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(DatabaseError::not_found("Order", order_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_order_is_payable_until_paid() {
        let service = InMemoryOrderService::new();
        let order = service.seed_payable(Decimal::from(5000), "NGN");
        assert!(order.is_payable());

        service.mark_paid(order.id).await.unwrap();
        let reloaded = service.find(order.id).await.unwrap().unwrap();
        assert!(!reloaded.is_payable());
        assert_eq!(reloaded.status, "PAID");
    }

    #[tokio::test]
    async fn refund_requires_paid_status() {
        let service = InMemoryOrderService::new();
        let order = service.seed_payable(Decimal::from(5000), "NGN");

        // Not paid yet, refund transition is rejected
        assert!(service.mark_refunded(order.id).await.is_err());

        service.mark_paid(order.id).await.unwrap();
        service.mark_refunded(order.id).await.unwrap();
        let reloaded = service.find(order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, "REFUNDED");
    }
}
