//! Idempotency key reservation.
//!
//! A key is atomically bound to an order id before any gateway call is made.
//! The same (key, order) pair replays the stored payment; the same key with a
//! different order is a hard conflict. Keys expire after a configurable TTL,
//! after which a reuse is treated as a fresh request.

use crate::error::{AppError, InfrastructureError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("idempotency backend failure: {message}")]
    Backend { message: String },
}

impl From<redis::RedisError> for IdempotencyError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }
}

impl From<IdempotencyError> for AppError {
    fn from(err: IdempotencyError) -> Self {
        AppError::infrastructure(InfrastructureError::IdempotencyStore {
            message: err.to_string(),
        })
    }
}

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// Key was free and is now bound to this order.
    Acquired,
    /// Key already bound to the same order; safe to replay the stored result.
    Replay,
    /// Key bound to a different order.
    Conflict { existing_order_id: String },
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically bind `key` to `order_id` unless already bound.
    async fn try_acquire(&self, key: &str, order_id: Uuid)
        -> Result<Acquisition, IdempotencyError>;

    /// Drop a reservation so the client can retry after a failed initiation.
    async fn release(&self, key: &str) -> Result<(), IdempotencyError>;
}

fn storage_key(key: &str) -> String {
    format!("idempotency:payment:{}", key)
}

/// Redis-backed store. SET NX EX gives the atomic set-if-absent with expiry
/// in a single round trip.
pub struct RedisIdempotencyStore {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisIdempotencyStore {
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, IdempotencyError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, ttl })
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn try_acquire(
        &self,
        key: &str,
        order_id: Uuid,
    ) -> Result<Acquisition, IdempotencyError> {
        let mut conn = self.conn.clone();
        let storage_key = storage_key(key);

        let reply: Option<String> = redis::cmd("SET")
            .arg(&storage_key)
            .arg(order_id.to_string())
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await?;

        if reply.is_some() {
            debug!(key = %key, "idempotency key acquired");
            return Ok(Acquisition::Acquired);
        }

        let existing: Option<String> = redis::cmd("GET")
            .arg(&storage_key)
            .query_async(&mut conn)
            .await?;

        match existing {
            // Key expired between SET and GET; surface a conflict and let
            // the client retry against the now-free key
            None => Ok(Acquisition::Conflict {
                existing_order_id: "unknown".to_string(),
            }),
            Some(bound) if bound == order_id.to_string() => Ok(Acquisition::Replay),
            Some(bound) => Ok(Acquisition::Conflict {
                existing_order_id: bound,
            }),
        }
    }

    async fn release(&self, key: &str) -> Result<(), IdempotencyError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(storage_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// In-memory store with the same semantics, used in dev mode and tests.
pub struct InMemoryIdempotencyStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    ttl: Duration,
}

impl InMemoryIdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn try_acquire(
        &self,
        key: &str,
        order_id: Uuid,
    ) -> Result<Acquisition, IdempotencyError> {
        let mut entries = self.entries.lock().map_err(|_| IdempotencyError::Backend {
            message: "idempotency lock poisoned".to_string(),
        })?;

        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);

        match entries.get(key) {
            None => {
                entries.insert(key.to_string(), (order_id.to_string(), now + self.ttl));
                Ok(Acquisition::Acquired)
            }
            Some((bound, _)) if *bound == order_id.to_string() => Ok(Acquisition::Replay),
            Some((bound, _)) => Ok(Acquisition::Conflict {
                existing_order_id: bound.clone(),
            }),
        }
    }

    async fn release(&self, key: &str) -> Result<(), IdempotencyError> {
        let mut entries = self.entries.lock().map_err(|_| IdempotencyError::Backend {
            message: "idempotency lock poisoned".to_string(),
        })?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_acquisition_wins() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(60));
        let order = Uuid::new_v4();
        assert_eq!(
            store.try_acquire("key-1", order).await.unwrap(),
            Acquisition::Acquired
        );
    }

    #[tokio::test]
    async fn same_order_replays() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(60));
        let order = Uuid::new_v4();
        store.try_acquire("key-1", order).await.unwrap();
        assert_eq!(
            store.try_acquire("key-1", order).await.unwrap(),
            Acquisition::Replay
        );
    }

    #[tokio::test]
    async fn different_order_conflicts() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(60));
        let first = Uuid::new_v4();
        store.try_acquire("key-1", first).await.unwrap();

        let result = store.try_acquire("key-1", Uuid::new_v4()).await.unwrap();
        assert_eq!(
            result,
            Acquisition::Conflict {
                existing_order_id: first.to_string()
            }
        );
    }

    #[tokio::test]
    async fn expired_key_is_reusable() {
        let store = InMemoryIdempotencyStore::new(Duration::from_millis(10));
        let order = Uuid::new_v4();
        store.try_acquire("key-1", order).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            store.try_acquire("key-1", Uuid::new_v4()).await.unwrap(),
            Acquisition::Acquired
        );
    }

    #[tokio::test]
    async fn release_frees_the_key() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(60));
        let order = Uuid::new_v4();
        store.try_acquire("key-1", order).await.unwrap();
        store.release("key-1").await.unwrap();

        assert_eq!(
            store.try_acquire("key-1", Uuid::new_v4()).await.unwrap(),
            Acquisition::Acquired
        );
    }
}
