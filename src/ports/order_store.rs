//! Port for order persistence.

use async_trait::async_trait;

use crate::domain::{Order, OrderId, OwnerId};

/// Errors raised by order store adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderStoreError {
    #[error("order {order_id} not found")]
    NotFound { order_id: OrderId },
    #[error("an order already exists for idempotency key {key}")]
    DuplicateIdempotencyKey { key: String },
    #[error("order {order_id} changed concurrently (expected version {expected})")]
    VersionConflict { order_id: OrderId, expected: u64 },
    #[error("order store connection failed: {message}")]
    Connection { message: String },
    #[error("order store query failed: {message}")]
    Query { message: String },
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order. Fails with `DuplicateIdempotencyKey` when the
    /// owner already has an order under the same key.
    async fn insert(&self, order: &Order) -> Result<(), OrderStoreError>;

    async fn find_by_id(&self, order_id: OrderId) -> Result<Option<Order>, OrderStoreError>;

    async fn find_by_idempotency_key(&self, owner: &OwnerId, key: &str) -> Result<Option<Order>, OrderStoreError>;

    /// Orders newest first, optionally restricted to one owner.
    async fn list(&self, owner: Option<&OwnerId>) -> Result<Vec<Order>, OrderStoreError>;

    /// Overwrites the order if it is still at `expected_version` and returns
    /// the new version.
    async fn update(&self, order: &Order, expected_version: u64) -> Result<u64, OrderStoreError>;

    /// Returns whether an order was deleted.
    async fn delete(&self, order_id: OrderId) -> Result<bool, OrderStoreError>;
}
