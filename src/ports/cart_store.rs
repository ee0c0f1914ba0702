//! Port for cart persistence.

use async_trait::async_trait;

use crate::domain::{Cart, CartId, CartItem, Money, OwnerId};

/// Errors raised by cart store adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartStoreError {
    #[error("cart {cart_id} not found")]
    NotFound { cart_id: CartId },
    #[error("cart {cart_id} changed concurrently (expected version {expected}, found {actual})")]
    VersionConflict { cart_id: CartId, expected: u64, actual: u64 },
    #[error("cart store connection failed: {message}")]
    Connection { message: String },
    #[error("cart store query failed: {message}")]
    Query { message: String },
}

/// One cart per owner. Every change is a full item list written together
/// with the total priced from it, conditioned on the version it was read at.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn find_by_owner(&self, owner: &OwnerId) -> Result<Option<Cart>, CartStoreError>;

    async fn find_by_id(&self, cart_id: CartId) -> Result<Option<Cart>, CartStoreError>;

    /// Returns the owner's cart, creating an empty one if none exists.
    /// Concurrent callers for the same owner observe the same cart.
    async fn get_or_create(&self, owner: &OwnerId, currency: &str) -> Result<Cart, CartStoreError>;

    /// Replaces items and cached total if the cart is still at
    /// `expected_version`, bumping the version. A stale version fails with
    /// `VersionConflict` and writes nothing.
    async fn replace_items(
        &self,
        cart_id: CartId,
        expected_version: u64,
        items: &[CartItem],
        total: &Money,
    ) -> Result<Cart, CartStoreError>;
}
