//! Client-side cart view.
//!
//! [`OptimisticCart`] shows a mutation locally before the server confirms
//! it and reconciles against the authoritative cart afterwards. The server is
//! reached through [`CartBackend`], implemented here for [`CartService`] and
//! by any remote transport.

mod optimistic;

pub use optimistic::{OptimisticCart, SyncState};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Cart, CartItemId, CartLine, OwnerId, ProductId};
use crate::services::{CartService, CartView};
use crate::{Error, Result};

/// A cart change as issued by the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum CartMutation {
    Add { product_id: ProductId, quantity: u32 },
    Adjust { product_id: ProductId, delta: i64 },
    RemoveItem { item_id: CartItemId },
    RemoveProduct { product_id: ProductId },
    Replace { lines: Vec<CartLine> },
    Clear,
}

impl CartMutation {
    /// Applies the item change to a local copy. Totals are left to the server.
    pub fn apply_local(&self, cart: &mut Cart) -> Result<()> {
        match self {
            Self::Add { product_id, quantity } => {
                cart.add_or_increment(*product_id, *quantity).map_err(|e| Error::Validation(e.to_string()))?;
            }
            Self::Adjust { product_id, delta } => {
                cart.adjust(*product_id, *delta);
            }
            Self::RemoveItem { item_id } => {
                cart.remove_item(*item_id);
            }
            Self::RemoveProduct { product_id } => {
                cart.remove_product(*product_id);
            }
            Self::Replace { lines } if lines.is_empty() => cart.clear(),
            Self::Replace { lines } => cart.replace_items(lines),
            Self::Clear => cart.clear(),
        }
        Ok(())
    }
}

/// Authoritative cart source for the optimistic client.
#[async_trait]
pub trait CartBackend: Send + Sync {
    async fn fetch(&self, owner: &OwnerId) -> Result<Option<CartView>>;

    async fn send(&self, owner: &OwnerId, mutation: &CartMutation) -> Result<CartView>;
}

#[async_trait]
impl CartBackend for CartService {
    async fn fetch(&self, owner: &OwnerId) -> Result<Option<CartView>> { self.get_cart(owner).await }

    async fn send(&self, owner: &OwnerId, mutation: &CartMutation) -> Result<CartView> {
        match mutation {
            CartMutation::Add { product_id, quantity } => self.add_or_increment(owner, *product_id, *quantity).await,
            CartMutation::Adjust { product_id, delta } => self.set_quantity(owner, *product_id, *delta).await,
            CartMutation::RemoveItem { item_id } => self.remove_item(owner, *item_id).await,
            CartMutation::RemoveProduct { product_id } => self.remove_product(owner, *product_id).await,
            CartMutation::Replace { lines } => self.replace_items(owner, lines).await,
            CartMutation::Clear => self.clear(owner).await,
        }
    }
}
