//! Cart Aggregate
//!
//! Pure line-item rules shared by every cart store adapter and by the
//! optimistic client view. Item-set changes bump `version`. A store persists
//! a change through [`Cart::commit`], which writes the items together with the
//! total priced from them, and only onto the version the change was read at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{CartId, CartItemId, Money, OwnerId, ProductId};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    id: CartId,
    owner_id: OwnerId,
    items: Vec<CartItem>,
    total_amount: Money,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: CartItemId,
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A requested line in a full item replacement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Stored state of a cart, used by adapters to rebuild the aggregate.
#[derive(Clone, Debug)]
pub struct CartParts {
    pub id: CartId,
    pub owner_id: OwnerId,
    pub items: Vec<CartItem>,
    pub total_amount: Money,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Effect of a quantity change on a single line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuantityChange {
    Added { item_id: CartItemId, quantity: u32 },
    Updated { item_id: CartItemId, quantity: u32 },
    Removed { item_id: CartItemId },
    Unchanged,
}

impl Cart {
    pub fn new(owner_id: OwnerId, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: CartId::new(), owner_id, items: vec![], total_amount: Money::zero(currency),
            version: 0, created_at: now, updated_at: now,
        }
    }

    pub fn from_parts(parts: CartParts) -> Self {
        Self {
            id: parts.id, owner_id: parts.owner_id, items: parts.items, total_amount: parts.total_amount,
            version: parts.version, created_at: parts.created_at, updated_at: parts.updated_at,
        }
    }

    pub fn id(&self) -> CartId { self.id }
    pub fn owner_id(&self) -> &OwnerId { &self.owner_id }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn total_amount(&self) -> &Money { &self.total_amount }
    pub fn currency(&self) -> &str { self.total_amount.currency() }
    pub fn version(&self) -> u64 { self.version }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn item_for(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    pub fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.item_for(product_id).map_or(0, |i| i.quantity)
    }

    pub fn product_ids(&self) -> Vec<ProductId> { self.items.iter().map(|i| i.product_id).collect() }

    /// Adds `qty` to the line for `product_id`, appending a line if none exists.
    pub fn add_or_increment(&mut self, product_id: ProductId, qty: u32) -> Result<QuantityChange, CartError> {
        if qty == 0 { return Err(CartError::InvalidQuantity); }
        Ok(self.adjust(product_id, i64::from(qty)))
    }

    /// Applies a signed quantity delta. A line driven to zero or below is
    /// removed; a non-positive delta on an absent line is a no-op.
    pub fn adjust(&mut self, product_id: ProductId, delta: i64) -> QuantityChange {
        if delta == 0 { return QuantityChange::Unchanged; }
        let change = match self.items.iter().position(|i| i.product_id == product_id) {
            Some(idx) => {
                let item = &mut self.items[idx];
                let next = i64::from(item.quantity).saturating_add(delta);
                if next <= 0 {
                    let removed = self.items.remove(idx);
                    QuantityChange::Removed { item_id: removed.id }
                } else {
                    item.quantity = clamp_quantity(next);
                    QuantityChange::Updated { item_id: item.id, quantity: item.quantity }
                }
            }
            None if delta > 0 => {
                let item = CartItem { id: CartItemId::new(), product_id, quantity: clamp_quantity(delta) };
                let change = QuantityChange::Added { item_id: item.id, quantity: item.quantity };
                self.items.push(item);
                change
            }
            None => QuantityChange::Unchanged,
        };
        if change != QuantityChange::Unchanged { self.touch(); }
        change
    }

    /// Removes a line by identity. Returns whether a line was removed.
    pub fn remove_item(&mut self, item_id: CartItemId) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.id != item_id);
        let removed = self.items.len() != before;
        if removed { self.touch(); }
        removed
    }

    /// Removes the line for a product. Returns whether a line was removed.
    pub fn remove_product(&mut self, product_id: ProductId) -> bool {
        match self.item_for(product_id).map(|i| i.id) {
            Some(item_id) => self.remove_item(item_id),
            None => false,
        }
    }

    /// Replaces the whole item list. Duplicate products are merged in order
    /// of first appearance, zero quantities dropped, and lines for products
    /// already in the cart keep their identity.
    pub fn replace_items(&mut self, lines: &[CartLine]) {
        let mut next: Vec<CartItem> = Vec::with_capacity(lines.len());
        for line in lines {
            if let Some(existing) = next.iter_mut().find(|i| i.product_id == line.product_id) {
                existing.quantity = existing.quantity.saturating_add(line.quantity);
            } else {
                let id = self.item_for(line.product_id).map_or_else(CartItemId::new, |i| i.id);
                next.push(CartItem { id, product_id: line.product_id, quantity: line.quantity });
            }
        }
        next.retain(|i| i.quantity > 0);
        self.items = next;
        self.touch();
    }

    /// Empties the cart and resets the cached total.
    pub fn clear(&mut self) {
        self.items.clear();
        self.total_amount = Money::zero(self.total_amount.currency());
        self.touch();
    }

    /// Replaces items and cached total in one step, provided the cart is
    /// still at `expected_version`. The version becomes `expected_version + 1`.
    pub fn commit(&mut self, expected_version: u64, items: Vec<CartItem>, total: Money) -> Result<(), CartError> {
        if expected_version != self.version {
            return Err(CartError::VersionConflict { expected: expected_version, actual: self.version });
        }
        self.items = items;
        self.total_amount = total;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

fn clamp_quantity(value: i64) -> u32 { u32::try_from(value).unwrap_or(u32::MAX) }

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    #[error("quantity must be at least 1")]
    InvalidQuantity,
    #[error("cart moved from version {expected} to {actual}")]
    VersionConflict { expected: u64, actual: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart() -> Cart { Cart::new(OwnerId::new("buyer-1").unwrap(), "USD") }

    #[test]
    fn test_add_merges_same_product() {
        let mut cart = cart();
        let p1 = ProductId::new();
        cart.add_or_increment(p1, 2).unwrap();
        cart.add_or_increment(p1, 1).unwrap();
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.items()[0].quantity, 3); // Merged
        assert_eq!(cart.version(), 2);
    }

    #[test]
    fn test_add_rejects_zero() {
        let mut cart = cart();
        assert_eq!(cart.add_or_increment(ProductId::new(), 0), Err(CartError::InvalidQuantity));
        assert_eq!(cart.version(), 0);
    }

    #[test]
    fn test_negative_delta_removes_line() {
        let mut cart = cart();
        let p1 = ProductId::new();
        cart.add_or_increment(p1, 2).unwrap();
        let change = cart.adjust(p1, -5);
        assert!(matches!(change, QuantityChange::Removed { .. }));
        assert!(cart.is_empty());
        assert_eq!(cart.adjust(p1, -1), QuantityChange::Unchanged);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut cart = cart();
        let version = cart.version();
        assert!(!cart.remove_item(CartItemId::new()));
        assert!(!cart.remove_product(ProductId::new()));
        assert_eq!(cart.version(), version);
    }

    #[test]
    fn test_replace_keeps_line_identity() {
        let mut cart = cart();
        let (p1, p2, p3) = (ProductId::new(), ProductId::new(), ProductId::new());
        cart.add_or_increment(p1, 1).unwrap();
        cart.add_or_increment(p2, 1).unwrap();
        let p1_line = cart.items()[0].id;
        cart.replace_items(&[
            CartLine { product_id: p3, quantity: 1 },
            CartLine { product_id: p1, quantity: 4 },
            CartLine { product_id: p3, quantity: 2 },
            CartLine { product_id: p2, quantity: 0 },
        ]);
        assert_eq!(cart.product_ids(), vec![p3, p1]);
        assert_eq!(cart.quantity_of(p3), 3);
        assert_eq!(cart.item_for(p1).unwrap().id, p1_line);
    }

    #[test]
    fn test_commit_only_applies_to_read_version() {
        let mut stored = cart();
        let mut edit = stored.clone();
        edit.add_or_increment(ProductId::new(), 1).unwrap();

        stored.add_or_increment(ProductId::new(), 1).unwrap(); // concurrent writer
        let read_at = 0;
        assert_eq!(
            stored.commit(read_at, edit.items().to_vec(), Money::from_minor(100, "USD")),
            Err(CartError::VersionConflict { expected: 0, actual: 1 })
        );
        assert_eq!(stored.item_count(), 1);

        stored.commit(stored.version(), edit.items().to_vec(), Money::from_minor(200, "USD")).unwrap();
        assert_eq!(stored.items(), edit.items());
        assert_eq!(stored.total_amount(), &Money::from_minor(200, "USD"));
        assert_eq!(stored.version(), 2);
    }

    #[test]
    fn test_clear_resets_total() {
        let mut cart = cart();
        let mut edit = cart.clone();
        edit.add_or_increment(ProductId::new(), 1).unwrap();
        cart.commit(0, edit.items().to_vec(), Money::from_minor(1000, "USD")).unwrap();
        cart.clear();
        assert!(cart.is_empty());
        assert!(cart.total_amount().is_zero());
    }
}
