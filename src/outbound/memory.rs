//! In-memory adapters.
//!
//! Used by the standalone server when no database is configured and by
//! tests. Each store keeps its state behind a single `RwLock`, which
//! serialises writes the way a per-row lock does in PostgreSQL. Writes can be
//! made to fail on demand to exercise recovery paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::domain::{Cart, CartError, CartId, CartItem, DomainEvent, Money, Order, OrderId, OwnerId, Product, ProductId};
use crate::ports::{
    CartStore, CartStoreError, CatalogError, EventPublisher, OrderStore, OrderStoreError, ProductCatalog, PublishError,
};

/// Counts down injected failures; returns true when this call should fail.
fn take_failure(counter: &AtomicU32) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

// =============================================================================
// Carts
// =============================================================================

#[derive(Default)]
struct CartState {
    carts: HashMap<CartId, Cart>,
    by_owner: HashMap<OwnerId, CartId>,
}

#[derive(Default)]
pub struct InMemoryCartStore {
    state: RwLock<CartState>,
    failing_writes: AtomicU32,
}

impl InMemoryCartStore {
    pub fn new() -> Self { Self::default() }

    /// Fails the next `n` cart writes with a connection error.
    pub fn fail_next_writes(&self, n: u32) { self.failing_writes.store(n, Ordering::SeqCst); }

    pub async fn cart_count(&self) -> usize { self.state.read().await.carts.len() }

    async fn write<F>(&self, cart_id: CartId, apply: F) -> Result<Cart, CartStoreError>
    where
        F: FnOnce(&mut Cart) -> Result<(), CartStoreError> + Send,
    {
        if take_failure(&self.failing_writes) {
            return Err(CartStoreError::Connection { message: "injected write failure".into() });
        }
        let mut state = self.state.write().await;
        let cart = state.carts.get_mut(&cart_id).ok_or(CartStoreError::NotFound { cart_id })?;
        apply(cart)?;
        Ok(cart.clone())
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn find_by_owner(&self, owner: &OwnerId) -> Result<Option<Cart>, CartStoreError> {
        let state = self.state.read().await;
        Ok(state.by_owner.get(owner).and_then(|id| state.carts.get(id)).cloned())
    }

    async fn find_by_id(&self, cart_id: CartId) -> Result<Option<Cart>, CartStoreError> {
        Ok(self.state.read().await.carts.get(&cart_id).cloned())
    }

    async fn get_or_create(&self, owner: &OwnerId, currency: &str) -> Result<Cart, CartStoreError> {
        let mut state = self.state.write().await;
        if let Some(cart) = state.by_owner.get(owner).and_then(|id| state.carts.get(id)) {
            return Ok(cart.clone());
        }
        let cart = Cart::new(owner.clone(), currency);
        state.by_owner.insert(owner.clone(), cart.id());
        state.carts.insert(cart.id(), cart.clone());
        tracing::debug!(cart_id = %cart.id(), owner_id = %owner, "created cart");
        Ok(cart)
    }

    async fn replace_items(
        &self,
        cart_id: CartId,
        expected_version: u64,
        items: &[CartItem],
        total: &Money,
    ) -> Result<Cart, CartStoreError> {
        let (items, total) = (items.to_vec(), total.clone());
        self.write(cart_id, move |cart| {
            cart.commit(expected_version, items, total).map_err(|err| match err {
                CartError::VersionConflict { expected, actual } => CartStoreError::VersionConflict { cart_id, expected, actual },
                other => CartStoreError::Query { message: other.to_string() },
            })
        })
        .await
    }
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
    failing_writes: AtomicU32,
}

impl InMemoryOrderStore {
    pub fn new() -> Self { Self::default() }

    /// Fails the next `n` inserts or updates with a connection error.
    pub fn fail_next_writes(&self, n: u32) { self.failing_writes.store(n, Ordering::SeqCst); }

    pub async fn order_count(&self) -> usize { self.orders.read().await.len() }

    fn check_write(&self) -> Result<(), OrderStoreError> {
        if take_failure(&self.failing_writes) {
            return Err(OrderStoreError::Connection { message: "injected write failure".into() });
        }
        Ok(())
    }
}

fn stored_copy(order: &Order, version: u64) -> Order {
    let mut stored = order.clone();
    stored.take_events();
    stored.set_version(version);
    stored
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), OrderStoreError> {
        self.check_write()?;
        let mut orders = self.orders.write().await;
        if let Some(key) = order.idempotency_key() {
            let taken = orders.values().any(|o| o.owner_id() == order.owner_id() && o.idempotency_key() == Some(key));
            if taken {
                return Err(OrderStoreError::DuplicateIdempotencyKey { key: key.to_string() });
            }
        }
        orders.insert(order.id(), stored_copy(order, order.version()));
        Ok(())
    }

    async fn find_by_id(&self, order_id: OrderId) -> Result<Option<Order>, OrderStoreError> {
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn find_by_idempotency_key(&self, owner: &OwnerId, key: &str) -> Result<Option<Order>, OrderStoreError> {
        let orders = self.orders.read().await;
        Ok(orders.values().find(|o| o.owner_id() == owner && o.idempotency_key() == Some(key)).cloned())
    }

    async fn list(&self, owner: Option<&OwnerId>) -> Result<Vec<Order>, OrderStoreError> {
        let orders = self.orders.read().await;
        let mut listed: Vec<Order> = orders.values().filter(|o| owner.map_or(true, |id| o.owner_id() == id)).cloned().collect();
        listed.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then_with(|| b.id().cmp(&a.id())));
        Ok(listed)
    }

    async fn update(&self, order: &Order, expected_version: u64) -> Result<u64, OrderStoreError> {
        self.check_write()?;
        let mut orders = self.orders.write().await;
        let current = orders.get(&order.id()).ok_or(OrderStoreError::NotFound { order_id: order.id() })?;
        if current.version() != expected_version {
            return Err(OrderStoreError::VersionConflict { order_id: order.id(), expected: expected_version });
        }
        let version = expected_version + 1;
        orders.insert(order.id(), stored_copy(order, version));
        Ok(version)
    }

    async fn delete(&self, order_id: OrderId) -> Result<bool, OrderStoreError> {
        self.check_write()?;
        Ok(self.orders.write().await.remove(&order_id).is_some())
    }
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
    lookups: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryCatalog {
    pub fn new() -> Self { Self::default() }

    pub async fn insert(&self, product: Product) { self.products.write().await.insert(product.id(), product); }

    pub async fn remove(&self, product_id: ProductId) -> Option<Product> { self.products.write().await.remove(&product_id) }

    /// Changes a product's price, as the seller would through the catalog.
    pub async fn set_price(&self, product_id: ProductId, price: Money) -> bool {
        match self.products.write().await.get_mut(&product_id) {
            Some(product) => {
                product.update_price(price);
                true
            }
            None => false,
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) { self.unavailable.store(unavailable, Ordering::SeqCst); }

    /// Number of batch lookups served so far.
    pub fn lookups(&self) -> usize { self.lookups.load(Ordering::SeqCst) }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn get_products_by_ids(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>, CatalogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable { message: "catalog offline".into() });
        }
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let products = self.products.read().await;
        Ok(ids.iter().filter_map(|id| products.get(id).map(|p| (*id, p.clone()))).collect())
    }
}

// =============================================================================
// Events
// =============================================================================

/// Publisher that keeps every event in memory.
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<DomainEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self { Self::default() }

    pub async fn events(&self) -> Vec<DomainEvent> { self.events.lock().await.clone() }

    pub async fn subjects(&self) -> Vec<&'static str> { self.events.lock().await.iter().map(DomainEvent::subject).collect() }
}

#[async_trait]
impl EventPublisher for MemoryEventLog {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
