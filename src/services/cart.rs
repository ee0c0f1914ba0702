//! Cart Mutation Service
//!
//! A mutation is applied to a copy of the cart as read, the resulting lines
//! are priced, and items and total are written together on the version that
//! was read. A concurrent writer moves the version, so the loser re-reads and
//! applies its change again. Nothing is written when pricing fails, so an
//! error always means the cart is as it was.

use std::sync::Arc;

use backon::{BackoffBuilder, ExponentialBuilder};
use serde::Serialize;

use super::{write_backoff, TotalAggregator};
use crate::domain::{Cart, CartEvent, CartId, CartItemId, CartLine, DomainEvent, OwnerId, ProductId};
use crate::ports::{CartStore, CartStoreError, EventPublisher};
use crate::{Error, Result};

/// A cart as returned to callers, with lines whose product no longer
/// resolves flagged in `unavailable`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    #[serde(flatten)]
    pub cart: Cart,
    pub unavailable: Vec<ProductId>,
}

impl CartView {
    fn settled(cart: Cart) -> Self { Self { cart, unavailable: vec![] } }
}

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn CartStore>,
    totals: TotalAggregator,
    events: Arc<dyn EventPublisher>,
    currency: String,
    write_backoff: ExponentialBuilder,
}

impl CartService {
    pub fn new(store: Arc<dyn CartStore>, totals: TotalAggregator, events: Arc<dyn EventPublisher>, currency: &str) -> Self {
        Self { store, totals, events, currency: currency.to_uppercase(), write_backoff: write_backoff(5) }
    }

    pub fn with_write_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.write_backoff = backoff;
        self
    }

    pub fn totals(&self) -> &TotalAggregator { &self.totals }

    pub fn currency(&self) -> &str { &self.currency }

    pub async fn cart_by_id(&self, cart_id: CartId) -> Result<Option<Cart>> {
        self.store.find_by_id(cart_id).await.map_err(|e| Error::cart_store(format!("load cart {cart_id}"), e))
    }

    /// The owner's cart, or `None` if they never added anything.
    #[tracing::instrument(skip_all, fields(owner_id = %owner))]
    pub async fn get_cart(&self, owner: &OwnerId) -> Result<Option<CartView>> {
        let cart = self
            .store
            .find_by_owner(owner)
            .await
            .map_err(|e| Error::cart_store(format!("load cart for {owner}"), e))?;
        let Some(cart) = cart else { return Ok(None) };
        if cart.is_empty() {
            return Ok(Some(CartView::settled(cart)));
        }
        // A catalog outage should not hide the cart; the cached total still stands.
        let unavailable = match self.totals.price(cart.items(), cart.currency()).await {
            Ok(pricing) => pricing.missing,
            Err(err) => {
                tracing::warn!(cart_id = %cart.id(), error = %err, "could not check cart lines against the catalog");
                vec![]
            }
        };
        Ok(Some(CartView { cart, unavailable }))
    }

    /// Adds `qty` of a product, creating the cart on first use.
    #[tracing::instrument(skip_all, fields(owner_id = %owner, product_id = %product_id, qty = qty))]
    pub async fn add_or_increment(&self, owner: &OwnerId, product_id: ProductId, qty: u32) -> Result<CartView> {
        if qty == 0 {
            return Err(Error::Validation("quantity must be at least 1".into()));
        }
        self.totals.verify_products(&[product_id], &self.currency).await?;
        let cart = self.cart_for(owner).await?;
        let context = format!("add product {product_id} to cart {}", cart.id());
        self.commit(cart, &context, move |cart| {
            cart.add_or_increment(product_id, qty).map_err(|e| Error::Validation(e.to_string()))?;
            Ok(())
        })
        .await
    }

    /// Changes a line's quantity by `delta`. Lines reaching zero are removed.
    #[tracing::instrument(skip_all, fields(owner_id = %owner, product_id = %product_id, delta = delta))]
    pub async fn set_quantity(&self, owner: &OwnerId, product_id: ProductId, delta: i64) -> Result<CartView> {
        let cart = self.cart_for(owner).await?;
        let context = format!("adjust product {product_id} in cart {}", cart.id());
        self.commit(cart, &context, move |cart| {
            cart.adjust(product_id, delta);
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip_all, fields(owner_id = %owner, item_id = %item_id))]
    pub async fn remove_item(&self, owner: &OwnerId, item_id: CartItemId) -> Result<CartView> {
        let cart = self.cart_for(owner).await?;
        let context = format!("remove item {item_id} from cart {}", cart.id());
        self.commit(cart, &context, move |cart| {
            cart.remove_item(item_id);
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip_all, fields(owner_id = %owner, product_id = %product_id))]
    pub async fn remove_product(&self, owner: &OwnerId, product_id: ProductId) -> Result<CartView> {
        let cart = self.cart_for(owner).await?;
        let context = format!("remove product {product_id} from cart {}", cart.id());
        self.commit(cart, &context, move |cart| {
            cart.remove_product(product_id);
            Ok(())
        })
        .await
    }

    /// Replaces every line. All products are checked before anything is written.
    #[tracing::instrument(skip_all, fields(owner_id = %owner, lines = lines.len()))]
    pub async fn replace_items(&self, owner: &OwnerId, lines: &[CartLine]) -> Result<CartView> {
        let mut ids: Vec<ProductId> = lines.iter().filter(|l| l.quantity > 0).map(|l| l.product_id).collect();
        ids.sort();
        ids.dedup();
        self.totals.verify_products(&ids, &self.currency).await?;
        let cart = self.cart_for(owner).await?;
        let context = format!("replace items in cart {}", cart.id());
        let lines = lines.to_vec();
        self.commit(cart, &context, move |cart| {
            cart.replace_items(&lines);
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip_all, fields(owner_id = %owner))]
    pub async fn clear(&self, owner: &OwnerId) -> Result<CartView> {
        let cart = self.cart_for(owner).await?;
        self.clear_cart(cart.id()).await.map(CartView::settled)
    }

    /// Empties a cart by id and resets its total to zero.
    #[tracing::instrument(skip_all, fields(cart_id = %cart_id))]
    pub async fn clear_cart(&self, cart_id: CartId) -> Result<Cart> {
        let cart = self.load(cart_id).await?;
        let view = self.commit(cart, &format!("clear cart {cart_id}"), |cart| {
            cart.clear();
            Ok(())
        })
        .await?;
        tracing::info!(cart_id = %cart_id, "cart cleared");
        self.publish(DomainEvent::Cart(CartEvent::Cleared { cart_id, owner_id: view.cart.owner_id().clone() })).await;
        Ok(view.cart)
    }

    /// Removes the lines an order was placed from. If the cart is still at
    /// the snapshot's version it is emptied; otherwise each snapshot line's
    /// quantity is taken off, so anything added since checkout read the cart
    /// stays.
    #[tracing::instrument(skip_all, fields(cart_id = %snapshot.id(), version = snapshot.version()))]
    pub async fn clear_checked_out(&self, snapshot: &Cart) -> Result<Cart> {
        let cart_id = snapshot.id();
        let cart = self.load(cart_id).await?;
        let (version, checked_out) = (snapshot.version(), snapshot.items().to_vec());
        let view = self
            .commit(cart, &format!("clear checked-out lines from cart {cart_id}"), move |cart| {
                if cart.version() == version {
                    cart.clear();
                } else {
                    for item in &checked_out {
                        cart.adjust(item.product_id, -i64::from(item.quantity));
                    }
                }
                Ok(())
            })
            .await?;
        if view.cart.is_empty() {
            tracing::info!(cart_id = %cart_id, "cart cleared");
            self.publish(DomainEvent::Cart(CartEvent::Cleared { cart_id, owner_id: view.cart.owner_id().clone() })).await;
        } else {
            tracing::info!(cart_id = %cart_id, remaining = view.cart.item_count(), "kept lines added after checkout");
        }
        Ok(view.cart)
    }

    async fn cart_for(&self, owner: &OwnerId) -> Result<Cart> {
        self.store
            .get_or_create(owner, &self.currency)
            .await
            .map_err(|e| Error::cart_store(format!("open cart for {owner}"), e))
    }

    async fn load(&self, cart_id: CartId) -> Result<Cart> {
        self.cart_by_id(cart_id).await?.ok_or_else(|| Error::CartNotFound(cart_id.to_string()))
    }

    /// Applies `change` to a copy of `current`, prices the resulting lines and
    /// writes items and total on the version that was read. On a version
    /// conflict the cart is re-read and `change` applied again.
    async fn commit<F>(&self, mut current: Cart, context: &str, change: F) -> Result<CartView>
    where
        F: Fn(&mut Cart) -> Result<()> + Send + Sync,
    {
        let cart_id = current.id();
        let mut backoff = self.write_backoff.build();
        loop {
            let mut next = current.clone();
            change(&mut next)?;
            if next.items() == current.items() {
                return Ok(CartView::settled(current));
            }
            let pricing = self.totals.price(next.items(), next.currency()).await?;
            if let Some(&product_id) = pricing.missing.first() {
                tracing::warn!(cart_id = %cart_id, product_id = %product_id, "cart line references an unknown product; change not saved");
                return Err(Error::ProductNotFound { product_id });
            }
            let total = pricing.total(next.currency())?;
            match self.store.replace_items(cart_id, current.version(), next.items(), &total).await {
                Ok(stored) => return Ok(self.announce(stored).await),
                Err(CartStoreError::VersionConflict { expected, actual, .. }) => {
                    let Some(delay) = backoff.next() else {
                        return Err(Error::Conflict(format!("{context}: cart kept changing")));
                    };
                    tracing::debug!(cart_id = %cart_id, expected, actual, ?delay, "cart moved on; applying change again");
                    tokio::time::sleep(delay).await;
                    current = self.load(cart_id).await?;
                }
                Err(err) => return Err(Error::cart_store(context.to_string(), err)),
            }
        }
    }

    async fn announce(&self, cart: Cart) -> CartView {
        self.publish(DomainEvent::Cart(CartEvent::ItemsChanged {
            cart_id: cart.id(),
            owner_id: cart.owner_id().clone(),
            version: cart.version(),
            total: cart.total_amount().clone(),
        }))
        .await;
        CartView::settled(cart)
    }

    pub(crate) async fn publish(&self, event: DomainEvent) {
        if let Err(err) = self.events.publish(&event).await {
            tracing::warn!(subject = event.subject(), error = %err, "failed to publish event");
        }
    }
}
