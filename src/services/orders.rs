//! Order Conversion Service
//!
//! Checkout freezes a cart into an order: check the cart, price once,
//! validate against that price, persist, then clear the checked-out lines. The order is the commit point. A cart that cannot be
//! cleared afterwards is reported, never rolled back into the order.

use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};

use super::{clear_backoff, CartService};
use crate::domain::{
    Cart, CartEvent, CartId, DeliveryAddress, DomainEvent, NewOrder, Order, OrderEvent, OrderId, OrderPatch, OwnerId,
    PaymentRequest,
};
use crate::ports::{EventPublisher, OrderStore, OrderStoreError};
use crate::{Error, Result};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub cart_id: CartId,
    #[serde(default)]
    pub delivery_address: DeliveryAddress,
    pub payment_details: PaymentRequest,
    /// Taken from the `Idempotency-Key` header, not the body.
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutOutcome {
    pub order: Order,
    pub cart_cleared: bool,
    /// True when an earlier order with the same idempotency key was returned.
    pub replayed: bool,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct OrderService {
    carts: CartService,
    orders: Arc<dyn OrderStore>,
    events: Arc<dyn EventPublisher>,
    clear_backoff: ExponentialBuilder,
}

impl OrderService {
    pub fn new(carts: CartService, orders: Arc<dyn OrderStore>, events: Arc<dyn EventPublisher>) -> Self {
        Self { carts, orders, events, clear_backoff: clear_backoff(3) }
    }

    pub fn with_clear_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.clear_backoff = backoff;
        self
    }

    #[tracing::instrument(skip_all, fields(owner_id = %owner, cart_id = %request.cart_id))]
    pub async fn create_order(&self, owner: &OwnerId, request: CheckoutRequest) -> Result<CheckoutOutcome> {
        let CheckoutRequest { cart_id, delivery_address, payment_details, idempotency_key } = request;
        let idempotency_key = idempotency_key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());

        if let Some(key) = idempotency_key.as_deref() {
            if let Some(order) = self.find_by_key(owner, key).await? {
                tracing::info!(order_id = %order.id(), "checkout replayed");
                return Ok(CheckoutOutcome::replayed(order));
            }
        }

        let cart = match self.carts.cart_by_id(cart_id).await? {
            Some(cart) if cart.owner_id() == owner => cart,
            _ => return Err(Error::CartNotFound(cart_id.to_string())),
        };
        if cart.is_empty() {
            return Err(Error::EmptyCart { cart_id });
        }

        let pricing = self.carts.totals().price(cart.items(), cart.currency()).await?;
        let total = pricing.total(cart.currency())?;

        let delivery_address = delivery_address.normalized();
        delivery_address.check().map_err(Error::Validation)?;
        let payment = payment_details.validate(&total)?;

        let mut order = Order::place(NewOrder {
            owner_id: owner.clone(),
            cart_ref: cart_id,
            items: pricing.lines,
            total_amount: total,
            delivery_address,
            payment_details: payment,
            idempotency_key: idempotency_key.clone(),
        })?;

        match self.orders.insert(&order).await {
            Ok(()) => {}
            Err(OrderStoreError::DuplicateIdempotencyKey { key }) => {
                // Lost a race with an identical request.
                if let Some(existing) = self.find_by_key(owner, &key).await? {
                    return Ok(CheckoutOutcome::replayed(existing));
                }
                return Err(Error::Conflict(format!("checkout with idempotency key {key} is already in progress")));
            }
            Err(err) => return Err(Error::order_store(format!("create order from cart {cart_id}"), err)),
        }
        tracing::info!(order_id = %order.id(), total = %order.total_amount(), "order placed");
        self.publish_all(order.take_events()).await;

        let mut warnings = vec![];
        let cart_cleared = match self.clear_with_retry(&cart).await {
            Ok(()) => true,
            Err(err) => {
                let warning = format!("order {} was placed but cart {cart_id} could not be cleared: {err}", order.id());
                tracing::warn!(order_id = %order.id(), cart_id = %cart_id, error = %err, "cart clear failed after checkout");
                self.publish(DomainEvent::Cart(CartEvent::ClearFailed {
                    cart_id,
                    order_id: order.id(),
                    reason: err.to_string(),
                }))
                .await;
                warnings.push(warning);
                false
            }
        };

        Ok(CheckoutOutcome { order, cart_cleared, replayed: false, warnings })
    }

    /// Partial update of status, comment, payment status or address.
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn update_order(&self, order_id: OrderId, patch: OrderPatch) -> Result<Order> {
        let mut order = self.get_order(order_id).await?;
        if patch.is_empty() {
            return Ok(order);
        }
        let expected = order.version();
        order.apply(patch)?;
        let version = self
            .orders
            .update(&order, expected)
            .await
            .map_err(|e| Error::order_store(format!("update order {order_id}"), e))?;
        order.set_version(version);
        tracing::info!(order_id = %order_id, status = %order.status(), version, "order updated");
        self.publish_all(order.take_events()).await;
        Ok(order)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .find_by_id(order_id)
            .await
            .map_err(|e| Error::order_store(format!("load order {order_id}"), e))?
            .ok_or(Error::OrderNotFound(order_id))
    }

    /// Newest first. `None` lists every order.
    pub async fn list_orders(&self, owner: Option<&OwnerId>) -> Result<Vec<Order>> {
        self.orders.list(owner).await.map_err(|e| Error::order_store("list orders", e))
    }

    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        let deleted = self
            .orders
            .delete(order_id)
            .await
            .map_err(|e| Error::order_store(format!("delete order {order_id}"), e))?;
        if !deleted {
            return Err(Error::OrderNotFound(order_id));
        }
        tracing::info!(order_id = %order_id, "order deleted");
        self.publish(DomainEvent::Order(OrderEvent::Deleted { order_id })).await;
        Ok(())
    }

    async fn find_by_key(&self, owner: &OwnerId, key: &str) -> Result<Option<Order>> {
        self.orders
            .find_by_idempotency_key(owner, key)
            .await
            .map_err(|e| Error::order_store(format!("look up idempotency key {key}"), e))
    }

    /// Takes the checked-out lines out of the cart. Lines added after the
    /// snapshot was read are left alone.
    async fn clear_with_retry(&self, snapshot: &Cart) -> Result<()> {
        let (carts, cart_id) = (&self.carts, snapshot.id());
        (move || async move { carts.clear_checked_out(snapshot).await.map(|_| ()) })
            .retry(self.clear_backoff)
            .when(Error::is_retryable)
            .notify(|err, delay| tracing::debug!(cart_id = %cart_id, error = %err, ?delay, "retrying cart clear"))
            .await
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in events {
            self.publish(event).await;
        }
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(err) = self.events.publish(&event).await {
            tracing::warn!(subject = event.subject(), error = %err, "failed to publish event");
        }
    }
}

impl CheckoutOutcome {
    fn replayed(order: Order) -> Self { Self { order, cart_cleared: false, replayed: true, warnings: vec![] } }
}
