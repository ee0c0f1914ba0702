//! Domain events
use serde::Serialize;

use crate::domain::aggregates::{OrderStatus, PaymentStatus};
use crate::domain::value_objects::{CartId, Money, OrderId, OwnerId};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "aggregate", content = "event")]
pub enum DomainEvent {
    Cart(CartEvent),
    Order(OrderEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum CartEvent {
    ItemsChanged { cart_id: CartId, owner_id: OwnerId, version: u64, total: Money },
    Cleared { cart_id: CartId, owner_id: OwnerId },
    ClearFailed { cart_id: CartId, order_id: OrderId, reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum OrderEvent {
    Placed { order_id: OrderId, owner_id: OwnerId, cart_id: CartId, total: Money },
    StatusChanged { order_id: OrderId, from: OrderStatus, to: OrderStatus },
    PaymentStatusChanged { order_id: OrderId, from: PaymentStatus, to: PaymentStatus },
    Deleted { order_id: OrderId },
}

impl DomainEvent {
    /// Subject suffix used when publishing, e.g. `order.placed`.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Cart(CartEvent::ItemsChanged { .. }) => "cart.items_changed",
            Self::Cart(CartEvent::Cleared { .. }) => "cart.cleared",
            Self::Cart(CartEvent::ClearFailed { .. }) => "cart.clear_failed",
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::StatusChanged { .. }) => "order.status_changed",
            Self::Order(OrderEvent::PaymentStatusChanged { .. }) => "order.payment_status_changed",
            Self::Order(OrderEvent::Deleted { .. }) => "order.deleted",
        }
    }
}
