//! Order Aggregate
//!
//! An order is a frozen snapshot of a cart at checkout. Its items and total
//! never change after creation; only status, comment, payment status and
//! delivery address move through [`Order::apply`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::domain::aggregates::payment::{PaymentDetails, PaymentPatch, PaymentStatus};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{CartId, Money, OrderId, OwnerId, ProductId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: OrderId,
    owner_id: OwnerId,
    cart_ref: CartId,
    items: Vec<OrderItem>,
    total_amount: Money,
    delivery_address: DeliveryAddress,
    payment_details: PaymentDetails,
    status: OrderStatus,
    comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<String>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

/// Snapshot of a cart line with the product details resolved at checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveryAddress {
    #[validate(length(min = 1, message = "fullName is required"))]
    pub full_name: String,
    #[validate(length(min = 1, message = "address is required"))]
    pub address: String,
    #[validate(length(min = 1, message = "city is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "country is required"))]
    pub country: String,
    #[validate(length(min = 1, max = 32, message = "phone is required"))]
    pub phone: String,
}

impl DeliveryAddress {
    /// Trims every field so blank input fails validation.
    pub fn normalized(self) -> Self {
        Self {
            full_name: self.full_name.trim().to_string(),
            address: self.address.trim().to_string(),
            city: self.city.trim().to_string(),
            country: self.country.trim().to_string(),
            phone: self.phone.trim().to_string(),
        }
    }

    /// Names the first missing field, in declaration order.
    pub fn check(&self) -> Result<(), String> {
        let Err(errors) = self.validate() else { return Ok(()) };
        let fields = errors.field_errors();
        for name in ["full_name", "address", "city", "country", "phone"] {
            if let Some(first) = fields.get(name).and_then(|errs| errs.first()) {
                return Err(first.message.as_ref().map_or_else(|| format!("{name} is invalid"), |m| m.to_string()));
            }
        }
        Err(errors.to_string())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    #[default]
    Pending,
    Shipped,
    Delivered,
    Cancelled,
    Discrepancy,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Shipped => "Shipped",
            Self::Delivered => "Delivered",
            Self::Cancelled => "Cancelled",
            Self::Discrepancy => "Discrepancy",
        }
    }

    pub fn is_terminal(self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    /// Re-applying the current status is always allowed.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if self == next { return true; }
        matches!(
            (self, next),
            (Pending, Shipped)
                | (Shipped, Delivered)
                | (Pending, Cancelled)
                | (Pending, Discrepancy)
                | (Shipped, Discrepancy)
                | (Discrepancy, Shipped)
                | (Discrepancy, Delivered)
                | (Discrepancy, Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Shipped" => Ok(Self::Shipped),
            "Delivered" => Ok(Self::Delivered),
            "Cancelled" => Ok(Self::Cancelled),
            "Discrepancy" => Ok(Self::Discrepancy),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Partial order update. Absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub comment: Option<String>,
    pub payment_details: Option<PaymentPatch>,
    pub delivery_address: Option<DeliveryAddress>,
}

impl OrderPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.comment.is_none() && self.payment_details.is_none() && self.delivery_address.is_none()
    }
}

/// Everything needed to place an order from a validated checkout.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub owner_id: OwnerId,
    pub cart_ref: CartId,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub delivery_address: DeliveryAddress,
    pub payment_details: PaymentDetails,
    pub idempotency_key: Option<String>,
}

/// Stored state of an order, used by adapters to rebuild the aggregate.
#[derive(Clone, Debug)]
pub struct OrderParts {
    pub id: OrderId,
    pub owner_id: OwnerId,
    pub cart_ref: CartId,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub delivery_address: DeliveryAddress,
    pub payment_details: PaymentDetails,
    pub status: OrderStatus,
    pub comment: Option<String>,
    pub idempotency_key: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn place(new: NewOrder) -> Result<Self, OrderError> {
        if new.items.is_empty() { return Err(OrderError::NoItems); }
        let id = OrderId::new();
        let now = Utc::now();
        let mut order = Self {
            id, owner_id: new.owner_id, cart_ref: new.cart_ref, items: new.items, total_amount: new.total_amount,
            delivery_address: new.delivery_address, payment_details: new.payment_details, status: OrderStatus::Pending,
            comment: None, idempotency_key: new.idempotency_key, version: 0, created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed {
            order_id: id,
            owner_id: order.owner_id.clone(),
            cart_id: order.cart_ref,
            total: order.total_amount.clone(),
        }));
        Ok(order)
    }

    pub fn from_parts(parts: OrderParts) -> Self {
        Self {
            id: parts.id, owner_id: parts.owner_id, cart_ref: parts.cart_ref, items: parts.items,
            total_amount: parts.total_amount, delivery_address: parts.delivery_address,
            payment_details: parts.payment_details, status: parts.status, comment: parts.comment,
            idempotency_key: parts.idempotency_key, version: parts.version, created_at: parts.created_at,
            updated_at: parts.updated_at, events: vec![],
        }
    }

    pub fn id(&self) -> OrderId { self.id }
    pub fn owner_id(&self) -> &OwnerId { &self.owner_id }
    pub fn cart_ref(&self) -> CartId { self.cart_ref }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn total_amount(&self) -> &Money { &self.total_amount }
    pub fn delivery_address(&self) -> &DeliveryAddress { &self.delivery_address }
    pub fn payment_details(&self) -> &PaymentDetails { &self.payment_details }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn comment(&self) -> Option<&str> { self.comment.as_deref() }
    pub fn idempotency_key(&self) -> Option<&str> { self.idempotency_key.as_deref() }
    pub fn version(&self) -> u64 { self.version }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Applies a partial update. Nothing changes unless every present field is valid.
    pub fn apply(&mut self, patch: OrderPatch) -> Result<(), OrderError> {
        if let Some(next) = patch.status {
            if !self.status.can_transition_to(next) {
                return Err(OrderError::InvalidTransition { from: self.status.to_string(), to: next.to_string() });
            }
        }
        let address = match patch.delivery_address {
            Some(address) => {
                let address = address.normalized();
                address.check().map_err(OrderError::InvalidAddress)?;
                Some(address)
            }
            None => None,
        };
        let mut payment = self.payment_details.clone();
        let payment_change = match patch.payment_details {
            Some(p) => payment.apply(p).map_err(|(from, to)| OrderError::InvalidTransition { from: from.to_string(), to: to.to_string() })?,
            None => None,
        };

        if let Some(next) = patch.status {
            if next != self.status {
                self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged { order_id: self.id, from: self.status, to: next }));
                self.status = next;
            }
        }
        if let Some(comment) = patch.comment { self.comment = Some(comment); }
        if let Some(address) = address { self.delivery_address = address; }
        if let Some((from, to)) = payment_change {
            self.raise_event(DomainEvent::Order(OrderEvent::PaymentStatusChanged { order_id: self.id, from, to }));
        }
        self.payment_details = payment;
        self.touch();
        Ok(())
    }

    pub fn mark_paid(&mut self, transaction_id: impl Into<String>) -> Result<(), OrderError> {
        self.apply(OrderPatch {
            payment_details: Some(PaymentPatch { status: Some(PaymentStatus::Completed), transaction_id: Some(transaction_id.into()) }),
            ..OrderPatch::default()
        })
    }

    /// Marks the state as persisted at `version`. Adapters call this after a
    /// successful conditional write.
    pub fn set_version(&mut self, version: u64) { self.version = version; }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("invalid delivery address: {0}")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::payment::PaymentRequest;
    use rstest::rstest;

    pub(crate) fn address() -> DeliveryAddress {
        DeliveryAddress {
            full_name: "Amina Wanjiru".into(), address: "12 Moi Avenue".into(), city: "Nairobi".into(),
            country: "Kenya".into(), phone: "+254712345678".into(),
        }
    }

    fn order() -> Order {
        let total = Money::from_minor(2000, "USD");
        let payment: PaymentRequest = serde_json::from_value(serde_json::json!({"method": "mobile-money", "phoneNumber": "0712345678"})).unwrap();
        Order::place(NewOrder {
            owner_id: OwnerId::new("buyer-1").unwrap(),
            cart_ref: CartId::new(),
            items: vec![OrderItem {
                product_id: ProductId::new(), name: "Widget".into(), quantity: 2,
                unit_price: Money::from_minor(1000, "USD"), line_total: total.clone(),
            }],
            total_amount: total.clone(),
            delivery_address: address(),
            payment_details: payment.validate(&total).unwrap(),
            idempotency_key: None,
        })
        .unwrap()
    }

    #[test]
    fn test_order_workflow() {
        let mut order = order();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.take_events().len(), 1);
        let status = |next| OrderPatch { status: Some(next), ..OrderPatch::default() };
        order.mark_paid("tx-1").unwrap();
        order.apply(status(OrderStatus::Shipped)).unwrap();
        assert_eq!(order.status(), OrderStatus::Shipped);
        order.apply(status(OrderStatus::Delivered)).unwrap();
        assert!(order.status().is_terminal());
        assert!(matches!(order.apply(status(OrderStatus::Cancelled)), Err(OrderError::InvalidTransition { .. })));
    }

    #[rstest]
    #[case(OrderStatus::Pending, OrderStatus::Shipped, true)]
    #[case(OrderStatus::Shipped, OrderStatus::Delivered, true)]
    #[case(OrderStatus::Pending, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Shipped, OrderStatus::Discrepancy, true)]
    #[case(OrderStatus::Discrepancy, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Pending, OrderStatus::Delivered, false)]
    #[case(OrderStatus::Delivered, OrderStatus::Pending, false)]
    #[case(OrderStatus::Cancelled, OrderStatus::Shipped, false)]
    #[case(OrderStatus::Delivered, OrderStatus::Discrepancy, false)]
    #[case(OrderStatus::Shipped, OrderStatus::Cancelled, false)]
    fn test_status_graph(#[case] from: OrderStatus, #[case] to: OrderStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_partial_update_leaves_absent_fields() {
        let mut order = order();
        order.apply(OrderPatch { comment: Some("leave at gate".into()), ..OrderPatch::default() }).unwrap();
        assert_eq!(order.comment(), Some("leave at gate"));
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.delivery_address(), &address());
        assert_eq!(order.payment_details().status, PaymentStatus::Pending);
    }

    #[test]
    fn test_rejected_patch_changes_nothing() {
        let mut order = order();
        let before = order.clone();
        let patch = OrderPatch {
            comment: Some("x".into()),
            status: Some(OrderStatus::Delivered),
            ..OrderPatch::default()
        };
        assert!(order.apply(patch).is_err());
        assert_eq!(order, before);
    }

    #[test]
    fn test_blank_address_is_rejected() {
        let mut order = order();
        let blank = DeliveryAddress { city: "   ".into(), ..address() };
        assert_eq!(
            order.apply(OrderPatch { delivery_address: Some(blank), ..OrderPatch::default() }),
            Err(OrderError::InvalidAddress("city is required".into()))
        );
    }

    #[test]
    fn test_status_parses_original_strings() {
        assert_eq!("Discrepancy".parse::<OrderStatus>(), Ok(OrderStatus::Discrepancy));
        assert!("shipped-ish".parse::<OrderStatus>().is_err());
    }
}
