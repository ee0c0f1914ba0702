//! Cart and order domain: aggregates, value objects and events.
pub mod aggregates;
pub mod events;
pub mod value_objects;

pub use aggregates::*;
pub use events::{CartEvent, DomainEvent, OrderEvent};
pub use value_objects::{CartId, CartItemId, Money, MoneyError, OrderId, OwnerId, OwnerIdError, ProductId};
