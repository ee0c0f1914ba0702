//! Aggregates module
pub mod cart;
pub mod order;
pub mod payment;
pub mod product;

pub use cart::{Cart, CartError, CartItem, CartLine, CartParts, QuantityChange};
pub use order::{DeliveryAddress, NewOrder, Order, OrderError, OrderItem, OrderParts, OrderPatch, OrderStatus};
pub use payment::{PaymentDetails, PaymentError, PaymentMethod, PaymentPatch, PaymentRequest, PaymentStatus};
pub use product::Product;
