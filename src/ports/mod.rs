//! Ports between the cart/order services and their collaborators.
//!
//! Services receive these as `Arc<dyn Port>` so adapters (PostgreSQL,
//! in-memory, NATS) are chosen at wiring time rather than through global state.

mod cart_store;
mod event_publisher;
mod order_store;
mod product_catalog;

pub use cart_store::{CartStore, CartStoreError};
pub use event_publisher::{EventPublisher, NoopEventPublisher, PublishError};
pub use order_store::{OrderStore, OrderStoreError};
pub use product_catalog::{CatalogError, ProductCatalog};
