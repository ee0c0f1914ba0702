//! HTTP surface.
//!
//! [`router`] returns the bare routes; `main.rs` adds the trace and CORS
//! layers so tests can drive the router directly.

mod cart;
mod error;
mod extract;
mod orders;

pub use error::{status_for, ApiError};
pub use extract::{IDEMPOTENCY_HEADER, OWNER_HEADER};

use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::services::{CartService, OrderService};

#[derive(Clone)]
pub struct AppState {
    pub carts: CartService,
    pub orders: OrderService,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "escrow-market"})) }))
        .route("/cart", get(cart::get_cart))
        .route("/cart/add", post(cart::add_item))
        .route("/cart/adjust", post(cart::adjust_item))
        .route("/cart/edit", post(cart::edit_cart))
        .route("/cart/remove", delete(cart::remove_product))
        .route("/cart/items/:item_id", delete(cart::remove_item))
        .route("/cart/clear", post(cart::clear_cart))
        .route("/orders", get(orders::list_orders).post(orders::create_order))
        .route("/orders/:id", get(orders::get_order).put(orders::update_order).delete(orders::delete_order))
        .with_state(state)
}
