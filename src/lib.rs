//! Escrow Marketplace Core
//!
//! Cart-to-order consistency engine for an escrow-style marketplace.
//!
//! ## Features
//! - One cart per owner with version-checked, additive line-item updates
//! - Cart totals recomputed from live catalog prices on every item change
//! - Optimistic client view reconciled against the server cart
//! - Checkout that freezes the cart into an immutable order
//! - Order status and payment status state machines
//! - PostgreSQL and in-memory storage, NATS event publishing

pub mod client;
pub mod config;
pub mod domain;
pub mod http;
pub mod outbound;
pub mod ports;
pub mod services;

use thiserror::Error;

use crate::domain::{CartId, OrderError, OrderId, PaymentError, ProductId};
use crate::ports::{CartStoreError, CatalogError, OrderStoreError};
use crate::services::TotalError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum Error {
    #[error("cart not found: {0}")]
    CartNotFound(String),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("product {product_id} not found")]
    ProductNotFound { product_id: ProductId },

    #[error("cart {cart_id} is empty")]
    EmptyCart { cart_id: CartId },

    #[error("invalid payment details: {0}")]
    InvalidPaymentDetails(#[from] PaymentError),

    #[error("{0}")]
    Validation(String),

    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Coarse error classes used for HTTP mapping and retry decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Upstream,
    Storage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CartNotFound(_) | Self::OrderNotFound(_) | Self::ProductNotFound { .. } => ErrorKind::NotFound,
            Self::EmptyCart { .. } | Self::InvalidPaymentDetails(_) | Self::Validation(_) | Self::InvalidTransition { .. } => {
                ErrorKind::Validation
            }
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Whether repeating the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Storage | ErrorKind::Conflict | ErrorKind::Upstream)
    }

    /// Wraps a cart store failure with the operation that hit it.
    pub fn cart_store(context: impl Into<String>, err: CartStoreError) -> Self {
        let context = context.into();
        match err {
            CartStoreError::NotFound { cart_id } => Self::CartNotFound(cart_id.to_string()),
            CartStoreError::VersionConflict { .. } => Self::Conflict(format!("{context}: {err}")),
            other => Self::Storage { context, source: Box::new(other) },
        }
    }

    /// Wraps an order store failure with the operation that hit it.
    pub fn order_store(context: impl Into<String>, err: OrderStoreError) -> Self {
        let context = context.into();
        match err {
            OrderStoreError::NotFound { order_id } => Self::OrderNotFound(order_id),
            OrderStoreError::VersionConflict { .. } | OrderStoreError::DuplicateIdempotencyKey { .. } => {
                Self::Conflict(format!("{context}: {err}"))
            }
            other => Self::Storage { context, source: Box::new(other) },
        }
    }
}

impl From<CatalogError> for Error {
    fn from(err: CatalogError) -> Self { Self::Upstream(err.to_string()) }
}

impl From<TotalError> for Error {
    fn from(err: TotalError) -> Self {
        match err {
            TotalError::ProductNotFound { product_id } => Self::ProductNotFound { product_id },
            TotalError::CurrencyMismatch { .. } => Self::Validation(err.to_string()),
            TotalError::Catalog(e) => e.into(),
        }
    }
}

impl From<OrderError> for Error {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            OrderError::NoItems | OrderError::InvalidAddress(_) => Self::Validation(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
