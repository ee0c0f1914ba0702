//! Port for the external product catalog.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{Product, ProductId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("product catalog unavailable: {message}")]
    Unavailable { message: String },
}

/// Read-only access to product prices. Ids that do not resolve are simply
/// absent from the returned map.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn get_products_by_ids(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>, CatalogError>;
}
