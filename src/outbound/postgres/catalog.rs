use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Money, Product, ProductId};
use crate::ports::{CatalogError, ProductCatalog};

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    price: Decimal,
    currency: String,
}

/// Reads prices from the marketplace `products` table. Listings are owned by
/// the seller service; this adapter never writes.
#[derive(Clone)]
pub struct PgProductCatalog {
    pool: PgPool,
}

impl PgProductCatalog {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait]
impl ProductCatalog for PgProductCatalog {
    async fn get_products_by_ids(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>, CatalogError> {
        let ids: Vec<Uuid> = ids.iter().map(ProductId::as_uuid).collect();
        let rows = sqlx::query_as::<_, ProductRow>("SELECT id, name, price, currency FROM products WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CatalogError::Unavailable { message: e.to_string() })?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let id = ProductId::from_uuid(row.id);
                (id, Product::new(id, row.name, Money::new(row.price, &row.currency)))
            })
            .collect())
    }
}
