//! Total Aggregator
//!
//! Resolves cart lines against the product catalog and sums them. Holds no
//! mutable state, so one instance is shared by every request.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::{CartItem, Money, OrderItem, ProductId};
use crate::ports::{CatalogError, ProductCatalog};

/// Errors that can occur while pricing cart lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TotalError {
    /// A line references a product the catalog no longer knows.
    #[error("product {product_id} not found")]
    ProductNotFound { product_id: ProductId },

    /// A product is priced in a different currency than the cart.
    #[error("product {product_id} is priced in {found}, cart uses {expected}")]
    CurrencyMismatch { product_id: ProductId, expected: String, found: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Lines priced at the moment of the lookup, plus any lines whose product
/// could not be resolved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pricing {
    pub lines: Vec<OrderItem>,
    pub missing: Vec<ProductId>,
}

impl Pricing {
    /// Total of all lines. Fails on the first unresolved product.
    pub fn total(&self, currency: &str) -> Result<Money, TotalError> {
        if let Some(&product_id) = self.missing.first() {
            return Err(TotalError::ProductNotFound { product_id });
        }
        sum_lines(&self.lines, currency)
    }
}

/// Sums line totals in decimal arithmetic and rounds once at the end.
pub fn sum_lines(lines: &[OrderItem], currency: &str) -> Result<Money, TotalError> {
    let total = lines.iter().try_fold(Money::zero(currency), |acc, line| {
        acc.add(&line.line_total).map_err(|_| TotalError::CurrencyMismatch {
            product_id: line.product_id,
            expected: currency.to_string(),
            found: line.line_total.currency().to_string(),
        })
    })?;
    Ok(total.rounded())
}

#[derive(Clone)]
pub struct TotalAggregator {
    catalog: Arc<dyn ProductCatalog>,
}

impl TotalAggregator {
    pub fn new(catalog: Arc<dyn ProductCatalog>) -> Self { Self { catalog } }

    /// Prices every line with a single batched catalog lookup.
    pub async fn price(&self, items: &[CartItem], currency: &str) -> Result<Pricing, TotalError> {
        if items.is_empty() {
            return Ok(Pricing::default());
        }
        let mut seen = HashSet::with_capacity(items.len());
        let ids: Vec<ProductId> = items.iter().map(|i| i.product_id).filter(|id| seen.insert(*id)).collect();
        let products = self.catalog.get_products_by_ids(&ids).await?;

        let mut pricing = Pricing::default();
        for item in items {
            let Some(product) = products.get(&item.product_id) else {
                pricing.missing.push(item.product_id);
                continue;
            };
            if product.currency() != currency {
                return Err(TotalError::CurrencyMismatch {
                    product_id: item.product_id,
                    expected: currency.to_string(),
                    found: product.currency().to_string(),
                });
            }
            pricing.lines.push(OrderItem {
                product_id: item.product_id,
                name: product.name().to_string(),
                quantity: item.quantity,
                unit_price: product.price().clone(),
                line_total: product.price().multiply(item.quantity),
            });
        }
        if !pricing.missing.is_empty() {
            tracing::debug!(missing = pricing.missing.len(), "cart lines reference unknown products");
        }
        Ok(pricing)
    }

    /// Checks that every product resolves and is sold in `currency`.
    pub async fn verify_products(&self, ids: &[ProductId], currency: &str) -> Result<(), TotalError> {
        if ids.is_empty() {
            return Ok(());
        }
        let products = self.catalog.get_products_by_ids(ids).await?;
        for &product_id in ids {
            let product = products.get(&product_id).ok_or(TotalError::ProductNotFound { product_id })?;
            if product.currency() != currency {
                return Err(TotalError::CurrencyMismatch {
                    product_id,
                    expected: currency.to_string(),
                    found: product.currency().to_string(),
                });
            }
        }
        Ok(())
    }

    /// `sum(price(item) * quantity)` over all items.
    pub async fn compute_total(&self, items: &[CartItem], currency: &str) -> Result<Money, TotalError> {
        self.price(items, currency).await?.total(currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CartItemId, Product};
    use crate::outbound::memory::InMemoryCatalog;
    use rust_decimal::Decimal;

    fn line(product_id: ProductId, quantity: u32) -> CartItem { CartItem { id: CartItemId::new(), product_id, quantity } }

    async fn catalog_with(prices: &[(ProductId, i64)]) -> Arc<InMemoryCatalog> {
        let catalog = Arc::new(InMemoryCatalog::new());
        for (id, minor) in prices {
            catalog.insert(Product::new(*id, "item", Money::from_minor(*minor, "USD"))).await;
        }
        catalog
    }

    #[tokio::test]
    async fn test_total_of_two_lines() {
        let (a, b) = (ProductId::new(), ProductId::new());
        let catalog = catalog_with(&[(a, 1000), (b, 550)]).await;
        let totals = TotalAggregator::new(catalog.clone());
        let total = totals.compute_total(&[line(a, 2), line(b, 1)], "USD").await.unwrap();
        assert_eq!(total.amount(), Decimal::new(2550, 2));
        assert_eq!(catalog.lookups(), 1);
    }

    #[tokio::test]
    async fn test_empty_items_skip_catalog() {
        let catalog = catalog_with(&[]).await;
        let totals = TotalAggregator::new(catalog.clone());
        assert!(totals.compute_total(&[], "USD").await.unwrap().is_zero());
        assert_eq!(catalog.lookups(), 0);
    }

    #[tokio::test]
    async fn test_missing_product_is_named() {
        let (a, gone) = (ProductId::new(), ProductId::new());
        let totals = TotalAggregator::new(catalog_with(&[(a, 100)]).await);
        let err = totals.compute_total(&[line(a, 1), line(gone, 1)], "USD").await.unwrap_err();
        assert_eq!(err, TotalError::ProductNotFound { product_id: gone });

        let pricing = totals.price(&[line(a, 1), line(gone, 1)], "USD").await.unwrap();
        assert_eq!(pricing.lines.len(), 1);
        assert_eq!(pricing.missing, vec![gone]);
    }

    #[tokio::test]
    async fn test_currency_mismatch() {
        let a = ProductId::new();
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert(Product::new(a, "shilling item", Money::from_minor(100, "KES"))).await;
        let err = TotalAggregator::new(catalog).compute_total(&[line(a, 1)], "USD").await.unwrap_err();
        assert!(matches!(err, TotalError::CurrencyMismatch { .. }));
    }

    #[tokio::test]
    async fn test_catalog_outage_surfaces() {
        let catalog = catalog_with(&[]).await;
        catalog.set_unavailable(true);
        let err = TotalAggregator::new(catalog).compute_total(&[line(ProductId::new(), 1)], "USD").await.unwrap_err();
        assert!(matches!(err, TotalError::Catalog(_)));
    }

    #[test]
    fn test_many_small_prices_do_not_drift() {
        let lines: Vec<OrderItem> = (0..1000)
            .map(|_| OrderItem {
                product_id: ProductId::new(),
                name: "penny".into(),
                quantity: 1,
                unit_price: Money::from_minor(1, "USD"),
                line_total: Money::parse("0.01", "USD").unwrap(),
            })
            .collect();
        assert_eq!(sum_lines(&lines, "USD").unwrap().amount(), Decimal::new(1000, 2));
    }
}
