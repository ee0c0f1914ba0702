use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{from_db_version, is_connection_error, to_db_version};
use crate::domain::{Cart, CartId, CartItem, CartItemId, CartParts, Money, OwnerId, ProductId};
use crate::ports::{CartStore, CartStoreError};

#[derive(Debug, sqlx::FromRow)]
struct CartRow {
    id: Uuid,
    owner_id: String,
    total_amount: Decimal,
    currency: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct CartItemRow {
    id: Uuid,
    product_id: Uuid,
    quantity: i32,
}

const CART_COLUMNS: &str = "id, owner_id, total_amount, currency, version, created_at, updated_at";

fn db_err(err: sqlx::Error) -> CartStoreError {
    if is_connection_error(&err) {
        CartStoreError::Connection { message: err.to_string() }
    } else {
        CartStoreError::Query { message: err.to_string() }
    }
}

fn quantity_from_db(quantity: i32) -> u32 { u32::try_from(quantity).unwrap_or_default() }

fn quantity_to_db(quantity: u32) -> i32 { i32::try_from(quantity).unwrap_or(i32::MAX) }

/// Carts in `carts`, lines in `cart_items` with `UNIQUE (cart_id, product_id)`.
///
/// A write runs in one transaction: lock the cart row, compare `version`,
/// rewrite the lines and store the total with `version + 1`. Two writers read
/// at the same version cannot both pass the comparison.
#[derive(Clone)]
pub struct PgCartStore {
    pool: PgPool,
}

impl PgCartStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    async fn load(conn: &mut PgConnection, cart_id: CartId) -> Result<Option<Cart>, CartStoreError> {
        let row = sqlx::query_as::<_, CartRow>(&format!("SELECT {CART_COLUMNS} FROM carts WHERE id = $1"))
            .bind(cart_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => Ok(Some(Self::hydrate(conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn hydrate(conn: &mut PgConnection, row: CartRow) -> Result<Cart, CartStoreError> {
        let items = sqlx::query_as::<_, CartItemRow>(
            "SELECT id, product_id, quantity FROM cart_items WHERE cart_id = $1 ORDER BY position, added_at",
        )
        .bind(row.id)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;
        let owner_id = OwnerId::new(row.owner_id).map_err(|e| CartStoreError::Query { message: e.to_string() })?;
        Ok(Cart::from_parts(CartParts {
            id: CartId::from_uuid(row.id),
            owner_id,
            items: items
                .into_iter()
                .map(|i| CartItem {
                    id: CartItemId::from_uuid(i.id),
                    product_id: ProductId::from_uuid(i.product_id),
                    quantity: quantity_from_db(i.quantity),
                })
                .collect(),
            total_amount: Money::new(row.total_amount, &row.currency),
            version: from_db_version(row.version),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    /// Locks the cart row for the rest of the transaction and returns its version.
    async fn lock(conn: &mut PgConnection, cart_id: CartId) -> Result<u64, CartStoreError> {
        sqlx::query_scalar::<_, i64>("SELECT version FROM carts WHERE id = $1 FOR UPDATE")
            .bind(cart_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_err)?
            .map(from_db_version)
            .ok_or(CartStoreError::NotFound { cart_id })
    }

    async fn reload(conn: &mut PgConnection, cart_id: CartId) -> Result<Cart, CartStoreError> {
        Self::load(conn, cart_id).await?.ok_or(CartStoreError::NotFound { cart_id })
    }
}

#[async_trait]
impl CartStore for PgCartStore {
    async fn find_by_owner(&self, owner: &OwnerId) -> Result<Option<Cart>, CartStoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let row = sqlx::query_as::<_, CartRow>(&format!("SELECT {CART_COLUMNS} FROM carts WHERE owner_id = $1"))
            .bind(owner.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => Ok(Some(Self::hydrate(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, cart_id: CartId) -> Result<Option<Cart>, CartStoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        Self::load(&mut conn, cart_id).await
    }

    async fn get_or_create(&self, owner: &OwnerId, currency: &str) -> Result<Cart, CartStoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let inserted = sqlx::query(
            "INSERT INTO carts (id, owner_id, total_amount, currency, version, created_at, updated_at) \
             VALUES ($1, $2, 0, $3, 0, NOW(), NOW()) ON CONFLICT (owner_id) DO NOTHING",
        )
        .bind(Uuid::now_v7())
        .bind(owner.as_str())
        .bind(currency.to_uppercase())
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
        if inserted.rows_affected() > 0 {
            tracing::debug!(owner_id = %owner, "created cart");
        }
        let row = sqlx::query_as::<_, CartRow>(&format!("SELECT {CART_COLUMNS} FROM carts WHERE owner_id = $1"))
            .bind(owner.as_str())
            .fetch_one(&mut *conn)
            .await
            .map_err(db_err)?;
        Self::hydrate(&mut conn, row).await
    }

    async fn replace_items(
        &self,
        cart_id: CartId,
        expected_version: u64,
        items: &[CartItem],
        total: &Money,
    ) -> Result<Cart, CartStoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let actual = Self::lock(&mut tx, cart_id).await?;
        if actual != expected_version {
            return Err(CartStoreError::VersionConflict { cart_id, expected: expected_version, actual });
        }

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO cart_items (id, cart_id, product_id, quantity, position, added_at) \
                 VALUES ($1, $2, $3, $4, $5, NOW())",
            )
            .bind(item.id.as_uuid())
            .bind(cart_id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(quantity_to_db(item.quantity))
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        sqlx::query("UPDATE carts SET version = $2, total_amount = $3, updated_at = NOW() WHERE id = $1")
            .bind(cart_id.as_uuid())
            .bind(to_db_version(expected_version + 1))
            .bind(total.amount())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let cart = Self::reload(&mut tx, cart_id).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(cart)
    }
}
