use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{from_db_version, is_connection_error, is_unique_violation, to_db_version};
use crate::domain::{
    CartId, DeliveryAddress, Money, Order, OrderId, OrderItem, OrderParts, OrderStatus, OwnerId, PaymentDetails,
    PaymentMethod, PaymentStatus, ProductId,
};
use crate::ports::{OrderStore, OrderStoreError};

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    owner_id: String,
    cart_ref: Uuid,
    items: Json<Vec<StoredItem>>,
    total_amount: Decimal,
    currency: String,
    delivery_address: Json<DeliveryAddress>,
    payment_details: Json<StoredPayment>,
    status: String,
    comment: Option<String>,
    idempotency_key: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Money inside JSONB snapshots. `Decimal` serializes as a string, so the
/// stored amount keeps every digit; older rows holding JSON numbers still load.
#[derive(Debug, Serialize, Deserialize)]
struct StoredMoney {
    amount: Decimal,
    currency: String,
}

impl From<&Money> for StoredMoney {
    fn from(money: &Money) -> Self { Self { amount: money.amount(), currency: money.currency().to_string() } }
}

impl From<StoredMoney> for Money {
    fn from(stored: StoredMoney) -> Self { Money::new(stored.amount, &stored.currency) }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredItem {
    product_id: ProductId,
    name: String,
    quantity: u32,
    unit_price: StoredMoney,
    line_total: StoredMoney,
}

impl From<&OrderItem> for StoredItem {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id,
            name: item.name.clone(),
            quantity: item.quantity,
            unit_price: (&item.unit_price).into(),
            line_total: (&item.line_total).into(),
        }
    }
}

impl From<StoredItem> for OrderItem {
    fn from(item: StoredItem) -> Self {
        Self {
            product_id: item.product_id,
            name: item.name,
            quantity: item.quantity,
            unit_price: item.unit_price.into(),
            line_total: item.line_total.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPayment {
    #[serde(flatten)]
    method: PaymentMethod,
    status: PaymentStatus,
    transaction_id: Option<String>,
    amount: StoredMoney,
}

impl From<&PaymentDetails> for StoredPayment {
    fn from(details: &PaymentDetails) -> Self {
        Self {
            method: details.method.clone(),
            status: details.status,
            transaction_id: details.transaction_id.clone(),
            amount: (&details.amount).into(),
        }
    }
}

impl From<StoredPayment> for PaymentDetails {
    fn from(stored: StoredPayment) -> Self {
        Self { method: stored.method, status: stored.status, transaction_id: stored.transaction_id, amount: stored.amount.into() }
    }
}

fn stored_items(items: &[OrderItem]) -> Json<Vec<StoredItem>> { Json(items.iter().map(StoredItem::from).collect()) }

fn stored_payment(details: &PaymentDetails) -> Json<StoredPayment> { Json(details.into()) }

const ORDER_COLUMNS: &str = "id, owner_id, cart_ref, items, total_amount, currency, delivery_address, \
    payment_details, status, comment, idempotency_key, version, created_at, updated_at";

impl TryFrom<OrderRow> for Order {
    type Error = OrderStoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let corrupt = |message: String| OrderStoreError::Query { message: format!("order {}: {message}", row.id) };
        let owner_id = OwnerId::new(row.owner_id.clone()).map_err(|e| corrupt(e.to_string()))?;
        let status = row.status.parse::<OrderStatus>().map_err(corrupt)?;
        Ok(Order::from_parts(OrderParts {
            id: OrderId::from_uuid(row.id),
            owner_id,
            cart_ref: CartId::from_uuid(row.cart_ref),
            items: row.items.0.into_iter().map(OrderItem::from).collect(),
            total_amount: Money::new(row.total_amount, &row.currency),
            delivery_address: row.delivery_address.0,
            payment_details: row.payment_details.0.into(),
            status,
            comment: row.comment,
            idempotency_key: row.idempotency_key,
            version: from_db_version(row.version),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }
}

fn db_err(err: sqlx::Error) -> OrderStoreError {
    if is_connection_error(&err) {
        OrderStoreError::Connection { message: err.to_string() }
    } else {
        OrderStoreError::Query { message: err.to_string() }
    }
}

/// Orders in a single `orders` table. Items, address and payment details
/// are JSONB snapshots; `UNIQUE (owner_id, idempotency_key)` backs checkout
/// deduplication.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), OrderStoreError> {
        let result = sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(order.id().as_uuid())
        .bind(order.owner_id().as_str())
        .bind(order.cart_ref().as_uuid())
        .bind(stored_items(order.items()))
        .bind(order.total_amount().amount())
        .bind(order.total_amount().currency())
        .bind(Json(order.delivery_address()))
        .bind(stored_payment(order.payment_details()))
        .bind(order.status().as_str())
        .bind(order.comment())
        .bind(order.idempotency_key())
        .bind(to_db_version(order.version()))
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(OrderStoreError::DuplicateIdempotencyKey {
                key: order.idempotency_key().unwrap_or_default().to_string(),
            }),
            Err(err) => Err(db_err(err)),
        }
    }

    async fn find_by_id(&self, order_id: OrderId) -> Result<Option<Order>, OrderStoreError> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_by_idempotency_key(&self, owner: &OwnerId, key: &str) -> Result<Option<Order>, OrderStoreError> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE owner_id = $1 AND idempotency_key = $2"
        ))
        .bind(owner.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(Order::try_from)
        .transpose()
    }

    async fn list(&self, owner: Option<&OwnerId>) -> Result<Vec<Order>, OrderStoreError> {
        let rows = match owner {
            Some(owner) => {
                sqlx::query_as::<_, OrderRow>(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE owner_id = $1 ORDER BY created_at DESC, id DESC"
                ))
                .bind(owner.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, id DESC"))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(db_err)?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn update(&self, order: &Order, expected_version: u64) -> Result<u64, OrderStoreError> {
        let next = expected_version + 1;
        let updated = sqlx::query(
            "UPDATE orders SET delivery_address = $3, payment_details = $4, status = $5, comment = $6, \
             version = $7, updated_at = $8 WHERE id = $1 AND version = $2",
        )
        .bind(order.id().as_uuid())
        .bind(to_db_version(expected_version))
        .bind(Json(order.delivery_address()))
        .bind(stored_payment(order.payment_details()))
        .bind(order.status().as_str())
        .bind(order.comment())
        .bind(to_db_version(next))
        .bind(order.updated_at())
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();

        if updated == 0 {
            let exists = sqlx::query_scalar::<_, i64>("SELECT version FROM orders WHERE id = $1")
                .bind(order.id().as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .is_some();
            return Err(if exists {
                OrderStoreError::VersionConflict { order_id: order.id(), expected: expected_version }
            } else {
                OrderStoreError::NotFound { order_id: order.id() }
            });
        }
        Ok(next)
    }

    async fn delete(&self, order_id: OrderId) -> Result<bool, OrderStoreError> {
        let deleted = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_snapshot_amounts_keep_full_precision() {
        let price = Money::new(Decimal::from_str("12345678901234.5678").unwrap(), "USD");
        let item = OrderItem {
            product_id: ProductId::new(),
            name: "Tanzanite pendant".into(),
            quantity: 3,
            unit_price: price.clone(),
            line_total: price.multiply(3),
        };

        let json = serde_json::to_value(stored_items(std::slice::from_ref(&item)).0).unwrap();
        assert_eq!(json[0]["unitPrice"]["amount"], "12345678901234.5678");
        assert_eq!(json[0]["lineTotal"]["amount"], "37037036703703.7034");

        let back: Vec<StoredItem> = serde_json::from_value(json).unwrap();
        let back: Vec<OrderItem> = back.into_iter().map(OrderItem::from).collect();
        assert_eq!(back, vec![item]);
    }

    #[test]
    fn test_payment_snapshot_round_trips() {
        let details = PaymentDetails {
            method: PaymentMethod::MobileMoney { phone_number: "+254712345678".into() },
            status: PaymentStatus::Pending,
            transaction_id: None,
            amount: Money::new(Decimal::from_str("0.1").unwrap() + Decimal::from_str("0.2").unwrap(), "KES"),
        };
        let json = serde_json::to_value(stored_payment(&details).0).unwrap();
        assert_eq!(json["method"], "mobile-money");
        assert_eq!(json["amount"]["amount"], "0.3");

        let back: StoredPayment = serde_json::from_value(json).unwrap();
        assert_eq!(PaymentDetails::from(back), details);
    }

    #[test]
    fn test_number_amounts_from_older_rows_still_load() {
        let json = serde_json::json!({"method": "wallet", "walletAddress": "0xab", "status": "Completed",
            "transactionId": "tx-1", "amount": {"amount": 25.5, "currency": "USD"}});
        let back: StoredPayment = serde_json::from_value(json).unwrap();
        assert_eq!(PaymentDetails::from(back).amount, Money::from_minor(2550, "USD"));
    }
}
