//! PostgreSQL adapters.
//!
//! Schema lives in `migrations/`. Queries are plain runtime `sqlx::query`
//! strings so the crate builds without a live database.

mod cart_store;
mod catalog;
mod order_store;

pub use cart_store::PgCartStore;
pub use catalog::PgProductCatalog;
pub use order_store::PgOrderStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

const UNIQUE_VIOLATION: &str = "23505";

/// Opens the pool and applies pending migrations.
pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// True for failures where the statement never reached the database.
fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error().and_then(|e| e.code()).is_some_and(|code| code == UNIQUE_VIOLATION)
}

/// Versions are stored as BIGINT.
fn to_db_version(version: u64) -> i64 { i64::try_from(version).unwrap_or(i64::MAX) }

fn from_db_version(version: i64) -> u64 { u64::try_from(version).unwrap_or_default() }
