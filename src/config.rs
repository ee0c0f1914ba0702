//! Environment configuration.

use std::env;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got {value:?}")]
    Invalid { name: &'static str, expected: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// In-memory adapters are used when unset.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub nats_subject_prefix: String,
    pub default_currency: String,
    pub cart_total_max_attempts: usize,
    pub cart_clear_max_retries: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8083,
            database_url: None,
            database_max_connections: 10,
            nats_url: None,
            nats_subject_prefix: "escrow".into(),
            default_currency: "USD".into(),
            cart_total_max_attempts: 5,
            cart_clear_max_retries: 3,
        }
    }
}

impl AppConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Ok(Self {
            port: parse(&text, "PORT", "port number", defaults.port)?,
            database_url: text("DATABASE_URL"),
            database_max_connections: parse(&text, "DATABASE_MAX_CONNECTIONS", "connection count", defaults.database_max_connections)?,
            nats_url: text("NATS_URL"),
            nats_subject_prefix: text("NATS_SUBJECT_PREFIX").unwrap_or(defaults.nats_subject_prefix),
            default_currency: text("DEFAULT_CURRENCY").map(|c| c.to_uppercase()).unwrap_or(defaults.default_currency),
            cart_total_max_attempts: parse(&text, "CART_TOTAL_MAX_ATTEMPTS", "attempt count", defaults.cart_total_max_attempts)?
                .max(1),
            cart_clear_max_retries: parse(&text, "CART_CLEAR_MAX_RETRIES", "retry count", defaults.cart_clear_max_retries)?,
        })
    }
}

fn parse<T: FromStr>(
    text: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match text(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, expected, value }),
        None => Ok(default),
    }
}
