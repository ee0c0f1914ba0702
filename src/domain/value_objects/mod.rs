//! Value Objects for the cart and order core

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Currency values carry two decimal places.
pub const MINOR_UNIT_SCALE: u32 = 2;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self { Self(Uuid::now_v7()) }
            pub fn from_uuid(id: Uuid) -> Self { Self(id) }
            pub fn as_uuid(&self) -> Uuid { self.0 }
        }

        impl Default for $name {
            fn default() -> Self { Self::new() }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self { Self(id) }
        }

        impl FromStr for $name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> { Uuid::parse_str(s).map(Self) }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }
    };
}

uuid_id!(
    /// Identity of a cart document.
    CartId
);
uuid_id!(
    /// Identity of a single cart line, stable across quantity changes.
    CartItemId
);
uuid_id!(
    /// Identity of an order.
    OrderId
);
uuid_id!(
    /// Non-owning reference into the product catalog.
    ProductId
);

/// Owner of a cart or order, as issued by the external auth layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(value: impl Into<String>) -> Result<Self, OwnerIdError> {
        let value = value.into().trim().to_string();
        if value.is_empty() { return Err(OwnerIdError::Empty); }
        if value.len() > 255 { return Err(OwnerIdError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl TryFrom<String> for OwnerId {
    type Error = OwnerIdError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<OwnerId> for String {
    fn from(value: OwnerId) -> Self { value.0 }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OwnerIdError {
    #[error("owner id empty")]
    Empty,
    #[error("owner id too long")]
    TooLong,
}

/// Money value object.
///
/// Amounts are fixed-point decimals; arithmetic never goes through floating
/// point. JSON renders the amount as a number and accepts either a number or a
/// decimal string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    #[serde(with = "amount_serde")]
    amount: Decimal,
    currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self {
        Self { amount, currency: currency.trim().to_uppercase() }
    }
    pub fn from_minor(minor: i64, currency: &str) -> Self { Self::new(Decimal::new(minor, MINOR_UNIT_SCALE), currency) }
    pub fn parse(amount: &str, currency: &str) -> Result<Self, MoneyError> {
        let amount = Decimal::from_str(amount.trim()).map_err(|_| MoneyError::InvalidAmount(amount.to_string()))?;
        if amount.is_sign_negative() { return Err(MoneyError::Negative); }
        Ok(Self::new(amount, currency))
    }
    pub fn usd(amount: Decimal) -> Self { Self::new(amount, "USD") }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn is_zero(&self) -> bool { self.amount.is_zero() }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch { expected: self.currency.clone(), found: other.currency.clone() });
        }
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }

    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.amount * Decimal::from(qty), &self.currency) }

    /// Rounds half-to-even to the currency's minor unit.
    pub fn rounded(&self) -> Money {
        Money::new(
            self.amount.round_dp_with_strategy(MINOR_UNIT_SCALE, RoundingStrategy::MidpointNearestEven),
            &self.currency,
        )
    }
}

impl Default for Money { fn default() -> Self { Self::zero("USD") } }

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.amount, self.currency)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: String, found: String },
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("amount must not be negative")]
    Negative,
}

mod amount_serde {
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal::Decimal;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(amount: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        match amount.to_f64() {
            Some(value) => serializer.serialize_f64(value),
            None => Err(serde::ser::Error::custom("amount out of range")),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        // f64 Display yields the shortest round-trip form, so 10.1 parses back as exactly 10.1.
        let text = match Raw::deserialize(deserializer)? {
            Raw::Number(value) => value.to_string(),
            Raw::Text(value) => value,
        };
        Decimal::from_str(text.trim()).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_id_trims() {
        assert_eq!(OwnerId::new("  auth0|abc ").unwrap().as_str(), "auth0|abc");
        assert_eq!(OwnerId::new("   "), Err(OwnerIdError::Empty));
    }

    #[test]
    fn test_money_add() {
        let a = Money::usd(Decimal::new(100, 0));
        let b = Money::usd(Decimal::new(50, 0));
        assert_eq!(a.add(&b).unwrap().amount(), Decimal::new(150, 0));
    }

    #[test]
    fn test_money_add_rejects_other_currency() {
        let a = Money::from_minor(100, "USD");
        let b = Money::from_minor(100, "KES");
        assert!(matches!(a.add(&b), Err(MoneyError::CurrencyMismatch { .. })));
    }

    #[test]
    fn test_no_float_drift() {
        // 0.1 + 0.2 in f64 is 0.30000000000000004
        let total = Money::parse("0.10", "USD").unwrap().add(&Money::parse("0.20", "USD").unwrap()).unwrap();
        assert_eq!(total.amount(), Decimal::new(30, 2));
    }

    #[test]
    fn test_json_boundary() {
        let money = Money::from_minor(2550, "usd");
        let json = serde_json::to_value(&money).unwrap();
        assert_eq!(json, serde_json::json!({"amount": 25.5, "currency": "USD"}));

        let back: Money = serde_json::from_value(serde_json::json!({"amount": 10.1, "currency": "USD"})).unwrap();
        assert_eq!(back.amount(), Decimal::new(101, 1));
        let text: Money = serde_json::from_value(serde_json::json!({"amount": "5.50", "currency": "USD"})).unwrap();
        assert_eq!(text.amount(), Decimal::new(550, 2));
    }

    #[test]
    fn test_rounded_half_even() {
        assert_eq!(Money::parse("2.345", "USD").unwrap().rounded().amount(), Decimal::new(234, 2));
        assert_eq!(Money::parse("2.355", "USD").unwrap().rounded().amount(), Decimal::new(236, 2));
    }
}
