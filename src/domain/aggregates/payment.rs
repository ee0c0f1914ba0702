//! Payment details attached to an order.
//!
//! Checkout submits a [`PaymentRequest`]; validation turns it into the
//! [`PaymentDetails`] stored on the order. Charge execution happens outside
//! this crate, so the stored details only record the method, the instrument
//! needed to reconcile the payment later, and the payment status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::domain::value_objects::Money;

/// Payment instrument as submitted at checkout, tagged by `method`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum PaymentRequest {
    Wallet(WalletRequest),
    #[serde(alias = "mpesa", alias = "mobile_money")]
    MobileMoney(MobileMoneyRequest),
    Card(CardRequest),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WalletRequest {
    #[validate(required, custom = "resolvable_wallet")]
    pub wallet_address: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MobileMoneyRequest {
    #[validate(required, custom = "valid_phone_number")]
    pub phone_number: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CardRequest {
    #[validate(required)]
    pub cardholder_name: Option<String>,
    #[validate(required, credit_card)]
    pub card_number: Option<String>,
    #[validate(required, custom = "valid_expiry_date")]
    pub expiry_date: Option<String>,
    #[validate(required, length(min = 3, max = 4), custom = "digits")]
    pub cvc: Option<String>,
}

/// Struct field, wire name and rule text for every checked field, in the
/// order a failure is reported.
const CHECKED_FIELDS: [(&str, &str, &str); 6] = [
    ("wallet_address", "walletAddress", "not a resolvable wallet address"),
    ("phone_number", "phoneNumber", "expected 7 to 15 digits"),
    ("cardholder_name", "cardholderName", "must not be blank"),
    ("card_number", "cardNumber", "not a valid card number"),
    ("expiry_date", "expiryDate", "expected MM/YY"),
    ("cvc", "cvc", "expected 3 or 4 digits"),
];

/// Names the first failing field.
fn first_error(errors: &ValidationErrors) -> PaymentError {
    let fields = errors.field_errors();
    for (name, field, reason) in CHECKED_FIELDS {
        if let Some(first) = fields.get(name).and_then(|errs| errs.first()) {
            return if first.code == "required" {
                PaymentError::MissingField { field }
            } else {
                PaymentError::InvalidField { field, reason }
            };
        }
    }
    PaymentError::InvalidField { field: "paymentDetails", reason: "rejected" }
}

impl WalletRequest {
    fn normalized(self) -> Self {
        Self { wallet_address: non_blank(self.wallet_address), transaction_id: non_blank(self.transaction_id) }
    }
}

impl MobileMoneyRequest {
    fn normalized(self) -> Self {
        Self { phone_number: non_blank(self.phone_number), transaction_id: non_blank(self.transaction_id) }
    }
}

impl CardRequest {
    /// Trims every field and drops the spaces and dashes people type in card numbers.
    fn normalized(self) -> Self {
        Self {
            cardholder_name: non_blank(self.cardholder_name),
            card_number: non_blank(self.card_number.map(|n| n.chars().filter(|c| !c.is_whitespace() && *c != '-').collect())),
            expiry_date: non_blank(self.expiry_date),
            cvc: non_blank(self.cvc),
        }
    }
}

/// Validated payment details persisted with an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    #[serde(flatten)]
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub amount: Money,
}

/// Method-specific fields kept after validation. Card numbers and CVCs are
/// never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum PaymentMethod {
    #[serde(rename_all = "camelCase")]
    Wallet { wallet_address: String },
    #[serde(rename_all = "camelCase")]
    MobileMoney { phone_number: String },
    #[serde(rename_all = "camelCase")]
    Card { cardholder_name: String, card_last4: String, expiry_date: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "Pending", Self::Completed => "Completed", Self::Failed => "Failed" }
    }

    /// Pending settles to Completed or Failed; a Failed payment may be retried.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        self == next || matches!((self, next), (Pending, Completed) | (Pending, Failed) | (Failed, Pending) | (Failed, Completed))
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// Partial update of payment details.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPatch {
    pub status: Option<PaymentStatus>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("payment details missing {field}")]
    MissingField { field: &'static str },
    #[error("payment details field {field} is invalid: {reason}")]
    InvalidField { field: &'static str, reason: &'static str },
}

impl PaymentError {
    pub fn field(&self) -> &'static str {
        match self { Self::MissingField { field } | Self::InvalidField { field, .. } => field }
    }
}

impl PaymentRequest {
    pub fn method_name(&self) -> &'static str {
        match self { Self::Wallet(_) => "wallet", Self::MobileMoney(_) => "mobile-money", Self::Card(_) => "card" }
    }

    /// Checks the method-specific fields and produces pending payment details
    /// for `amount`.
    pub fn validate(self, amount: &Money) -> Result<PaymentDetails, PaymentError> {
        let (method, transaction_id) = match self {
            Self::Wallet(req) => {
                let req = req.normalized();
                req.validate().map_err(|e| first_error(&e))?;
                (PaymentMethod::Wallet { wallet_address: req.wallet_address.unwrap_or_default() }, req.transaction_id)
            }
            Self::MobileMoney(req) => {
                let req = req.normalized();
                req.validate().map_err(|e| first_error(&e))?;
                (PaymentMethod::MobileMoney { phone_number: req.phone_number.unwrap_or_default() }, req.transaction_id)
            }
            Self::Card(req) => {
                let req = req.normalized();
                req.validate().map_err(|e| first_error(&e))?;
                let number = req.card_number.unwrap_or_default();
                let card_last4 = number.chars().skip(number.chars().count().saturating_sub(4)).collect();
                let method = PaymentMethod::Card {
                    cardholder_name: req.cardholder_name.unwrap_or_default(),
                    card_last4,
                    expiry_date: req.expiry_date.unwrap_or_default(),
                };
                (method, None)
            }
        };
        Ok(PaymentDetails { method, status: PaymentStatus::Pending, transaction_id, amount: amount.clone() })
    }
}

impl PaymentDetails {
    pub fn apply(&mut self, patch: PaymentPatch) -> Result<Option<(PaymentStatus, PaymentStatus)>, (PaymentStatus, PaymentStatus)> {
        let mut changed = None;
        if let Some(next) = patch.status {
            if !self.status.can_transition_to(next) { return Err((self.status, next)); }
            if next != self.status { changed = Some((self.status, next)); }
            self.status = next;
        }
        if let Some(tx) = non_blank(patch.transaction_id) { self.transaction_id = Some(tx); }
        Ok(changed)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn rule(ok: bool, code: &'static str) -> Result<(), ValidationError> {
    if ok { Ok(()) } else { Err(ValidationError::new(code)) }
}

fn valid_phone_number(value: &str) -> Result<(), ValidationError> {
    let digits = value.strip_prefix('+').unwrap_or(value);
    let digits: String = digits.chars().filter(|c| *c != ' ' && *c != '-').collect();
    rule((7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()), "phone_number")
}

/// Accepts a 256-bit hex address (`0x` + 64 hex digits) or a bech32 `fuel1` address.
fn resolvable_wallet(value: &str) -> Result<(), ValidationError> {
    const BECH32: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";
    let ok = match value.strip_prefix("0x") {
        Some(hex) => hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => value.strip_prefix("fuel1").is_some_and(|data| data.len() == 58 && data.chars().all(|c| BECH32.contains(c))),
    };
    rule(ok, "wallet_address")
}

fn valid_expiry_date(value: &str) -> Result<(), ValidationError> {
    let Some((month, year)) = value.split_once('/') else { return rule(false, "expiry_date") };
    let month_ok = month.len() == 2 && month.parse::<u8>().is_ok_and(|m| (1..=12).contains(&m));
    let year_ok = (year.len() == 2 || year.len() == 4) && year.chars().all(|c| c.is_ascii_digit());
    rule(month_ok && year_ok, "expiry_date")
}

fn digits(value: &str) -> Result<(), ValidationError> { rule(value.chars().all(|c| c.is_ascii_digit()), "digits") }
