// crates/slotbook-core/src/core/money.rs
// ============================================================================
// Module: Slotbook Money Model
// Description: Integer minor-unit amounts with currency codes.
// Purpose: Provide exact amount comparison for payment reconciliation.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Amounts are integer minor units (paise, cents) paired with an uppercase
//! three-letter currency code. Reconciliation compares amounts with exact
//! integer equality — a gateway-reported amount either matches the ledger
//! expectation or the attempt fails. There is no tolerance window and no
//! floating point anywhere in the money path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Currency
// ============================================================================

/// Errors raised when parsing currency codes.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CurrencyError {
    /// Code is not exactly three uppercase ASCII letters.
    #[error("invalid currency code: {0}")]
    InvalidCode(String),
}

/// ISO-4217-shaped currency code.
///
/// # Invariants
/// - Exactly three uppercase ASCII letters; no normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parses a currency code from its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`CurrencyError::InvalidCode`] when the input is malformed.
    pub fn parse(value: &str) -> Result<Self, CurrencyError> {
        if value.len() != 3 || !value.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(CurrencyError::InvalidCode(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for Currency {
    type Error = CurrencyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

// ============================================================================
// SECTION: Money
// ============================================================================

/// Monetary amount in integer minor units with its currency.
///
/// # Invariants
/// - `minor_units` is non-negative for all ledger amounts.
/// - Equality requires both the amount and the currency to match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in minor units (paise, cents).
    pub minor_units: i64,
    /// Currency code for the amount.
    pub currency: Currency,
}

impl Money {
    /// Creates an amount from minor units and a currency.
    #[must_use]
    pub const fn new(minor_units: i64, currency: Currency) -> Self {
        Self {
            minor_units,
            currency,
        }
    }

    /// Returns true when `other` matches this amount exactly (zero tolerance).
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self == other
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.minor_units, self.currency)
    }
}
