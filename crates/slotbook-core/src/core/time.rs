// crates/slotbook-core/src/core/time.rs
// ============================================================================
// Module: Slotbook Time Model
// Description: Canonical timestamps and calendar slot coordinates.
// Purpose: Provide deterministic, caller-supplied time values across Slotbook records.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Slotbook uses explicit time values supplied by hosts to keep the core
//! deterministic and testable. The core engine never reads wall-clock time
//! directly; request handlers and background tasks pass a [`Timestamp`] into
//! every operation. Slot coordinates (`SlotDate`, `SlotTime`) are validated
//! calendar strings with stable wire forms, because the slot key is an
//! identity, not an instant.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hold time-to-live applied to fresh reservations (5 minutes).
pub const HOLD_TTL_MS: i64 = 5 * 60 * 1_000;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp used in Slotbook records (unix epoch milliseconds).
///
/// # Invariants
/// - Values are explicitly provided by callers; the core never reads wall-clock time.
/// - No validation is performed; monotonicity is a caller responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns this timestamp shifted forward by `millis` (saturating).
    #[must_use]
    pub const fn plus_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Returns this timestamp shifted backward by `millis` (saturating).
    #[must_use]
    pub const fn minus_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_sub(millis))
    }

    /// Returns true when `self` is strictly before `other`.
    #[must_use]
    pub const fn is_before(self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Slot Coordinate Errors
// ============================================================================

/// Errors raised when parsing slot coordinates.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotTimeError {
    /// Date string is not `YYYY-MM-DD` or encodes an impossible date.
    #[error("invalid slot date: {0}")]
    InvalidDate(String),
    /// Time string is not `HH:MM` or encodes an impossible time of day.
    #[error("invalid slot time: {0}")]
    InvalidTime(String),
}

// ============================================================================
// SECTION: Slot Coordinates
// ============================================================================

/// Calendar date component of a slot key (`YYYY-MM-DD`).
///
/// # Invariants
/// - Stored form is exactly ten ASCII characters, zero-padded.
/// - Month is 1-12 and day is valid for the month (leap years included).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotDate(String);

impl SlotDate {
    /// Parses a slot date from its `YYYY-MM-DD` wire form.
    ///
    /// # Errors
    ///
    /// Returns [`SlotTimeError::InvalidDate`] when the input is malformed.
    pub fn parse(value: &str) -> Result<Self, SlotTimeError> {
        let bytes = value.as_bytes();
        if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
            return Err(SlotTimeError::InvalidDate(value.to_string()));
        }
        let year = parse_decimal(&value[0..4])
            .ok_or_else(|| SlotTimeError::InvalidDate(value.to_string()))?;
        let month = parse_decimal(&value[5..7])
            .ok_or_else(|| SlotTimeError::InvalidDate(value.to_string()))?;
        let day = parse_decimal(&value[8..10])
            .ok_or_else(|| SlotTimeError::InvalidDate(value.to_string()))?;
        if month < 1 || month > 12 || day < 1 || day > days_in_month(year, month) {
            return Err(SlotTimeError::InvalidDate(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the date as its `YYYY-MM-DD` wire form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for SlotDate {
    type Error = SlotTimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SlotDate> for String {
    fn from(value: SlotDate) -> Self {
        value.0
    }
}

/// Time-of-day component of a slot key (`HH:MM`, 24-hour).
///
/// # Invariants
/// - Stored form is exactly five ASCII characters, zero-padded.
/// - Hour is 0-23 and minute is 0-59.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotTime(String);

impl SlotTime {
    /// Parses a slot time from its `HH:MM` wire form.
    ///
    /// # Errors
    ///
    /// Returns [`SlotTimeError::InvalidTime`] when the input is malformed.
    pub fn parse(value: &str) -> Result<Self, SlotTimeError> {
        let bytes = value.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(SlotTimeError::InvalidTime(value.to_string()));
        }
        let hour = parse_decimal(&value[0..2])
            .ok_or_else(|| SlotTimeError::InvalidTime(value.to_string()))?;
        let minute = parse_decimal(&value[3..5])
            .ok_or_else(|| SlotTimeError::InvalidTime(value.to_string()))?;
        if hour > 23 || minute > 59 {
            return Err(SlotTimeError::InvalidTime(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the time as its `HH:MM` wire form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for SlotTime {
    type Error = SlotTimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SlotTime> for String {
    fn from(value: SlotTime) -> Self {
        value.0
    }
}

// ============================================================================
// SECTION: Parsing Helpers
// ============================================================================

/// Parses an all-digit decimal field (rejects signs and whitespace).
fn parse_decimal(value: &str) -> Option<u32> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Returns the day count for `month` in `year` (1-based month).
const fn days_in_month(year: u32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}
