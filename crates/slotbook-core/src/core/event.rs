// crates/slotbook-core/src/core/event.rs
// ============================================================================
// Module: Slotbook Gateway Events
// Description: Strict tagged-union model of inbound payment gateway events.
// Purpose: Fail closed on unknown or malformed webhook payloads.
// Dependencies: crate::core::{identifiers, money}, serde, serde_json
// ============================================================================

//! ## Overview
//! The payment gateway is an untrusted, at-least-once event source. Inbound
//! payloads are parsed into a closed set of known event types with strict
//! schema validation; unrecognized event labels and unexpected fields are
//! rejected rather than best-effort extracted. Signature verification
//! happens before parsing (see [`crate::core::signature`]) — this module
//! only sees bodies that already authenticated.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::GatewayPaymentId;
use crate::core::identifiers::OrderId;
use crate::core::money::Currency;
use crate::core::money::Money;

// ============================================================================
// SECTION: Event Labels
// ============================================================================

/// Wire label for payment capture events.
const EVENT_PAYMENT_CAPTURED: &str = "payment.captured";
/// Wire label for payment failure events.
const EVENT_PAYMENT_FAILED: &str = "payment.failed";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when parsing a webhook body into a gateway event.
///
/// # Invariants
/// - Variants are stable for programmatic handling; `Unrecognized` carries
///   the offending label so it can be audited without replaying the body.
#[derive(Debug, Error)]
pub enum EventParseError {
    /// Body is not a JSON object of the expected envelope shape.
    #[error("malformed gateway event envelope: {0}")]
    Envelope(String),
    /// Event label is not one this engine processes.
    #[error("unrecognized gateway event: {0}")]
    Unrecognized(String),
    /// Payload for a known event label failed strict validation.
    #[error("invalid payload for {label}: {reason}")]
    Payload {
        /// Event label whose payload failed validation.
        label: String,
        /// Validation failure description.
        reason: String,
    },
}

// ============================================================================
// SECTION: Wire Envelope
// ============================================================================

/// Raw webhook envelope: an event label plus an uninterpreted payload.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EventEnvelope {
    /// Event label, e.g. `payment.captured`.
    event: String,
    /// Event payload, validated per label.
    payload: Value,
}

/// Strict payload for `payment.captured`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CapturedPayload {
    /// Merchant order identifier.
    order_id: String,
    /// Gateway payment identifier.
    payment_id: String,
    /// Captured amount in minor units.
    amount: i64,
    /// Currency code of the captured amount.
    currency: Currency,
}

/// Strict payload for `payment.failed`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FailedPayload {
    /// Merchant order identifier.
    order_id: String,
    /// Gateway payment identifier, when the gateway assigned one.
    #[serde(default)]
    payment_id: Option<String>,
    /// Gateway-reported failure reason.
    #[serde(default)]
    reason: Option<String>,
}

// ============================================================================
// SECTION: Gateway Event
// ============================================================================

/// Parsed gateway event.
///
/// # Invariants
/// - Only event labels this engine processes are representable; everything
///   else fails parsing with [`EventParseError::Unrecognized`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Payment was captured for an order.
    PaymentCaptured {
        /// Merchant order identifier.
        order_id: OrderId,
        /// Gateway payment identifier.
        payment_id: GatewayPaymentId,
        /// Captured amount.
        amount: Money,
    },
    /// Payment failed for an order.
    PaymentFailed {
        /// Merchant order identifier.
        order_id: OrderId,
        /// Gateway payment identifier, when assigned.
        payment_id: Option<GatewayPaymentId>,
        /// Gateway-reported failure reason.
        reason: Option<String>,
    },
}

impl GatewayEvent {
    /// Parses a verified webhook body into a gateway event.
    ///
    /// # Errors
    ///
    /// Returns [`EventParseError`] when the envelope is malformed, the event
    /// label is unrecognized, or the payload fails strict validation.
    pub fn parse(raw_body: &[u8]) -> Result<Self, EventParseError> {
        let envelope: EventEnvelope = serde_json::from_slice(raw_body)
            .map_err(|err| EventParseError::Envelope(err.to_string()))?;
        match envelope.event.as_str() {
            EVENT_PAYMENT_CAPTURED => {
                let payload: CapturedPayload = serde_json::from_value(envelope.payload).map_err(
                    |err| EventParseError::Payload {
                        label: EVENT_PAYMENT_CAPTURED.to_string(),
                        reason: err.to_string(),
                    },
                )?;
                if payload.order_id.is_empty() || payload.payment_id.is_empty() {
                    return Err(EventParseError::Payload {
                        label: EVENT_PAYMENT_CAPTURED.to_string(),
                        reason: "empty order_id or payment_id".to_string(),
                    });
                }
                if payload.amount < 0 {
                    return Err(EventParseError::Payload {
                        label: EVENT_PAYMENT_CAPTURED.to_string(),
                        reason: "negative amount".to_string(),
                    });
                }
                Ok(Self::PaymentCaptured {
                    order_id: OrderId::new(payload.order_id),
                    payment_id: GatewayPaymentId::new(payload.payment_id),
                    amount: Money::new(payload.amount, payload.currency),
                })
            }
            EVENT_PAYMENT_FAILED => {
                let payload: FailedPayload = serde_json::from_value(envelope.payload).map_err(
                    |err| EventParseError::Payload {
                        label: EVENT_PAYMENT_FAILED.to_string(),
                        reason: err.to_string(),
                    },
                )?;
                if payload.order_id.is_empty() {
                    return Err(EventParseError::Payload {
                        label: EVENT_PAYMENT_FAILED.to_string(),
                        reason: "empty order_id".to_string(),
                    });
                }
                Ok(Self::PaymentFailed {
                    order_id: OrderId::new(payload.order_id),
                    payment_id: payload.payment_id.map(GatewayPaymentId::new),
                    reason: payload.reason,
                })
            }
            other => Err(EventParseError::Unrecognized(other.to_string())),
        }
    }

    /// Returns the event's wire label for audit events.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::PaymentCaptured {
                ..
            } => EVENT_PAYMENT_CAPTURED,
            Self::PaymentFailed {
                ..
            } => EVENT_PAYMENT_FAILED,
        }
    }
}
