// crates/slotbook-core/src/core/payment.rs
// ============================================================================
// Module: Slotbook Payment Records
// Description: Merchant-side payment attempt records.
// Purpose: Track expected money per reservation and anchor webhook idempotency.
// Dependencies: crate::core::{identifiers, money, time}, serde
// ============================================================================

//! ## Overview
//! A payment attempt is the merchant's own record of money expected for one
//! reservation, keyed by the merchant order identifier and later enriched
//! with the gateway's payment identifier. The gateway payment identifier is
//! globally unique once set — that uniqueness is what makes webhook replays
//! collapse into a single booking. Slot details are denormalized onto the
//! attempt so the legacy reservation-less path can still materialize.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::AttemptId;
use crate::core::identifiers::BookingId;
use crate::core::identifiers::ClientId;
use crate::core::identifiers::GatewayPaymentId;
use crate::core::identifiers::OrderId;
use crate::core::identifiers::ProviderId;
use crate::core::identifiers::ReservationId;
use crate::core::money::Money;
use crate::core::time::SlotDate;
use crate::core::time::SlotTime;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Payment Status
// ============================================================================

/// Payment attempt lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and store queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting gateway settlement.
    Pending,
    /// Gateway confirmed capture.
    Success,
    /// Gateway reported failure, the hold lapsed, or the amount mismatched.
    Failed,
}

impl PaymentStatus {
    /// Returns true once the attempt has settled either way.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Returns a stable label for store predicates and audit events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

// ============================================================================
// SECTION: Payment Attempt Records
// ============================================================================

/// Payload for creating a pending payment attempt at claim time.
///
/// # Invariants
/// - `order_id` must be unique across the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPaymentAttempt {
    /// Merchant order identifier (gateway-facing, unique).
    pub order_id: OrderId,
    /// Reservation the money is expected for (`None` only on the legacy path).
    pub reservation_id: Option<ReservationId>,
    /// Expected amount.
    pub amount: Money,
    /// Provider for the denormalized slot details.
    pub provider_id: ProviderId,
    /// Client for the denormalized slot details.
    pub client_id: ClientId,
    /// Slot date for the denormalized slot details.
    pub date: SlotDate,
    /// Slot time for the denormalized slot details.
    pub time: SlotTime,
    /// Creation instant.
    pub created_at: Timestamp,
}

/// Durable payment attempt record.
///
/// # Invariants
/// - `order_id` is unique; `gateway_payment_id`, once non-null, is globally unique.
/// - `booking_id` is set at most once, by the materializer.
/// - `manual_review` marks money preserved without a booking; it is never
///   cleared by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    /// Attempt identifier.
    pub id: AttemptId,
    /// Merchant order identifier (gateway-facing, unique).
    pub order_id: OrderId,
    /// Gateway payment identifier, recorded first-seen from the webhook.
    pub gateway_payment_id: Option<GatewayPaymentId>,
    /// Reservation the money is expected for (`None` only on the legacy path).
    pub reservation_id: Option<ReservationId>,
    /// Expected amount.
    pub amount: Money,
    /// Lifecycle status.
    pub status: PaymentStatus,
    /// Booking created for this attempt, once materialized.
    pub booking_id: Option<BookingId>,
    /// Manual-review reason when money was preserved without a booking.
    pub manual_review: Option<String>,
    /// Provider for the denormalized slot details.
    pub provider_id: ProviderId,
    /// Client for the denormalized slot details.
    pub client_id: ClientId,
    /// Slot date for the denormalized slot details.
    pub date: SlotDate,
    /// Slot time for the denormalized slot details.
    pub time: SlotTime,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Settlement instant, once settled.
    pub completed_at: Option<Timestamp>,
}
