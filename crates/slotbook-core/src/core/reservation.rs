// crates/slotbook-core/src/core/reservation.rs
// ============================================================================
// Module: Slotbook Reservation Records
// Description: Slot hold records and the reservation status machine.
// Purpose: Capture the exclusive, time-limited claim on a provider slot.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! A reservation is one client's exclusive, time-limited claim on a
//! (provider, date, time) slot while payment is in flight. Reservations are
//! never physically deleted — they are retained as an audit trail — and
//! become immutable once terminal, with a single documented exception: the
//! materializer may move `Expired`/`Failed` to `Booked` when a late payment
//! capture lands on a still-free slot.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ClientId;
use crate::core::identifiers::GatewayPaymentId;
use crate::core::identifiers::OrderId;
use crate::core::identifiers::ProviderId;
use crate::core::identifiers::ReservationId;
use crate::core::time::SlotDate;
use crate::core::time::SlotTime;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Reservation Status
// ============================================================================

/// Reservation lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and store queries.
/// - The success path is `Held → PaymentPending → PaymentConfirmed → Booked`;
///   `Failed` and `Expired` are terminal and reachable from any non-terminal
///   state. No transition moves backward or skips from `Held` to `Booked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Slot is held; the gateway order has not been handed to the client yet.
    Held,
    /// Client has been handed the gateway order; awaiting confirmation.
    PaymentPending,
    /// Gateway confirmed payment; booking not yet materialized.
    PaymentConfirmed,
    /// Booking exists for this reservation (terminal success).
    Booked,
    /// Payment failed or the hold was released (terminal).
    Failed,
    /// Hold timed out and was swept (terminal).
    Expired,
}

impl ReservationStatus {
    /// Returns true for terminal statuses.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Booked | Self::Failed | Self::Expired)
    }

    /// Returns true when a reservation in this status still occupies its slot
    /// (subject to the separate expiry-time check).
    #[must_use]
    pub const fn occupies_slot(self) -> bool {
        matches!(self, Self::Held | Self::PaymentPending | Self::PaymentConfirmed | Self::Booked)
    }

    /// Returns true when `self` is a valid predecessor of `to` on the state
    /// diagram. Terminal states have no successors here; the late-capture
    /// exception is applied explicitly by the materializer, not by this
    /// predicate.
    #[must_use]
    pub const fn can_advance_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Held, Self::PaymentPending)
                | (Self::Held | Self::PaymentPending, Self::PaymentConfirmed)
                | (Self::PaymentConfirmed, Self::Booked)
                | (Self::Held | Self::PaymentPending | Self::PaymentConfirmed, Self::Failed)
                | (Self::Held | Self::PaymentPending, Self::Expired)
        )
    }

    /// Returns a stable label for store predicates and audit events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Held => "held",
            Self::PaymentPending => "payment_pending",
            Self::PaymentConfirmed => "payment_confirmed",
            Self::Booked => "booked",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

// ============================================================================
// SECTION: Reservation Records
// ============================================================================

/// Payload for inserting a fresh reservation at claim time.
///
/// # Invariants
/// - `expires_at` is the claim time plus the configured hold TTL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    /// Provider whose slot is being claimed.
    pub provider_id: ProviderId,
    /// Client claiming the slot.
    pub client_id: ClientId,
    /// Slot date.
    pub date: SlotDate,
    /// Slot time of day.
    pub time: SlotTime,
    /// Merchant order identifier correlating the payment attempt.
    pub order_id: OrderId,
    /// Hold expiry instant.
    pub expires_at: Timestamp,
    /// Claim instant.
    pub created_at: Timestamp,
}

/// Durable reservation record.
///
/// # Invariants
/// - At most one reservation with an active status and unexpired hold exists
///   per (provider, date, time); enforced atomically at claim time by the store.
/// - `payment_id` is set at most once, when the gateway confirms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier.
    pub id: ReservationId,
    /// Provider whose slot is held.
    pub provider_id: ProviderId,
    /// Client holding the slot.
    pub client_id: ClientId,
    /// Slot date.
    pub date: SlotDate,
    /// Slot time of day.
    pub time: SlotTime,
    /// Merchant order identifier correlating the payment attempt.
    pub order_id: OrderId,
    /// Lifecycle status.
    pub status: ReservationStatus,
    /// Hold expiry instant.
    pub expires_at: Timestamp,
    /// Gateway payment identifier once confirmed.
    pub payment_id: Option<GatewayPaymentId>,
    /// Claim instant.
    pub created_at: Timestamp,
    /// Last mutation instant.
    pub updated_at: Timestamp,
}

impl Reservation {
    /// Returns true when this reservation blocks a new claim on its slot at
    /// `now`: the status occupies the slot and, for pre-payment statuses, the
    /// hold has not timed out. `PaymentConfirmed` and `Booked` never expire by
    /// time — the money has been taken and the slot must stay blocked.
    #[must_use]
    pub fn blocks_claim_at(&self, now: Timestamp) -> bool {
        match self.status {
            ReservationStatus::Held | ReservationStatus::PaymentPending => {
                now.is_before(self.expires_at)
            }
            ReservationStatus::PaymentConfirmed | ReservationStatus::Booked => true,
            ReservationStatus::Failed | ReservationStatus::Expired => false,
        }
    }

    /// Returns true when the hold has timed out while still awaiting payment.
    #[must_use]
    pub fn hold_lapsed_at(&self, now: Timestamp) -> bool {
        matches!(self.status, ReservationStatus::Held | ReservationStatus::PaymentPending)
            && !now.is_before(self.expires_at)
    }
}
