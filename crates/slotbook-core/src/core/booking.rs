// crates/slotbook-core/src/core/booking.rs
// ============================================================================
// Module: Slotbook Booking Records
// Description: Materialized appointment records.
// Purpose: Capture the artifact created exactly once per successful payment.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! A booking is the actual appointment consumed by the rest of the system
//! (notifications, receipts, calendars). It is created exactly once per
//! successful payment attempt. Uniqueness of the slot among non-cancelled
//! bookings is enforced by the store itself — the reservation-level hold is
//! a best-effort optimization, not a substitute for this constraint.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::AttemptId;
use crate::core::identifiers::BookingId;
use crate::core::identifiers::ClientId;
use crate::core::identifiers::ProviderId;
use crate::core::time::SlotDate;
use crate::core::time::SlotTime;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Booking Status
// ============================================================================

/// Booking lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and store queries.
/// - Only `Cancelled` releases the slot for new bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Appointment stands.
    Confirmed,
    /// Appointment was cancelled; the slot is free again.
    Cancelled,
}

impl BookingStatus {
    /// Returns a stable label for store predicates and audit events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

// ============================================================================
// SECTION: Booking Records
// ============================================================================

/// Payload for inserting a booking at materialization time.
///
/// # Invariants
/// - `attempt_id` must be unique across bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    /// Provider for the appointment.
    pub provider_id: ProviderId,
    /// Client for the appointment.
    pub client_id: ClientId,
    /// Slot date.
    pub date: SlotDate,
    /// Slot time of day.
    pub time: SlotTime,
    /// Payment attempt that funded this booking.
    pub attempt_id: AttemptId,
    /// Materialization instant.
    pub created_at: Timestamp,
}

/// Durable booking record.
///
/// # Invariants
/// - At most one non-cancelled booking per (provider, date, time); enforced
///   by the store's unique constraint, which is the last line of defense
///   against double-booking.
/// - Exactly one booking per payment attempt that reaches success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking identifier.
    pub id: BookingId,
    /// Provider for the appointment.
    pub provider_id: ProviderId,
    /// Client for the appointment.
    pub client_id: ClientId,
    /// Slot date.
    pub date: SlotDate,
    /// Slot time of day.
    pub time: SlotTime,
    /// Payment attempt that funded this booking.
    pub attempt_id: AttemptId,
    /// Lifecycle status.
    pub status: BookingStatus,
    /// Materialization instant.
    pub created_at: Timestamp,
}
