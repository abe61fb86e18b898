// crates/slotbook-core/src/core/outbox.rs
// ============================================================================
// Module: Slotbook Outbox Records
// Description: Durable notification task records.
// Purpose: Replace in-process "already sent" flags with per-entity markers.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Side effects of a booking (receipt, email, WhatsApp message, meeting
//! link) are decoupled from the booking transaction through a durable
//! outbox. Each task row is the idempotency marker for one (booking, kind)
//! pair, so any number of stateless pump instances can drain the queue
//! without duplicate sends. Task failure never affects the booking.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::BookingId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Notification Kinds
// ============================================================================

/// Notification kinds fanned out after materialization.
///
/// # Invariants
/// - Variants are stable for serialization and store queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Booking confirmation email to the client.
    ConfirmationEmail,
    /// Booking confirmation WhatsApp message to the client.
    ConfirmationWhatsApp,
    /// Receipt document generation.
    Receipt,
    /// Meeting-link creation for the appointment.
    MeetingLink,
}

impl NotificationKind {
    /// All kinds enqueued for a fresh booking.
    pub const ALL: [Self; 4] =
        [Self::ConfirmationEmail, Self::ConfirmationWhatsApp, Self::Receipt, Self::MeetingLink];

    /// Returns a stable label for store predicates and audit events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfirmationEmail => "confirmation_email",
            Self::ConfirmationWhatsApp => "confirmation_whatsapp",
            Self::Receipt => "receipt",
            Self::MeetingLink => "meeting_link",
        }
    }
}

// ============================================================================
// SECTION: Outbox Status
// ============================================================================

/// Outbox task lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and store queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Awaiting delivery.
    Pending,
    /// Delivered; this row is the durable "sent" marker.
    Sent,
    /// Retries exhausted; requires operator attention.
    Dead,
}

impl OutboxStatus {
    /// Returns a stable label for store predicates and audit events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Dead => "dead",
        }
    }
}

// ============================================================================
// SECTION: Outbox Task Records
// ============================================================================

/// Durable outbox task record.
///
/// # Invariants
/// - Unique per (`booking_id`, `kind`); re-enqueueing an existing pair is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxTask {
    /// Task identifier (store-assigned, non-zero).
    pub id: u64,
    /// Booking the notification belongs to.
    pub booking_id: BookingId,
    /// Notification kind.
    pub kind: NotificationKind,
    /// Lifecycle status.
    pub status: OutboxStatus,
    /// Delivery attempts so far.
    pub attempts: u32,
    /// Last delivery error, when any attempt failed.
    pub last_error: Option<String>,
    /// Enqueue instant.
    pub created_at: Timestamp,
    /// Delivery instant, once sent.
    pub sent_at: Option<Timestamp>,
}
