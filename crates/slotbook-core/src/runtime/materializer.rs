// crates/slotbook-core/src/runtime/materializer.rs
// ============================================================================
// Module: Slotbook Booking Materializer
// Description: Exactly-once booking creation for confirmed payments.
// Purpose: Turn a confirmed payment into the one booking its slot can hold.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The materializer inserts the booking under the store's active-slot
//! uniqueness constraint. The reservation hold is advisory and short-lived;
//! the booking table's own constraint is the last line of defense and the
//! one that must never be weakened. Two concurrent materializations of the
//! same attempt converge on the same booking; a foreign conflict preserves
//! the payment, flags it for manual review, and never forces a second
//! booking into existence.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::Booking;
use crate::core::NewBooking;
use crate::core::NotificationKind;
use crate::core::PaymentAttempt;
use crate::core::ReservationStatus;
use crate::core::Timestamp;
use crate::interfaces::BookingInsert;
use crate::interfaces::StoreError;
use crate::runtime::store::SharedStores;

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Materialization outcome.
///
/// # Invariants
/// - `Conflict` means the payment was preserved without a booking and the
///   attempt was flagged for manual review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    /// A fresh booking was created for the attempt.
    Created(Booking),
    /// The attempt's booking already existed (duplicate call).
    AlreadyBooked(Booking),
    /// A different payment owns the slot; no booking was created.
    Conflict {
        /// The booking that owns the slot.
        existing: Booking,
    },
}

impl Materialized {
    /// Returns the attempt's own booking when one exists.
    #[must_use]
    pub const fn booking(&self) -> Option<&Booking> {
        match self {
            Self::Created(booking) | Self::AlreadyBooked(booking) => Some(booking),
            Self::Conflict {
                ..
            } => None,
        }
    }
}

/// Materializer errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum MaterializerError {
    /// Store failure; safe to retry (every step is idempotent).
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Booking Materializer
// ============================================================================

/// Creates bookings exactly once per successful payment attempt.
#[derive(Clone)]
pub struct BookingMaterializer {
    /// Shared store handles.
    stores: SharedStores,
}

impl BookingMaterializer {
    /// Creates a materializer over the given stores.
    #[must_use]
    pub const fn new(stores: SharedStores) -> Self {
        Self {
            stores,
        }
    }

    /// Materializes the booking for a confirmed payment attempt.
    ///
    /// On creation the attempt is linked to the booking, the reservation is
    /// advanced to `Booked` (including the late-capture path out of
    /// `Expired`/`Failed` — the only place that exception is applied), and
    /// notification tasks are enqueued. On a uniqueness violation the
    /// conflicting booking is re-read: the attempt's own booking means a
    /// concurrent duplicate call and is returned as success; a foreign
    /// booking flags the attempt for manual review.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializerError::Store`] on store failure; conflicts are
    /// modeled in [`Materialized`].
    pub fn materialize(
        &self,
        attempt: &PaymentAttempt,
        now: Timestamp,
    ) -> Result<Materialized, MaterializerError> {
        let new = NewBooking {
            provider_id: attempt.provider_id,
            client_id: attempt.client_id,
            date: attempt.date.clone(),
            time: attempt.time.clone(),
            attempt_id: attempt.id,
            created_at: now,
        };
        match self.stores.bookings().insert_unique(&new)? {
            BookingInsert::Created(booking) => {
                self.finish(attempt, &booking, now)?;
                Ok(Materialized::Created(booking))
            }
            BookingInsert::SlotTaken(existing) if existing.attempt_id == attempt.id => {
                // Our own booking, created by a concurrent duplicate call.
                self.finish(attempt, &existing, now)?;
                Ok(Materialized::AlreadyBooked(existing))
            }
            BookingInsert::SlotTaken(existing) => {
                self.stores.payments().flag_manual_review(
                    attempt.id,
                    &format!("slot already booked by booking {}", existing.id),
                )?;
                Ok(Materialized::Conflict {
                    existing,
                })
            }
        }
    }

    /// Links the attempt, advances the reservation, and enqueues
    /// notifications. Every step is an idempotent set-once or CAS, so this
    /// is safe to replay after a partial failure.
    fn finish(
        &self,
        attempt: &PaymentAttempt,
        booking: &Booking,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        self.stores.payments().link_booking(attempt.id, booking.id)?;
        // Expired/Failed appear here so a late capture retroactively accepts
        // the lapsed hold; Missing covers the legacy reservation-less path.
        let _ = self.stores.reservations().transition(
            &attempt.order_id,
            &[
                ReservationStatus::PaymentConfirmed,
                ReservationStatus::Expired,
                ReservationStatus::Failed,
            ],
            ReservationStatus::Booked,
            attempt.gateway_payment_id.as_ref(),
            now,
        )?;
        for kind in NotificationKind::ALL {
            // Fire-and-forget: an enqueue failure must never roll back the
            // booking. A replayed delivery re-enqueues the missing tasks.
            let _ = self.stores.outbox().enqueue(booking.id, kind, now);
        }
        Ok(())
    }
}
