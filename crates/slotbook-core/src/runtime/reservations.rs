// crates/slotbook-core/src/runtime/reservations.rs
// ============================================================================
// Module: Slotbook Reservation Manager
// Description: Claim, advance, and release operations for slot holds.
// Purpose: Own the reservation state machine used by booking initiation and webhooks.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The reservation manager is the only writer of reservation status. A claim
//! atomically inserts a `Held` reservation (unless an active holder blocks
//! the slot) and creates the pending payment attempt for it in the same
//! logical step. Advancement is a compare-and-swap through the state
//! diagram, which makes duplicate calls naturally idempotent: the second
//! caller observes the already-advanced record.
//!
//! Expiry is a dual check. A lapsed `Held`/`PaymentPending` hold stops
//! blocking new claims the moment its deadline passes — before any sweep
//! runs — but only the sweep flips the stored status to `Expired`. The gap
//! is what lets a late payment confirmation still be honored when nobody
//! else has taken the slot.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::ClientId;
use crate::core::GatewayPaymentId;
use crate::core::HOLD_TTL_MS;
use crate::core::Money;
use crate::core::NewPaymentAttempt;
use crate::core::NewReservation;
use crate::core::OrderId;
use crate::core::ProviderId;
use crate::core::Reservation;
use crate::core::ReservationId;
use crate::core::ReservationStatus;
use crate::core::SlotDate;
use crate::core::SlotTime;
use crate::core::Timestamp;
use crate::interfaces::SlotClaim;
use crate::interfaces::StoreError;
use crate::interfaces::Transition;
use crate::runtime::store::SharedStores;

// ============================================================================
// SECTION: Requests and Outcomes
// ============================================================================

/// Booking-initiation claim request.
///
/// # Invariants
/// - `order_id` is generated by the caller before gateway order creation and
///   is unique per payment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    /// Provider whose slot is requested.
    pub provider_id: ProviderId,
    /// Client requesting the slot.
    pub client_id: ClientId,
    /// Slot date.
    pub date: SlotDate,
    /// Slot time of day.
    pub time: SlotTime,
    /// Merchant order identifier for the payment attempt.
    pub order_id: OrderId,
    /// Expected amount for the session.
    pub amount: Money,
}

/// Successful claim outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// A fresh hold was created.
    Claimed(Reservation),
    /// The caller retried its own claim; the existing hold is returned.
    AlreadyHeld(Reservation),
}

impl ClaimOutcome {
    /// Returns the reservation either way.
    #[must_use]
    pub const fn reservation(&self) -> &Reservation {
        match self {
            Self::Claimed(reservation) | Self::AlreadyHeld(reservation) => reservation,
        }
    }
}

/// Claim errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling; `SlotHeld` is surfaced
///   to the end user as "please choose another time" and never retried
///   automatically.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// Another client actively holds the slot.
    #[error("slot is actively held by another client")]
    SlotHeld,
    /// Store failure; the caller may retry.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Reservation Manager
// ============================================================================

/// Owner of the reservation state machine.
#[derive(Clone)]
pub struct ReservationManager {
    /// Shared store handles.
    stores: SharedStores,
    /// Hold time-to-live applied at claim time.
    hold_ttl_ms: i64,
}

impl ReservationManager {
    /// Creates a manager over the given stores with the default hold TTL.
    #[must_use]
    pub const fn new(stores: SharedStores) -> Self {
        Self {
            stores,
            hold_ttl_ms: HOLD_TTL_MS,
        }
    }

    /// Overrides the hold TTL (deployment-configured, still minutes-scale).
    #[must_use]
    pub const fn with_hold_ttl_ms(mut self, hold_ttl_ms: i64) -> Self {
        self.hold_ttl_ms = hold_ttl_ms;
        self
    }

    /// Claims a slot for a client and creates the pending payment attempt.
    ///
    /// Exactly one of two concurrent claims for the same slot wins; the
    /// loser observes `SlotHeld`, or its own winning record when it retried
    /// with the same (client, order) pair.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::SlotHeld`] when another client actively holds
    /// the slot and [`ClaimError::Store`] on store failure.
    pub fn claim(&self, request: &ClaimRequest, now: Timestamp) -> Result<ClaimOutcome, ClaimError> {
        let new = NewReservation {
            provider_id: request.provider_id,
            client_id: request.client_id,
            date: request.date.clone(),
            time: request.time.clone(),
            order_id: request.order_id.clone(),
            expires_at: now.plus_millis(self.hold_ttl_ms),
            created_at: now,
        };
        let reservation = match self.stores.reservations().claim_slot(&new, now)? {
            SlotClaim::Inserted(reservation) => {
                self.create_attempt(request, reservation.id, now)?;
                return Ok(ClaimOutcome::Claimed(reservation));
            }
            SlotClaim::ActiveHolder(holder) => holder,
        };
        if reservation.client_id == request.client_id && reservation.order_id == request.order_id {
            // Retry of the caller's own claim; make sure the attempt exists too.
            self.create_attempt(request, reservation.id, now)?;
            return Ok(ClaimOutcome::AlreadyHeld(reservation));
        }
        Err(ClaimError::SlotHeld)
    }

    /// Advances the reservation for `order_id` to `to` when its current
    /// status is a valid predecessor; otherwise a no-op returning the
    /// current record, which makes duplicate calls idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    pub fn advance(
        &self,
        order_id: &OrderId,
        to: ReservationStatus,
        payment_id: Option<&GatewayPaymentId>,
        now: Timestamp,
    ) -> Result<Transition, StoreError> {
        let allowed: Vec<ReservationStatus> = [
            ReservationStatus::Held,
            ReservationStatus::PaymentPending,
            ReservationStatus::PaymentConfirmed,
        ]
        .into_iter()
        .filter(|from| from.can_advance_to(to))
        .collect();
        self.stores.reservations().transition(order_id, &allowed, to, payment_id, now)
    }

    /// Releases the reservation for `order_id` to `Failed` unless it is
    /// already terminal (no-op in that case).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    pub fn release(&self, order_id: &OrderId, now: Timestamp) -> Result<bool, StoreError> {
        let outcome = self.stores.reservations().transition(
            order_id,
            &[
                ReservationStatus::Held,
                ReservationStatus::PaymentPending,
                ReservationStatus::PaymentConfirmed,
            ],
            ReservationStatus::Failed,
            None,
            now,
        )?;
        Ok(matches!(outcome, Transition::Applied(_)))
    }

    /// Creates the pending payment attempt tied to a reservation. Safe to
    /// replay: the ledger returns the existing attempt for a known order.
    fn create_attempt(
        &self,
        request: &ClaimRequest,
        reservation_id: ReservationId,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let new = NewPaymentAttempt {
            order_id: request.order_id.clone(),
            reservation_id: Some(reservation_id),
            amount: request.amount.clone(),
            provider_id: request.provider_id,
            client_id: request.client_id,
            date: request.date.clone(),
            time: request.time.clone(),
            created_at: now,
        };
        self.stores.payments().create_pending(&new).map(|_| ())
    }
}
