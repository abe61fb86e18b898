// crates/slotbook-core/src/interfaces/mod.rs
// ============================================================================
// Module: Slotbook Store Interfaces
// Description: Backend-agnostic persistence contracts for the booking engine.
// Purpose: Express every mutation as unique-insert or compare-and-swap.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! Correctness of the booking engine rests entirely on two store
//! primitives: a uniqueness constraint that rejects a second insert for the
//! same logical key, and a conditional update that reports whether it
//! actually changed a row. The traits in this module express every mutation
//! through those primitives; no caller performs read-then-write without a
//! guard. Conflicts are modeled in return types so callers must branch on
//! them; errors are reserved for store failures.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::AttemptId;
use crate::core::Booking;
use crate::core::BookingId;
use crate::core::GatewayPaymentId;
use crate::core::NewBooking;
use crate::core::NewPaymentAttempt;
use crate::core::NewReservation;
use crate::core::NotificationKind;
use crate::core::OrderId;
use crate::core::OutboxTask;
use crate::core::PaymentAttempt;
use crate::core::ProviderId;
use crate::core::Reservation;
use crate::core::ReservationStatus;
use crate::core::SlotDate;
use crate::core::SlotTime;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Store errors shared by all persistence surfaces.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Conflicts are not errors; they appear in operation return types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// Store data is invalid.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// Store reported an error.
    #[error("store error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Operation Outcomes
// ============================================================================

/// Outcome of an atomic claim insert.
///
/// # Invariants
/// - `ActiveHolder` carries the reservation that blocked the insert as read
///   in the same atomic step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotClaim {
    /// The slot was free; the new reservation was inserted.
    Inserted(Reservation),
    /// An active reservation already blocks the slot.
    ActiveHolder(Reservation),
}

/// Outcome of a conditional status transition.
///
/// # Invariants
/// - `Applied` means exactly one row changed; `Unchanged` carries the
///   current row so idempotent callers can return it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The row matched `allowed_from` and was updated.
    Applied(Reservation),
    /// The row exists but its status was not in `allowed_from`.
    Unchanged(Reservation),
    /// No reservation exists for the order.
    Missing,
}

/// Outcome of a unique booking insert.
///
/// # Invariants
/// - `SlotTaken` carries the active booking that owns the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingInsert {
    /// The slot was free among active bookings; the booking was created.
    Created(Booking),
    /// An active booking already owns the slot.
    SlotTaken(Booking),
}

/// Outcome of recording a gateway payment identifier first-seen.
///
/// # Invariants
/// - `Recorded` covers both the first write and an identical replay;
///   `DifferentPayment` means the order already settled under another
///   gateway payment identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPayment {
    /// The identifier is recorded on the attempt (first write or replay).
    Recorded(PaymentAttempt),
    /// The attempt already carries a different gateway payment identifier.
    DifferentPayment(PaymentAttempt),
    /// No attempt exists for the order.
    Missing,
}

// ============================================================================
// SECTION: Reservation Store
// ============================================================================

/// Durable reservation store.
pub trait ReservationStore {
    /// Atomically inserts a `Held` reservation unless an active reservation
    /// (non-terminal status with unexpired hold) exists for the same slot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails; slot conflicts are
    /// reported through [`SlotClaim::ActiveHolder`].
    fn claim_slot(&self, new: &NewReservation, now: Timestamp) -> Result<SlotClaim, StoreError>;

    /// Loads a reservation by its order identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn find_by_order(&self, order_id: &OrderId) -> Result<Option<Reservation>, StoreError>;

    /// Compare-and-swap transition: moves the reservation for `order_id` to
    /// `to` only when its current status is in `allowed_from`, recording
    /// `payment_id` when provided and stamping `updated_at` with `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    fn transition(
        &self,
        order_id: &OrderId,
        allowed_from: &[ReservationStatus],
        to: ReservationStatus,
        payment_id: Option<&GatewayPaymentId>,
        now: Timestamp,
    ) -> Result<Transition, StoreError>;

    /// Lists reservations in `PaymentConfirmed` with no linked booking,
    /// updated at or after `window_start`, bounded by `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when scanning fails.
    fn confirmed_without_booking(
        &self,
        window_start: Timestamp,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Lists reservations still `Held`/`PaymentPending` whose hold lapsed
    /// before `now`, bounded by `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when scanning fails.
    fn expired_holds(&self, now: Timestamp, limit: usize)
    -> Result<Vec<Reservation>, StoreError>;

    /// Reports store readiness for liveness/readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Payment Ledger
// ============================================================================

/// Durable payment attempt ledger.
pub trait PaymentLedger {
    /// Creates a pending attempt; `order_id` is unique across the ledger.
    /// Returns the existing attempt when the order is already recorded, so
    /// claim retries are idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    fn create_pending(&self, new: &NewPaymentAttempt) -> Result<PaymentAttempt, StoreError>;

    /// Loads an attempt by its order identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn find_by_order(&self, order_id: &OrderId) -> Result<Option<PaymentAttempt>, StoreError>;

    /// Loads an attempt by its gateway payment identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn find_by_gateway_payment(
        &self,
        payment_id: &GatewayPaymentId,
    ) -> Result<Option<PaymentAttempt>, StoreError>;

    /// Records the gateway payment identifier on an attempt first-seen:
    /// writes when null, accepts an identical replay, and reports a
    /// different identifier as [`RecordPayment::DifferentPayment`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    fn record_gateway_payment(
        &self,
        order_id: &OrderId,
        payment_id: &GatewayPaymentId,
    ) -> Result<RecordPayment, StoreError>;

    /// Marks the attempt `Success` when still `Pending` (no-op otherwise).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    fn mark_success(
        &self,
        order_id: &OrderId,
        completed_at: Timestamp,
    ) -> Result<Option<PaymentAttempt>, StoreError>;

    /// Marks the attempt `Failed` when still `Pending` (no-op otherwise).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    fn mark_failed(
        &self,
        order_id: &OrderId,
        completed_at: Timestamp,
    ) -> Result<Option<PaymentAttempt>, StoreError>;

    /// Links the booking created for this attempt (set-once).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    fn link_booking(&self, attempt_id: AttemptId, booking_id: BookingId)
    -> Result<(), StoreError>;

    /// Flags the attempt for manual operator review with a reason. The flag
    /// is never cleared by the engine.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    fn flag_manual_review(&self, attempt_id: AttemptId, reason: &str) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Booking Store
// ============================================================================

/// Durable booking store.
pub trait BookingStore {
    /// Inserts a booking under the active-slot uniqueness constraint. This
    /// constraint is the last line of defense against double-booking and
    /// must hold even when the reservation guard was bypassed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails; slot conflicts are
    /// reported through [`BookingInsert::SlotTaken`].
    fn insert_unique(&self, new: &NewBooking) -> Result<BookingInsert, StoreError>;

    /// Loads a booking by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn find_by_id(&self, booking_id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Loads the booking funded by an attempt, when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn find_by_attempt(&self, attempt_id: AttemptId) -> Result<Option<Booking>, StoreError>;

    /// Loads the active (non-cancelled) booking for a slot, when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn active_for_slot(
        &self,
        provider_id: ProviderId,
        date: &SlotDate,
        time: &SlotTime,
    ) -> Result<Option<Booking>, StoreError>;
}

// ============================================================================
// SECTION: Outbox Store
// ============================================================================

/// Durable notification outbox.
pub trait OutboxStore {
    /// Enqueues a task for (`booking_id`, `kind`); a no-op when the pair
    /// already exists, making enqueue safe to replay.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    fn enqueue(
        &self,
        booking_id: BookingId,
        kind: NotificationKind,
        now: Timestamp,
    ) -> Result<(), StoreError>;

    /// Lists pending tasks, oldest first, bounded by `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when scanning fails.
    fn due(&self, limit: usize) -> Result<Vec<OutboxTask>, StoreError>;

    /// Marks a task `Sent` when still `Pending` (no-op otherwise).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    fn mark_sent(&self, task_id: u64, now: Timestamp) -> Result<(), StoreError>;

    /// Records a failed delivery attempt; the task flips to `Dead` when
    /// `attempts` reaches `max_attempts`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    fn mark_failed(
        &self,
        task_id: u64,
        error: &str,
        max_attempts: u32,
        now: Timestamp,
    ) -> Result<(), StoreError>;
}
