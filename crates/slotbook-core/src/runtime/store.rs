// crates/slotbook-core/src/runtime/store.rs
// ============================================================================
// Module: Slotbook In-Memory Store
// Description: Single-mutex in-memory store for tests and local runs.
// Purpose: Provide the store primitives without external dependencies.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This module provides an in-memory implementation of the four store
//! interfaces for tests and local demos. A single mutex guards all tables,
//! which makes claim inserts and conditional transitions atomic exactly the
//! way a transactional backend would. It is not intended for production use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::AttemptId;
use crate::core::Booking;
use crate::core::BookingId;
use crate::core::BookingStatus;
use crate::core::GatewayPaymentId;
use crate::core::NewBooking;
use crate::core::NewPaymentAttempt;
use crate::core::NewReservation;
use crate::core::NotificationKind;
use crate::core::OrderId;
use crate::core::OutboxStatus;
use crate::core::OutboxTask;
use crate::core::PaymentAttempt;
use crate::core::PaymentStatus;
use crate::core::ProviderId;
use crate::core::Reservation;
use crate::core::ReservationId;
use crate::core::ReservationStatus;
use crate::core::SlotDate;
use crate::core::SlotTime;
use crate::core::Timestamp;
use crate::interfaces::BookingInsert;
use crate::interfaces::BookingStore;
use crate::interfaces::OutboxStore;
use crate::interfaces::PaymentLedger;
use crate::interfaces::RecordPayment;
use crate::interfaces::ReservationStore;
use crate::interfaces::SlotClaim;
use crate::interfaces::StoreError;
use crate::interfaces::Transition;

// ============================================================================
// SECTION: Tables
// ============================================================================

/// All in-memory tables guarded by one mutex.
#[derive(Debug, Default)]
struct MemoryTables {
    /// Reservations by raw identifier.
    reservations: BTreeMap<u64, Reservation>,
    /// Payment attempts by raw identifier.
    attempts: BTreeMap<u64, PaymentAttempt>,
    /// Bookings by raw identifier.
    bookings: BTreeMap<u64, Booking>,
    /// Outbox tasks by identifier.
    outbox: BTreeMap<u64, OutboxTask>,
    /// Enqueued (booking, kind) pairs for outbox idempotency.
    outbox_keys: BTreeSet<(u64, &'static str)>,
    /// Next identifier per table: reservations, attempts, bookings, outbox.
    next_ids: [u64; 4],
}

impl MemoryTables {
    /// Returns the next identifier for table `index` (1-based values).
    fn next_id(&mut self, index: usize) -> u64 {
        self.next_ids[index] += 1;
        self.next_ids[index]
    }
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory store implementing all four store interfaces.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBookingStore {
    /// Tables protected by a single mutex.
    tables: Arc<Mutex<MemoryTables>>,
}

impl InMemoryBookingStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(MemoryTables::default())),
        }
    }

    /// Locks the tables, mapping poisoning to a store error.
    fn lock(&self) -> Result<MutexGuard<'_, MemoryTables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Store("store mutex poisoned".to_string()))
    }
}

impl ReservationStore for InMemoryBookingStore {
    fn claim_slot(&self, new: &NewReservation, now: Timestamp) -> Result<SlotClaim, StoreError> {
        let mut guard = self.lock()?;
        let holder = guard
            .reservations
            .values()
            .find(|existing| {
                existing.provider_id == new.provider_id
                    && existing.date == new.date
                    && existing.time == new.time
                    && existing.blocks_claim_at(now)
            })
            .cloned();
        if let Some(holder) = holder {
            return Ok(SlotClaim::ActiveHolder(holder));
        }
        let raw_id = guard.next_id(0);
        let id = ReservationId::from_raw(raw_id)
            .ok_or_else(|| StoreError::Store("identifier overflow".to_string()))?;
        let reservation = Reservation {
            id,
            provider_id: new.provider_id,
            client_id: new.client_id,
            date: new.date.clone(),
            time: new.time.clone(),
            order_id: new.order_id.clone(),
            status: ReservationStatus::Held,
            expires_at: new.expires_at,
            payment_id: None,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        guard.reservations.insert(raw_id, reservation.clone());
        drop(guard);
        Ok(SlotClaim::Inserted(reservation))
    }

    fn find_by_order(&self, order_id: &OrderId) -> Result<Option<Reservation>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.reservations.values().find(|r| r.order_id == *order_id).cloned())
    }

    fn transition(
        &self,
        order_id: &OrderId,
        allowed_from: &[ReservationStatus],
        to: ReservationStatus,
        payment_id: Option<&GatewayPaymentId>,
        now: Timestamp,
    ) -> Result<Transition, StoreError> {
        let mut guard = self.lock()?;
        let Some(reservation) =
            guard.reservations.values_mut().find(|r| r.order_id == *order_id)
        else {
            return Ok(Transition::Missing);
        };
        if !allowed_from.contains(&reservation.status) {
            return Ok(Transition::Unchanged(reservation.clone()));
        }
        reservation.status = to;
        reservation.updated_at = now;
        if let Some(payment_id) = payment_id
            && reservation.payment_id.is_none()
        {
            reservation.payment_id = Some(payment_id.clone());
        }
        Ok(Transition::Applied(reservation.clone()))
    }

    fn confirmed_without_booking(
        &self,
        window_start: Timestamp,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        let guard = self.lock()?;
        let booked_attempts: BTreeSet<u64> =
            guard.bookings.values().map(|b| b.attempt_id.get()).collect();
        let mut matches: Vec<Reservation> = guard
            .reservations
            .values()
            .filter(|r| {
                r.status == ReservationStatus::PaymentConfirmed
                    && !r.updated_at.is_before(window_start)
            })
            .filter(|r| {
                // Linked bookings are keyed by attempt; resolve through the ledger.
                !guard
                    .attempts
                    .values()
                    .any(|a| a.order_id == r.order_id && booked_attempts.contains(&a.id.get()))
            })
            .cloned()
            .collect();
        matches.truncate(limit);
        Ok(matches)
    }

    fn expired_holds(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        let guard = self.lock()?;
        let mut matches: Vec<Reservation> =
            guard.reservations.values().filter(|r| r.hold_lapsed_at(now)).cloned().collect();
        matches.truncate(limit);
        Ok(matches)
    }
}

impl PaymentLedger for InMemoryBookingStore {
    fn create_pending(&self, new: &NewPaymentAttempt) -> Result<PaymentAttempt, StoreError> {
        let mut guard = self.lock()?;
        if let Some(existing) = guard.attempts.values().find(|a| a.order_id == new.order_id) {
            return Ok(existing.clone());
        }
        let raw_id = guard.next_id(1);
        let id = AttemptId::from_raw(raw_id)
            .ok_or_else(|| StoreError::Store("identifier overflow".to_string()))?;
        let attempt = PaymentAttempt {
            id,
            order_id: new.order_id.clone(),
            gateway_payment_id: None,
            reservation_id: new.reservation_id,
            amount: new.amount.clone(),
            status: PaymentStatus::Pending,
            booking_id: None,
            manual_review: None,
            provider_id: new.provider_id,
            client_id: new.client_id,
            date: new.date.clone(),
            time: new.time.clone(),
            created_at: new.created_at,
            completed_at: None,
        };
        guard.attempts.insert(raw_id, attempt.clone());
        drop(guard);
        Ok(attempt)
    }

    fn find_by_order(&self, order_id: &OrderId) -> Result<Option<PaymentAttempt>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.attempts.values().find(|a| a.order_id == *order_id).cloned())
    }

    fn find_by_gateway_payment(
        &self,
        payment_id: &GatewayPaymentId,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .attempts
            .values()
            .find(|a| a.gateway_payment_id.as_ref() == Some(payment_id))
            .cloned())
    }

    fn record_gateway_payment(
        &self,
        order_id: &OrderId,
        payment_id: &GatewayPaymentId,
    ) -> Result<RecordPayment, StoreError> {
        let mut guard = self.lock()?;
        let taken_elsewhere = guard
            .attempts
            .values()
            .any(|a| a.order_id != *order_id && a.gateway_payment_id.as_ref() == Some(payment_id));
        if taken_elsewhere {
            return Err(StoreError::Store(
                "gateway payment id already recorded for another order".to_string(),
            ));
        }
        let Some(attempt) = guard.attempts.values_mut().find(|a| a.order_id == *order_id) else {
            return Ok(RecordPayment::Missing);
        };
        match attempt.gateway_payment_id.as_ref() {
            None => {
                attempt.gateway_payment_id = Some(payment_id.clone());
                Ok(RecordPayment::Recorded(attempt.clone()))
            }
            Some(existing) if existing == payment_id => {
                Ok(RecordPayment::Recorded(attempt.clone()))
            }
            Some(_) => Ok(RecordPayment::DifferentPayment(attempt.clone())),
        }
    }

    fn mark_success(
        &self,
        order_id: &OrderId,
        completed_at: Timestamp,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        let mut guard = self.lock()?;
        let Some(attempt) = guard.attempts.values_mut().find(|a| a.order_id == *order_id) else {
            return Ok(None);
        };
        if attempt.status == PaymentStatus::Pending {
            attempt.status = PaymentStatus::Success;
            attempt.completed_at = Some(completed_at);
        }
        Ok(Some(attempt.clone()))
    }

    fn mark_failed(
        &self,
        order_id: &OrderId,
        completed_at: Timestamp,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        let mut guard = self.lock()?;
        let Some(attempt) = guard.attempts.values_mut().find(|a| a.order_id == *order_id) else {
            return Ok(None);
        };
        if attempt.status == PaymentStatus::Pending {
            attempt.status = PaymentStatus::Failed;
            attempt.completed_at = Some(completed_at);
        }
        Ok(Some(attempt.clone()))
    }

    fn link_booking(
        &self,
        attempt_id: AttemptId,
        booking_id: BookingId,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let Some(attempt) = guard.attempts.get_mut(&attempt_id.get()) else {
            return Err(StoreError::Invalid(format!("unknown attempt: {attempt_id}")));
        };
        if attempt.booking_id.is_none() {
            attempt.booking_id = Some(booking_id);
        }
        Ok(())
    }

    fn flag_manual_review(&self, attempt_id: AttemptId, reason: &str) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let Some(attempt) = guard.attempts.get_mut(&attempt_id.get()) else {
            return Err(StoreError::Invalid(format!("unknown attempt: {attempt_id}")));
        };
        if attempt.manual_review.is_none() {
            attempt.manual_review = Some(reason.to_string());
        }
        Ok(())
    }
}

impl BookingStore for InMemoryBookingStore {
    fn insert_unique(&self, new: &NewBooking) -> Result<BookingInsert, StoreError> {
        let mut guard = self.lock()?;
        let taken = guard
            .bookings
            .values()
            .find(|b| {
                b.provider_id == new.provider_id
                    && b.date == new.date
                    && b.time == new.time
                    && b.status == BookingStatus::Confirmed
            })
            .cloned();
        if let Some(existing) = taken {
            return Ok(BookingInsert::SlotTaken(existing));
        }
        let raw_id = guard.next_id(2);
        let id = BookingId::from_raw(raw_id)
            .ok_or_else(|| StoreError::Store("identifier overflow".to_string()))?;
        let booking = Booking {
            id,
            provider_id: new.provider_id,
            client_id: new.client_id,
            date: new.date.clone(),
            time: new.time.clone(),
            attempt_id: new.attempt_id,
            status: BookingStatus::Confirmed,
            created_at: new.created_at,
        };
        guard.bookings.insert(raw_id, booking.clone());
        drop(guard);
        Ok(BookingInsert::Created(booking))
    }

    fn find_by_id(&self, booking_id: BookingId) -> Result<Option<Booking>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.bookings.get(&booking_id.get()).cloned())
    }

    fn find_by_attempt(&self, attempt_id: AttemptId) -> Result<Option<Booking>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.bookings.values().find(|b| b.attempt_id == attempt_id).cloned())
    }

    fn active_for_slot(
        &self,
        provider_id: ProviderId,
        date: &SlotDate,
        time: &SlotTime,
    ) -> Result<Option<Booking>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .bookings
            .values()
            .find(|b| {
                b.provider_id == provider_id
                    && b.date == *date
                    && b.time == *time
                    && b.status == BookingStatus::Confirmed
            })
            .cloned())
    }
}

impl OutboxStore for InMemoryBookingStore {
    fn enqueue(
        &self,
        booking_id: BookingId,
        kind: NotificationKind,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if !guard.outbox_keys.insert((booking_id.get(), kind.as_str())) {
            return Ok(());
        }
        let id = guard.next_id(3);
        guard.outbox.insert(
            id,
            OutboxTask {
                id,
                booking_id,
                kind,
                status: OutboxStatus::Pending,
                attempts: 0,
                last_error: None,
                created_at: now,
                sent_at: None,
            },
        );
        drop(guard);
        Ok(())
    }

    fn due(&self, limit: usize) -> Result<Vec<OutboxTask>, StoreError> {
        let guard = self.lock()?;
        let mut tasks: Vec<OutboxTask> = guard
            .outbox
            .values()
            .filter(|task| task.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        tasks.truncate(limit);
        Ok(tasks)
    }

    fn mark_sent(&self, task_id: u64, now: Timestamp) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if let Some(task) = guard.outbox.get_mut(&task_id)
            && task.status == OutboxStatus::Pending
        {
            task.status = OutboxStatus::Sent;
            task.sent_at = Some(now);
        }
        Ok(())
    }

    fn mark_failed(
        &self,
        task_id: u64,
        error: &str,
        max_attempts: u32,
        _now: Timestamp,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if let Some(task) = guard.outbox.get_mut(&task_id)
            && task.status == OutboxStatus::Pending
        {
            task.attempts += 1;
            task.last_error = Some(error.to_string());
            if task.attempts >= max_attempts {
                task.status = OutboxStatus::Dead;
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Shared Store Bundle
// ============================================================================

/// Shared store handles used by every runtime component.
#[derive(Clone)]
pub struct SharedStores {
    /// Reservation store handle.
    reservations: Arc<dyn ReservationStore + Send + Sync>,
    /// Payment ledger handle.
    payments: Arc<dyn PaymentLedger + Send + Sync>,
    /// Booking store handle.
    bookings: Arc<dyn BookingStore + Send + Sync>,
    /// Outbox store handle.
    outbox: Arc<dyn OutboxStore + Send + Sync>,
}

impl SharedStores {
    /// Wraps a store implementing all four interfaces.
    #[must_use]
    pub fn from_store<S>(store: S) -> Self
    where
        S: ReservationStore
            + PaymentLedger
            + BookingStore
            + OutboxStore
            + Clone
            + Send
            + Sync
            + 'static,
    {
        Self {
            reservations: Arc::new(store.clone()),
            payments: Arc::new(store.clone()),
            bookings: Arc::new(store.clone()),
            outbox: Arc::new(store),
        }
    }

    /// Wraps existing shared handles.
    #[must_use]
    pub fn new(
        reservations: Arc<dyn ReservationStore + Send + Sync>,
        payments: Arc<dyn PaymentLedger + Send + Sync>,
        bookings: Arc<dyn BookingStore + Send + Sync>,
        outbox: Arc<dyn OutboxStore + Send + Sync>,
    ) -> Self {
        Self {
            reservations,
            payments,
            bookings,
            outbox,
        }
    }

    /// Returns the reservation store handle.
    #[must_use]
    pub fn reservations(&self) -> &(dyn ReservationStore + Send + Sync) {
        self.reservations.as_ref()
    }

    /// Returns the payment ledger handle.
    #[must_use]
    pub fn payments(&self) -> &(dyn PaymentLedger + Send + Sync) {
        self.payments.as_ref()
    }

    /// Returns the booking store handle.
    #[must_use]
    pub fn bookings(&self) -> &(dyn BookingStore + Send + Sync) {
        self.bookings.as_ref()
    }

    /// Returns the outbox store handle.
    #[must_use]
    pub fn outbox(&self) -> &(dyn OutboxStore + Send + Sync) {
        self.outbox.as_ref()
    }
}
