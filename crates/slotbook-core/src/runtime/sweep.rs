// crates/slotbook-core/src/runtime/sweep.rs
// ============================================================================
// Module: Slotbook Reconciliation Sweep
// Description: Periodic repair of stuck and abandoned reservations.
// Purpose: Close the gaps left by crashed handlers and dropped deliveries.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The sweep is a repair mechanism, not a hot path. Each tick it completes
//! `PaymentConfirmed` reservations that never materialized a booking and
//! expires lapsed holds so their slots become claimable again and their
//! pending money records are closed out. The sweep keeps no memory between
//! ticks: every action is an idempotent compare-and-swap, so re-running on
//! every tick — or from several process instances at once — is safe.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;

use crate::core::PaymentStatus;
use crate::core::Reservation;
use crate::core::ReservationStatus;
use crate::core::Timestamp;
use crate::interfaces::StoreError;
use crate::interfaces::Transition;
use crate::runtime::materializer::BookingMaterializer;
use crate::runtime::materializer::Materialized;
use crate::runtime::materializer::MaterializerError;
use crate::runtime::store::SharedStores;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Default repair window looking back from the tick instant (24 hours).
pub const DEFAULT_WINDOW_MS: i64 = 24 * 60 * 60 * 1_000;
/// Default per-phase batch limit.
pub const DEFAULT_BATCH_LIMIT: usize = 256;

/// Sweep configuration.
///
/// # Invariants
/// - `window_ms` bounds the confirmed-without-booking scan so tick cost
///   stays proportional to recent traffic, not table size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    /// Repair window in milliseconds looking back from the tick instant.
    pub window_ms: i64,
    /// Maximum reservations processed per phase per tick.
    pub batch_limit: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// Counters for one sweep tick.
///
/// # Invariants
/// - Counters are per-tick; the sweep keeps no cross-tick state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Bookings created by re-materialization.
    pub repaired: usize,
    /// Confirmed reservations whose booking already existed.
    pub already_booked: usize,
    /// Holds flipped to `Expired`.
    pub expired: usize,
    /// Pending attempts closed out as `Failed`.
    pub attempts_failed: usize,
    /// Materializations that hit a foreign booking (flagged, not retried).
    pub conflicts: usize,
    /// Items that failed with a store error (retried next tick).
    pub failures: usize,
}

// ============================================================================
// SECTION: Reconciliation Sweep
// ============================================================================

/// Periodic reconciliation job over the shared stores.
#[derive(Clone)]
pub struct ReconciliationSweep {
    /// Shared store handles.
    stores: SharedStores,
    /// Materializer used for repair.
    materializer: BookingMaterializer,
    /// Sweep configuration.
    config: SweepConfig,
}

impl ReconciliationSweep {
    /// Creates a sweep over the given stores.
    #[must_use]
    pub fn new(stores: SharedStores, config: SweepConfig) -> Self {
        Self {
            materializer: BookingMaterializer::new(stores.clone()),
            stores,
            config,
        }
    }

    /// Runs one sweep tick.
    ///
    /// Item-level failures are counted and left for the next tick; they
    /// never abort the remaining batch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only when a phase scan itself fails.
    pub fn run_once(&self, now: Timestamp) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();
        self.repair_confirmed(now, &mut report)?;
        self.expire_lapsed(now, &mut report)?;
        Ok(report)
    }

    /// Phase one: reservations confirmed by the gateway whose booking never
    /// materialized (handler crashed between confirmation and creation).
    fn repair_confirmed(
        &self,
        now: Timestamp,
        report: &mut SweepReport,
    ) -> Result<(), StoreError> {
        let window_start = now.minus_millis(self.config.window_ms);
        let stuck =
            self.stores.reservations().confirmed_without_booking(window_start, self.config.batch_limit)?;
        for reservation in stuck {
            match self.repair_one(&reservation, now) {
                Ok(Materialized::Created(_)) => report.repaired += 1,
                Ok(Materialized::AlreadyBooked(_)) => report.already_booked += 1,
                Ok(Materialized::Conflict {
                    ..
                }) => report.conflicts += 1,
                Err(_) => report.failures += 1,
            }
        }
        Ok(())
    }

    /// Repairs a single confirmed reservation.
    fn repair_one(
        &self,
        reservation: &Reservation,
        now: Timestamp,
    ) -> Result<Materialized, MaterializerError> {
        // The reservation only reaches PaymentConfirmed through a verified
        // capture, so the attempt can be settled here if the handler died
        // before marking it.
        let _ = self.stores.payments().mark_success(&reservation.order_id, now)?;
        let attempt = self
            .stores
            .payments()
            .find_by_order(&reservation.order_id)?
            .ok_or_else(|| {
                MaterializerError::Store(StoreError::Corrupt(format!(
                    "confirmed reservation {} has no payment attempt",
                    reservation.id
                )))
            })?;
        self.materializer.materialize(&attempt, now)
    }

    /// Phase two: lapsed holds become `Expired` and their pending attempts
    /// are closed out as `Failed`, so the slot is claimable again and no
    /// orphaned pending money records remain.
    fn expire_lapsed(&self, now: Timestamp, report: &mut SweepReport) -> Result<(), StoreError> {
        let lapsed = self.stores.reservations().expired_holds(now, self.config.batch_limit)?;
        for reservation in lapsed {
            match self.expire_one(&reservation, now) {
                Ok((expired, attempt_failed)) => {
                    if expired {
                        report.expired += 1;
                    }
                    if attempt_failed {
                        report.attempts_failed += 1;
                    }
                }
                Err(_) => report.failures += 1,
            }
        }
        Ok(())
    }

    /// Expires a single lapsed hold. The CAS only fires while the hold is
    /// still awaiting payment, so a confirmation racing this tick wins.
    fn expire_one(
        &self,
        reservation: &Reservation,
        now: Timestamp,
    ) -> Result<(bool, bool), StoreError> {
        let outcome = self.stores.reservations().transition(
            &reservation.order_id,
            &[ReservationStatus::Held, ReservationStatus::PaymentPending],
            ReservationStatus::Expired,
            None,
            now,
        )?;
        if !matches!(outcome, Transition::Applied(_)) {
            return Ok((false, false));
        }
        let attempt = self.stores.payments().mark_failed(&reservation.order_id, now)?;
        let attempt_failed = attempt
            .is_some_and(|a| a.status == PaymentStatus::Failed && a.completed_at == Some(now));
        Ok((true, attempt_failed))
    }
}
