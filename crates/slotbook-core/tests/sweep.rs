// crates/slotbook-core/tests/sweep.rs
// ============================================================================
// Module: Reconciliation Sweep Tests
// Description: Validate sweep convergence and expiry repair.
// Purpose: Ensure stuck and abandoned reservations converge on every tick.
// Dependencies: slotbook-core
// ============================================================================

//! ## Overview
//! Conformance tests for the sweep: re-materializing confirmed payments
//! whose handler died before booking, expiring abandoned checkouts so the
//! slot frees up and the money record closes, idempotent re-runs, and
//! per-item failure isolation.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use slotbook_core::ClaimOutcome;
use slotbook_core::GatewayPaymentId;
use slotbook_core::HOLD_TTL_MS;
use slotbook_core::OrderId;
use slotbook_core::PaymentLedger;
use slotbook_core::PaymentStatus;
use slotbook_core::ReconciliationSweep;
use slotbook_core::ReservationManager;
use slotbook_core::ReservationStatus;
use slotbook_core::ReservationStore;
use slotbook_core::SweepConfig;

use common::claim_request;
use common::memory_store;
use common::shared;
use common::ts;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Puts a claimed reservation into `PaymentConfirmed` without materializing,
/// simulating a handler crash between confirmation and booking creation.
fn strand_confirmed(store: &slotbook_core::InMemoryBookingStore, order: &str, at: i64) {
    let manager = ReservationManager::new(shared(store));
    manager
        .advance(
            &OrderId::new(order),
            ReservationStatus::PaymentConfirmed,
            Some(&GatewayPaymentId::new(format!("pay-{order}"))),
            ts(at),
        )
        .unwrap();
}

// ============================================================================
// SECTION: Repair Phase
// ============================================================================

#[test]
fn sweep_materializes_confirmed_reservation_without_booking() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    strand_confirmed(&store, "order-1", 2_000);

    let sweep = ReconciliationSweep::new(shared(&store), SweepConfig::default());
    let report = sweep.run_once(ts(10_000)).unwrap();
    assert_eq!(report.repaired, 1);

    let reservation =
        ReservationStore::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Booked);
    let attempt =
        PaymentLedger::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(attempt.status, PaymentStatus::Success);
    assert!(attempt.booking_id.is_some());
}

#[test]
fn sweep_rerun_is_idempotent() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    strand_confirmed(&store, "order-1", 2_000);

    let sweep = ReconciliationSweep::new(shared(&store), SweepConfig::default());
    let first = sweep.run_once(ts(10_000)).unwrap();
    let second = sweep.run_once(ts(20_000)).unwrap();
    assert_eq!(first.repaired, 1);
    assert_eq!(second.repaired, 0);
    assert_eq!(second.expired, 0);
    assert_eq!(second.failures, 0);
}

// ============================================================================
// SECTION: Expiry Phase
// ============================================================================

#[test]
fn sweep_expires_abandoned_checkout_and_frees_slot() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(0)).unwrap();

    let sweep = ReconciliationSweep::new(shared(&store), SweepConfig::default());
    let report = sweep.run_once(ts(HOLD_TTL_MS + 1)).unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.attempts_failed, 1);

    let reservation =
        ReservationStore::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Expired);
    let attempt =
        PaymentLedger::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(attempt.status, PaymentStatus::Failed);

    // Scenario C tail: a different client can now claim the slot.
    let outcome = manager.claim(&claim_request(2, "order-2"), ts(HOLD_TTL_MS + 2)).unwrap();
    assert!(matches!(outcome, ClaimOutcome::Claimed(_)));
}

#[test]
fn sweep_leaves_unlapsed_holds_alone() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(0)).unwrap();

    let sweep = ReconciliationSweep::new(shared(&store), SweepConfig::default());
    let report = sweep.run_once(ts(HOLD_TTL_MS - 1)).unwrap();
    assert_eq!(report.expired, 0);
    let reservation =
        ReservationStore::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Held);
}

#[test]
fn sweep_does_not_expire_confirmed_payments() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(0)).unwrap();
    strand_confirmed(&store, "order-1", 1_000);

    // Even far past the TTL, a confirmed payment is repaired, not expired.
    let sweep = ReconciliationSweep::new(shared(&store), SweepConfig::default());
    let report = sweep.run_once(ts(HOLD_TTL_MS * 4)).unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(report.repaired, 1);
}

// ============================================================================
// SECTION: Batch Isolation
// ============================================================================

#[test]
fn conflicting_item_does_not_abort_the_batch() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));

    // Two confirmations landed for the same slot: order-1's hold lapsed,
    // order-2 claimed the freed slot, then both captures arrived without
    // materializing. Only one repair can book; the other must record a
    // conflict rather than abort the tick.
    manager.claim(&claim_request(1, "order-1"), ts(0)).unwrap();
    manager.claim(&claim_request(2, "order-2"), ts(HOLD_TTL_MS + 1)).unwrap();
    strand_confirmed(&store, "order-1", HOLD_TTL_MS + 2);
    strand_confirmed(&store, "order-2", HOLD_TTL_MS + 3);

    let sweep = ReconciliationSweep::new(shared(&store), SweepConfig::default());
    let report = sweep.run_once(ts(HOLD_TTL_MS + 10_000)).unwrap();
    assert_eq!(report.repaired, 1);
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.failures, 0);
}
