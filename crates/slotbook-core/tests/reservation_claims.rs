// crates/slotbook-core/tests/reservation_claims.rs
// ============================================================================
// Module: Reservation Claim Tests
// Description: Validate slot claim exclusivity, idempotency, and expiry.
// Purpose: Ensure at most one active holder exists per slot at any instant.
// Dependencies: slotbook-core
// ============================================================================

//! ## Overview
//! Conformance tests for the claim path: exclusive holds, idempotent
//! retries, the exactly-one-winner guarantee under concurrent claims, and
//! the time-based expiry check that frees a slot before any sweep runs.

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

use std::thread;

use slotbook_core::ClaimError;
use slotbook_core::ClaimOutcome;
use slotbook_core::HOLD_TTL_MS;
use slotbook_core::OrderId;
use slotbook_core::PaymentLedger;
use slotbook_core::PaymentStatus;
use slotbook_core::ReservationManager;
use slotbook_core::ReservationStatus;

use common::claim_request;
use common::inr;
use common::memory_store;
use common::shared;
use common::ts;

// ============================================================================
// SECTION: Basic Claims
// ============================================================================

#[test]
fn claim_inserts_held_reservation_with_hold_ttl() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    let outcome = manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    let ClaimOutcome::Claimed(reservation) = outcome else {
        panic!("expected fresh claim, got {outcome:?}");
    };
    assert_eq!(reservation.status, ReservationStatus::Held);
    assert_eq!(reservation.expires_at, ts(1_000 + HOLD_TTL_MS));
}

#[test]
fn claim_creates_pending_payment_attempt() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    let attempt = store.find_by_order(&OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(attempt.status, PaymentStatus::Pending);
    assert_eq!(attempt.amount, inr(150_000));
    assert!(attempt.reservation_id.is_some());
}

#[test]
fn second_client_gets_conflict_for_held_slot() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    let err = manager.claim(&claim_request(2, "order-2"), ts(2_000)).unwrap_err();
    assert!(matches!(err, ClaimError::SlotHeld));
}

#[test]
fn retry_with_same_client_and_order_is_idempotent() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    let first = manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    let second = manager.claim(&claim_request(1, "order-1"), ts(2_000)).unwrap();
    let ClaimOutcome::AlreadyHeld(existing) = second else {
        panic!("expected idempotent retry, got {second:?}");
    };
    assert_eq!(existing.id, first.reservation().id);
}

#[test]
fn same_client_new_order_still_conflicts() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    let err = manager.claim(&claim_request(1, "order-9"), ts(2_000)).unwrap_err();
    assert!(matches!(err, ClaimError::SlotHeld));
}

// ============================================================================
// SECTION: Expiry Dual Check
// ============================================================================

#[test]
fn lapsed_hold_frees_slot_before_sweep_runs() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(0)).unwrap();
    // Past the TTL the stored status is still Held, but the slot is free.
    let outcome = manager.claim(&claim_request(2, "order-2"), ts(HOLD_TTL_MS + 1)).unwrap();
    assert!(matches!(outcome, ClaimOutcome::Claimed(_)));
}

#[test]
fn unlapsed_hold_still_blocks_at_ttl_boundary() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(0)).unwrap();
    let err = manager.claim(&claim_request(2, "order-2"), ts(HOLD_TTL_MS - 1)).unwrap_err();
    assert!(matches!(err, ClaimError::SlotHeld));
}

// ============================================================================
// SECTION: Concurrent Claims
// ============================================================================

#[test]
fn concurrent_claims_have_exactly_one_winner() {
    let store = memory_store();
    let mut handles = Vec::new();
    for worker in 1..=8_u64 {
        let manager = ReservationManager::new(shared(&store));
        handles.push(thread::spawn(move || {
            let request = claim_request(worker, &format!("order-{worker}"));
            manager.claim(&request, ts(1_000)).is_ok()
        }));
    }
    let wins =
        handles.into_iter().map(|handle| handle.join().unwrap()).filter(|won| *won).count();
    assert_eq!(wins, 1, "exactly one concurrent claim must win");
}

// ============================================================================
// SECTION: Release
// ============================================================================

#[test]
fn release_moves_hold_to_failed_once() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    assert!(manager.release(&OrderId::new("order-1"), ts(2_000)).unwrap());
    // Terminal now; the second release is a no-op.
    assert!(!manager.release(&OrderId::new("order-1"), ts(3_000)).unwrap());
}

#[test]
fn released_slot_is_claimable_again() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    manager.release(&OrderId::new("order-1"), ts(2_000)).unwrap();
    let outcome = manager.claim(&claim_request(2, "order-2"), ts(3_000)).unwrap();
    assert!(matches!(outcome, ClaimOutcome::Claimed(_)));
}
