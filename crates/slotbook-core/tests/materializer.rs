// crates/slotbook-core/tests/materializer.rs
// ============================================================================
// Module: Booking Materializer Tests
// Description: Validate exactly-once booking creation.
// Purpose: Ensure duplicate calls converge and foreign conflicts preserve money.
// Dependencies: slotbook-core
// ============================================================================

//! ## Overview
//! Conformance tests for the materializer: idempotent duplicate calls, the
//! two-layer double-booking defense, manual-review flagging on foreign
//! conflicts, and notification enqueueing.

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

use slotbook_core::BookingMaterializer;
use slotbook_core::Materialized;
use slotbook_core::NewPaymentAttempt;
use slotbook_core::NotificationKind;
use slotbook_core::OrderId;
use slotbook_core::OutboxStore;
use slotbook_core::PaymentAttempt;
use slotbook_core::PaymentLedger;

use common::client;
use common::date;
use common::inr;
use common::memory_store;
use common::provider;
use common::shared;
use common::time;
use common::ts;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Creates a pending attempt with the standard slot details.
fn seed_attempt(store: &slotbook_core::InMemoryBookingStore, order: &str, client_raw: u64) -> PaymentAttempt {
    store
        .create_pending(&NewPaymentAttempt {
            order_id: OrderId::new(order),
            reservation_id: None,
            amount: inr(150_000),
            provider_id: provider(1),
            client_id: client(client_raw),
            date: date("2025-01-10"),
            time: time("10:00"),
            created_at: ts(100),
        })
        .unwrap()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn materialize_creates_and_links_booking() {
    let store = memory_store();
    let attempt = seed_attempt(&store, "order-1", 1);
    let materializer = BookingMaterializer::new(shared(&store));
    let outcome = materializer.materialize(&attempt, ts(1_000)).unwrap();
    let Materialized::Created(booking) = outcome else {
        panic!("expected creation, got {outcome:?}");
    };
    let reloaded =
        PaymentLedger::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(reloaded.booking_id, Some(booking.id));
}

#[test]
fn duplicate_materialize_returns_existing_booking() {
    let store = memory_store();
    let attempt = seed_attempt(&store, "order-1", 1);
    let materializer = BookingMaterializer::new(shared(&store));
    let first = materializer.materialize(&attempt, ts(1_000)).unwrap();
    let second = materializer.materialize(&attempt, ts(2_000)).unwrap();
    let (Materialized::Created(created), Materialized::AlreadyBooked(existing)) = (first, second)
    else {
        panic!("expected idempotent convergence");
    };
    assert_eq!(created.id, existing.id);
}

#[test]
fn foreign_conflict_flags_attempt_for_manual_review() {
    let store = memory_store();
    let winner = seed_attempt(&store, "order-1", 1);
    let loser = seed_attempt(&store, "order-2", 2);
    let materializer = BookingMaterializer::new(shared(&store));
    materializer.materialize(&winner, ts(1_000)).unwrap();
    let outcome = materializer.materialize(&loser, ts(2_000)).unwrap();
    assert!(matches!(outcome, Materialized::Conflict { .. }));
    let flagged =
        PaymentLedger::find_by_order(&store, &OrderId::new("order-2")).unwrap().unwrap();
    assert!(flagged.manual_review.is_some());
    assert!(flagged.booking_id.is_none());
}

#[test]
fn materialize_enqueues_all_notification_kinds_once() {
    let store = memory_store();
    let attempt = seed_attempt(&store, "order-1", 1);
    let materializer = BookingMaterializer::new(shared(&store));
    materializer.materialize(&attempt, ts(1_000)).unwrap();
    // A duplicate call must not enqueue a second batch.
    materializer.materialize(&attempt, ts(2_000)).unwrap();
    let due = store.due(32).unwrap();
    assert_eq!(due.len(), NotificationKind::ALL.len());
}
