// crates/slotbook-core/tests/webhook_processor.rs
// ============================================================================
// Module: Webhook Processor Tests
// Description: Validate idempotent gateway event processing.
// Purpose: Ensure replays, races, and late captures never double-book or lose money.
// Dependencies: slotbook-core, serde_json
// ============================================================================

//! ## Overview
//! Conformance tests for the webhook path: signature gating, duplicate
//! delivery collapse, amount integrity, failure handling, the legacy
//! reservation-less fallback, and late captures after expiry.

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

use slotbook_core::BookingStore;
use slotbook_core::GatewayPaymentId;
use slotbook_core::HOLD_TTL_MS;
use slotbook_core::NewPaymentAttempt;
use slotbook_core::OrderId;
use slotbook_core::PaymentLedger;
use slotbook_core::PaymentStatus;
use slotbook_core::ReservationManager;
use slotbook_core::ReservationStatus;
use slotbook_core::ReservationStore;
use slotbook_core::Transition;
use slotbook_core::WebhookError;
use slotbook_core::WebhookOutcome;

use common::capture_body;
use common::claim_request;
use common::client;
use common::date;
use common::failed_body;
use common::inr;
use common::memory_store;
use common::processor;
use common::provider;
use common::shared;
use common::sign;
use common::time;
use common::ts;

// ============================================================================
// SECTION: Signature Gate
// ============================================================================

#[test]
fn tampered_body_is_rejected_before_processing() {
    let store = memory_store();
    let handler = processor(&store);
    let body = capture_body("order-1", "pay_123", 150_000);
    let signature = sign(&body);
    let mut tampered = body.clone();
    tampered[0] ^= 0x01;
    let err = handler.handle_event(&tampered, &signature, ts(1_000)).unwrap_err();
    assert!(matches!(err, WebhookError::InvalidSignature(_)));
}

#[test]
fn unrecognized_event_label_is_rejected() {
    let store = memory_store();
    let handler = processor(&store);
    let body = serde_json::to_vec(&serde_json::json!({
        "event": "refund.created",
        "payload": {},
    }))
    .unwrap();
    let err = handler.handle_event(&body, &sign(&body), ts(1_000)).unwrap_err();
    assert!(matches!(err, WebhookError::Event(_)));
}

// ============================================================================
// SECTION: Capture Path
// ============================================================================

#[test]
fn capture_books_the_reservation_end_to_end() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    let handler = processor(&store);
    let body = capture_body("order-1", "pay_123", 150_000);
    let outcome = handler.handle_event(&body, &sign(&body), ts(2_000)).unwrap();
    let WebhookOutcome::Booked {
        newly_created,
        legacy_fallback,
        ..
    } = outcome
    else {
        panic!("expected booking, got {outcome:?}");
    };
    assert!(newly_created);
    assert!(!legacy_fallback);

    let reservation =
        ReservationStore::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Booked);
    assert_eq!(reservation.payment_id.as_ref().map(GatewayPaymentId::as_str), Some("pay_123"));
    let attempt =
        PaymentLedger::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(attempt.status, PaymentStatus::Success);
    assert!(attempt.booking_id.is_some());
}

#[test]
fn duplicate_delivery_returns_same_booking_without_side_effects() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    let handler = processor(&store);
    let body = capture_body("order-1", "pay_123", 150_000);
    let first = handler.handle_event(&body, &sign(&body), ts(2_000)).unwrap();
    let second = handler.handle_event(&body, &sign(&body), ts(3_000)).unwrap();
    let (WebhookOutcome::Booked {
        booking_id: first_id,
        newly_created: created_first,
        ..
    }, WebhookOutcome::Booked {
        booking_id: second_id,
        newly_created: created_second,
        ..
    }) = (first, second)
    else {
        panic!("expected bookings from both deliveries");
    };
    assert!(created_first);
    assert!(!created_second);
    assert_eq!(first_id, second_id);
}

#[test]
fn parallel_duplicate_deliveries_create_one_booking() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let handler = processor(&store);
        handles.push(thread::spawn(move || {
            let body = capture_body("order-1", "pay_123", 150_000);
            let signature = sign(&body);
            handler.handle_event(&body, &signature, ts(2_000)).unwrap()
        }));
    }
    let mut booking_ids = Vec::new();
    for handle in handles {
        let WebhookOutcome::Booked {
            booking_id, ..
        } = handle.join().unwrap()
        else {
            panic!("every delivery must observe the booking");
        };
        booking_ids.push(booking_id);
    }
    booking_ids.dedup();
    assert_eq!(booking_ids.len(), 1, "all deliveries must converge on one booking");
}

#[test]
fn amount_mismatch_fails_attempt_and_never_books() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    let handler = processor(&store);
    let body = capture_body("order-1", "pay_123", 99_999);
    let err = handler.handle_event(&body, &sign(&body), ts(2_000)).unwrap_err();
    assert!(matches!(err, WebhookError::AmountMismatch { .. }));
    let attempt =
        PaymentLedger::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(attempt.status, PaymentStatus::Failed);
    assert!(attempt.booking_id.is_none());
}

#[test]
fn capture_for_unknown_order_is_an_error() {
    let store = memory_store();
    let handler = processor(&store);
    let body = capture_body("order-missing", "pay_123", 150_000);
    let err = handler.handle_event(&body, &sign(&body), ts(1_000)).unwrap_err();
    assert!(matches!(err, WebhookError::UnknownOrder(_)));
}

// ============================================================================
// SECTION: Failure Path
// ============================================================================

#[test]
fn failed_event_settles_attempt_and_releases_hold() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    let handler = processor(&store);
    let body = failed_body("order-1", "card_declined");
    let outcome = handler.handle_event(&body, &sign(&body), ts(2_000)).unwrap();
    assert!(matches!(
        outcome,
        WebhookOutcome::FailureRecorded {
            released: true,
            ..
        }
    ));
    let reservation =
        ReservationStore::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Failed);
}

#[test]
fn failure_after_capture_never_clobbers_the_booking() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(1_000)).unwrap();
    let handler = processor(&store);
    let capture = capture_body("order-1", "pay_123", 150_000);
    handler.handle_event(&capture, &sign(&capture), ts(2_000)).unwrap();
    let failed = failed_body("order-1", "late failure");
    let outcome = handler.handle_event(&failed, &sign(&failed), ts(3_000)).unwrap();
    assert!(matches!(
        outcome,
        WebhookOutcome::FailureRecorded {
            released: false,
            ..
        }
    ));
    let reservation =
        ReservationStore::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Booked);
    let attempt =
        PaymentLedger::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(attempt.status, PaymentStatus::Success);
}

// ============================================================================
// SECTION: Late Captures
// ============================================================================

#[test]
fn late_capture_on_free_slot_is_retroactively_accepted() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(0)).unwrap();
    // Hold lapsed and the sweep already flipped it to Expired.
    let expired = store
        .transition(
            &OrderId::new("order-1"),
            &[ReservationStatus::Held],
            ReservationStatus::Expired,
            None,
            ts(HOLD_TTL_MS + 1),
        )
        .unwrap();
    assert!(matches!(expired, Transition::Applied(_)));

    let handler = processor(&store);
    let body = capture_body("order-1", "pay_123", 150_000);
    let outcome = handler.handle_event(&body, &sign(&body), ts(HOLD_TTL_MS + 60_000)).unwrap();
    assert!(matches!(
        outcome,
        WebhookOutcome::Booked {
            newly_created: true,
            ..
        }
    ));
    let reservation =
        ReservationStore::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Booked);
}

#[test]
fn late_capture_on_taken_slot_preserves_money_without_booking() {
    let store = memory_store();
    let manager = ReservationManager::new(shared(&store));
    manager.claim(&claim_request(1, "order-1"), ts(0)).unwrap();
    let handler = processor(&store);

    // The hold lapses; another client claims and books the same slot.
    let late = ts(HOLD_TTL_MS + 1);
    manager.claim(&claim_request(2, "order-2"), late).unwrap();
    let other = capture_body("order-2", "pay_other", 150_000);
    handler.handle_event(&other, &sign(&other), late).unwrap();

    // The original payment lands afterwards.
    let body = capture_body("order-1", "pay_123", 150_000);
    let outcome = handler.handle_event(&body, &sign(&body), ts(HOLD_TTL_MS + 120_000)).unwrap();
    assert!(matches!(outcome, WebhookOutcome::PaymentRecordedNoBooking { .. }));
    let attempt =
        PaymentLedger::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(attempt.status, PaymentStatus::Success);
    assert!(attempt.booking_id.is_none());
    assert!(attempt.manual_review.is_some());
}

// ============================================================================
// SECTION: Legacy Fallback
// ============================================================================

#[test]
fn capture_without_reservation_books_from_attempt_details() {
    let store = memory_store();
    // Legacy data: an attempt exists with no reservation behind it.
    store
        .create_pending(&NewPaymentAttempt {
            order_id: OrderId::new("order-legacy"),
            reservation_id: None,
            amount: inr(150_000),
            provider_id: provider(1),
            client_id: client(7),
            date: date("2025-01-10"),
            time: time("10:00"),
            created_at: ts(500),
        })
        .unwrap();
    let handler = processor(&store);
    let body = capture_body("order-legacy", "pay_legacy", 150_000);
    let outcome = handler.handle_event(&body, &sign(&body), ts(1_000)).unwrap();
    let WebhookOutcome::Booked {
        booking_id,
        legacy_fallback,
        ..
    } = outcome
    else {
        panic!("expected legacy booking, got {outcome:?}");
    };
    assert!(legacy_fallback);
    let booking = store
        .active_for_slot(provider(1), &date("2025-01-10"), &time("10:00"))
        .unwrap()
        .unwrap();
    assert_eq!(booking.id, booking_id);
}
