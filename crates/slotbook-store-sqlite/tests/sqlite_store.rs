// crates/slotbook-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Validate the SQLite booking store behavior.
// Purpose: Ensure constraints and conditional updates hold at the SQL layer.
// Dependencies: slotbook-store-sqlite, slotbook-core, tempfile
// ============================================================================

//! ## Overview
//! Conformance tests for the SQLite-backed store: claim atomicity,
//! conditional transitions, the active-slot unique index, persistence
//! across reopen, and concurrent claims through the engine.

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

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::thread;

use slotbook_core::BookingInsert;
use slotbook_core::BookingStore;
use slotbook_core::ClaimRequest;
use slotbook_core::ClientId;
use slotbook_core::Currency;
use slotbook_core::HOLD_TTL_MS;
use slotbook_core::Money;
use slotbook_core::NewBooking;
use slotbook_core::NewReservation;
use slotbook_core::OrderId;
use slotbook_core::PaymentLedger;
use slotbook_core::ProviderId;
use slotbook_core::ReservationManager;
use slotbook_core::ReservationStatus;
use slotbook_core::ReservationStore;
use slotbook_core::SharedStores;
use slotbook_core::SlotClaim;
use slotbook_core::SlotDate;
use slotbook_core::SlotTime;
use slotbook_core::Timestamp;
use slotbook_core::Transition;
use slotbook_core::WebhookOutcome;
use slotbook_core::WebhookProcessor;
use slotbook_core::hmac_sha256_hex;
use slotbook_store_sqlite::SqliteBookingStore;
use slotbook_store_sqlite::SqliteStoreConfig;
use slotbook_store_sqlite::SqliteStoreMode;
use slotbook_store_sqlite::SqliteSyncMode;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Webhook secret for end-to-end tests through the processor.
const SECRET: &[u8] = b"sqlite-test-secret";

fn store_for(path: &Path) -> SqliteBookingStore {
    let config = SqliteStoreConfig {
        path: path.to_path_buf(),
        busy_timeout_ms: 1_000,
        journal_mode: SqliteStoreMode::Wal,
        sync_mode: SqliteSyncMode::Full,
    };
    SqliteBookingStore::new(&config).expect("store init")
}

fn ts(millis: i64) -> Timestamp {
    Timestamp::from_unix_millis(millis)
}

fn slot_date() -> SlotDate {
    SlotDate::parse("2025-01-10").expect("valid date")
}

fn slot_time() -> SlotTime {
    SlotTime::parse("10:00").expect("valid time")
}

fn inr(minor_units: i64) -> Money {
    Money::new(minor_units, Currency::parse("INR").expect("valid currency"))
}

fn new_reservation(client: u64, order: &str, at: i64) -> NewReservation {
    NewReservation {
        provider_id: ProviderId::from_raw(1).expect("nonzero provider"),
        client_id: ClientId::from_raw(client).expect("nonzero client"),
        date: slot_date(),
        time: slot_time(),
        order_id: OrderId::new(order),
        expires_at: ts(at + HOLD_TTL_MS),
        created_at: ts(at),
    }
}

fn claim_request(client: u64, order: &str) -> ClaimRequest {
    ClaimRequest {
        provider_id: ProviderId::from_raw(1).expect("nonzero provider"),
        client_id: ClientId::from_raw(client).expect("nonzero client"),
        date: slot_date(),
        time: slot_time(),
        order_id: OrderId::new(order),
        amount: inr(150_000),
    }
}

fn capture_body(order: &str, payment: &str, amount: i64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "event": "payment.captured",
        "payload": {
            "order_id": order,
            "payment_id": payment,
            "amount": amount,
            "currency": "INR",
        },
    }))
    .expect("serializable body")
}

// ============================================================================
// SECTION: Claim Atomicity
// ============================================================================

#[test]
fn claim_slot_inserts_then_conflicts() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("store.sqlite"));
    let first = store.claim_slot(&new_reservation(1, "order-1", 0), ts(0)).unwrap();
    assert!(matches!(first, SlotClaim::Inserted(_)));
    let second = store.claim_slot(&new_reservation(2, "order-2", 1), ts(1)).unwrap();
    let SlotClaim::ActiveHolder(holder) = second else {
        panic!("expected active holder, got {second:?}");
    };
    assert_eq!(holder.order_id, OrderId::new("order-1"));
}

#[test]
fn lapsed_hold_does_not_block_claim() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("store.sqlite"));
    store.claim_slot(&new_reservation(1, "order-1", 0), ts(0)).unwrap();
    let second =
        store.claim_slot(&new_reservation(2, "order-2", HOLD_TTL_MS + 1), ts(HOLD_TTL_MS + 1)).unwrap();
    assert!(matches!(second, SlotClaim::Inserted(_)));
}

#[test]
fn concurrent_sqlite_claims_have_one_winner() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("store.sqlite"));
    let mut handles = Vec::new();
    for worker in 1..=6_u64 {
        let store = store.clone();
        handles.push(thread::spawn(move || {
            let outcome = store
                .claim_slot(&new_reservation(worker, &format!("order-{worker}"), 0), ts(0))
                .unwrap();
            matches!(outcome, SlotClaim::Inserted(_))
        }));
    }
    let wins =
        handles.into_iter().map(|handle| handle.join().unwrap()).filter(|won| *won).count();
    assert_eq!(wins, 1, "exactly one concurrent claim must win");
}

// ============================================================================
// SECTION: Conditional Transitions
// ============================================================================

#[test]
fn transition_applies_only_from_allowed_states() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("store.sqlite"));
    store.claim_slot(&new_reservation(1, "order-1", 0), ts(0)).unwrap();
    let applied = store
        .transition(
            &OrderId::new("order-1"),
            &[ReservationStatus::Held],
            ReservationStatus::PaymentPending,
            None,
            ts(1_000),
        )
        .unwrap();
    assert!(matches!(applied, Transition::Applied(_)));
    // Second identical call finds the status already moved on.
    let replay = store
        .transition(
            &OrderId::new("order-1"),
            &[ReservationStatus::Held],
            ReservationStatus::PaymentPending,
            None,
            ts(2_000),
        )
        .unwrap();
    let Transition::Unchanged(current) = replay else {
        panic!("expected unchanged, got {replay:?}");
    };
    assert_eq!(current.status, ReservationStatus::PaymentPending);
}

#[test]
fn transition_for_unknown_order_is_missing() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("store.sqlite"));
    let outcome = store
        .transition(
            &OrderId::new("missing"),
            &[ReservationStatus::Held],
            ReservationStatus::Failed,
            None,
            ts(0),
        )
        .unwrap();
    assert!(matches!(outcome, Transition::Missing));
}

// ============================================================================
// SECTION: Booking Uniqueness
// ============================================================================

#[test]
fn active_slot_unique_index_rejects_second_booking() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("store.sqlite"));
    let manager = ReservationManager::new(SharedStores::from_store(store.clone()));
    manager.claim(&claim_request(1, "order-1"), ts(0)).unwrap();
    manager.claim(&claim_request(2, "order-2"), ts(HOLD_TTL_MS + 1)).unwrap();
    let first = PaymentLedger::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    let second = PaymentLedger::find_by_order(&store, &OrderId::new("order-2")).unwrap().unwrap();

    let created = store
        .insert_unique(&NewBooking {
            provider_id: first.provider_id,
            client_id: first.client_id,
            date: first.date.clone(),
            time: first.time.clone(),
            attempt_id: first.id,
            created_at: ts(10),
        })
        .unwrap();
    assert!(matches!(created, BookingInsert::Created(_)));

    let conflicted = store
        .insert_unique(&NewBooking {
            provider_id: second.provider_id,
            client_id: second.client_id,
            date: second.date.clone(),
            time: second.time.clone(),
            attempt_id: second.id,
            created_at: ts(20),
        })
        .unwrap();
    let BookingInsert::SlotTaken(existing) = conflicted else {
        panic!("expected slot conflict, got {conflicted:?}");
    };
    assert_eq!(existing.attempt_id, first.id);
}

// ============================================================================
// SECTION: Schema Migration
// ============================================================================

/// Creates a version-1 database by hand: the schema before the durable
/// outbox was added.
fn write_v1_database(path: &Path) {
    let connection = rusqlite::Connection::open(path).expect("open raw db");
    connection
        .execute_batch(
            "CREATE TABLE store_meta (version INTEGER NOT NULL);
             INSERT INTO store_meta (version) VALUES (1);
             CREATE TABLE reservations (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 provider_id INTEGER NOT NULL,
                 client_id INTEGER NOT NULL,
                 slot_date TEXT NOT NULL,
                 slot_time TEXT NOT NULL,
                 order_id TEXT NOT NULL UNIQUE,
                 status TEXT NOT NULL,
                 expires_at INTEGER NOT NULL,
                 payment_id TEXT,
                 created_at INTEGER NOT NULL,
                 updated_at INTEGER NOT NULL
             );
             CREATE TABLE payment_attempts (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 order_id TEXT NOT NULL UNIQUE,
                 gateway_payment_id TEXT UNIQUE,
                 reservation_id INTEGER,
                 amount_minor INTEGER NOT NULL,
                 currency TEXT NOT NULL,
                 status TEXT NOT NULL,
                 booking_id INTEGER,
                 manual_review TEXT,
                 provider_id INTEGER NOT NULL,
                 client_id INTEGER NOT NULL,
                 slot_date TEXT NOT NULL,
                 slot_time TEXT NOT NULL,
                 created_at INTEGER NOT NULL,
                 completed_at INTEGER
             );
             CREATE TABLE bookings (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 provider_id INTEGER NOT NULL,
                 client_id INTEGER NOT NULL,
                 slot_date TEXT NOT NULL,
                 slot_time TEXT NOT NULL,
                 attempt_id INTEGER NOT NULL UNIQUE,
                 status TEXT NOT NULL,
                 created_at INTEGER NOT NULL
             );
             CREATE UNIQUE INDEX idx_bookings_active_slot
                 ON bookings (provider_id, slot_date, slot_time)
                 WHERE status = 'confirmed';",
        )
        .expect("v1 schema");
}

#[test]
fn version_one_database_gains_the_outbox_on_open() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.sqlite");
    write_v1_database(&path);

    let store = store_for(&path);
    // Existing v1 data still loads and the outbox table now exists.
    store.claim_slot(&new_reservation(1, "order-1", 0), ts(0)).unwrap();
    let manager = ReservationManager::new(SharedStores::from_store(store.clone()));
    manager.claim(&claim_request(2, "order-2"), ts(HOLD_TTL_MS + 1)).unwrap();
    let attempt = PaymentLedger::find_by_order(&store, &OrderId::new("order-2")).unwrap().unwrap();
    let created = store
        .insert_unique(&NewBooking {
            provider_id: attempt.provider_id,
            client_id: attempt.client_id,
            date: attempt.date.clone(),
            time: attempt.time.clone(),
            attempt_id: attempt.id,
            created_at: ts(10),
        })
        .unwrap();
    let BookingInsert::Created(booking) = created else {
        panic!("expected created booking");
    };
    slotbook_core::OutboxStore::enqueue(
        &store,
        booking.id,
        slotbook_core::NotificationKind::Receipt,
        ts(20),
    )
    .unwrap();
    assert_eq!(slotbook_core::OutboxStore::due(&store, 8).unwrap().len(), 1);
}

#[test]
fn newer_schema_version_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.sqlite");
    {
        let connection = rusqlite::Connection::open(&path).expect("open raw db");
        connection
            .execute_batch(
                "CREATE TABLE store_meta (version INTEGER NOT NULL);
                 INSERT INTO store_meta (version) VALUES (99);",
            )
            .expect("future schema");
    }
    let config = SqliteStoreConfig {
        path,
        busy_timeout_ms: 1_000,
        journal_mode: SqliteStoreMode::Wal,
        sync_mode: SqliteSyncMode::Full,
    };
    assert!(SqliteBookingStore::new(&config).is_err());
}

// ============================================================================
// SECTION: Persistence
// ============================================================================

#[test]
fn reservations_persist_across_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.sqlite");
    {
        let store = store_for(&path);
        store.claim_slot(&new_reservation(1, "order-1", 0), ts(0)).unwrap();
    }
    let store = store_for(&path);
    let reservation =
        ReservationStore::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Held);
    assert_eq!(reservation.client_id.get(), 1);
}

// ============================================================================
// SECTION: End to End Through the Processor
// ============================================================================

#[test]
fn webhook_flow_books_against_sqlite() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("store.sqlite"));
    let shared = SharedStores::from_store(store.clone());
    let manager = ReservationManager::new(shared.clone());
    manager.claim(&claim_request(1, "order-1"), ts(0)).unwrap();

    let processor = WebhookProcessor::new(shared, SECRET.to_vec());
    let body = capture_body("order-1", "pay_123", 150_000);
    let signature = hmac_sha256_hex(SECRET, &body);
    let first = processor.handle_event(&body, &signature, ts(1_000)).unwrap();
    let second = processor.handle_event(&body, &signature, ts(2_000)).unwrap();

    let reservation =
        ReservationStore::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Booked);
    let attempt = PaymentLedger::find_by_order(&store, &OrderId::new("order-1")).unwrap().unwrap();
    let booking = store.find_by_attempt(attempt.id).unwrap().unwrap();
    let WebhookOutcome::Booked {
        booking_id: first_id, ..
    } = first
    else {
        panic!("expected booking from first delivery");
    };
    let WebhookOutcome::Booked {
        booking_id: second_id, ..
    } = second
    else {
        panic!("expected booking from second delivery");
    };
    assert_eq!(first_id, booking.id);
    assert_eq!(second_id, booking.id);
}
