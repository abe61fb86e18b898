// crates/slotbook-core/tests/common/mod.rs
// ============================================================================
// Module: Core Test Helpers
// Description: Shared fixtures for booking engine conformance tests.
// Purpose: Build stores, requests, and signed webhook bodies.
// Dependencies: slotbook-core, serde_json
// ============================================================================

#![allow(dead_code, reason = "Shared helpers are not exercised by every suite.")]

use slotbook_core::ClaimRequest;
use slotbook_core::ClientId;
use slotbook_core::Currency;
use slotbook_core::InMemoryBookingStore;
use slotbook_core::Money;
use slotbook_core::OrderId;
use slotbook_core::ProviderId;
use slotbook_core::SharedStores;
use slotbook_core::SlotDate;
use slotbook_core::SlotTime;
use slotbook_core::Timestamp;
use slotbook_core::WebhookProcessor;
use slotbook_core::hmac_sha256_hex;

/// Webhook secret shared by the test gateway.
pub const SECRET: &[u8] = b"test-webhook-secret";

/// Builds a fresh in-memory store.
pub fn memory_store() -> InMemoryBookingStore {
    InMemoryBookingStore::new()
}

/// Bundles a store into shared handles.
pub fn shared(store: &InMemoryBookingStore) -> SharedStores {
    SharedStores::from_store(store.clone())
}

/// Builds a webhook processor over a store with the test secret.
pub fn processor(store: &InMemoryBookingStore) -> WebhookProcessor {
    WebhookProcessor::new(shared(store), SECRET.to_vec())
}

/// Timestamp helper.
pub fn ts(millis: i64) -> Timestamp {
    Timestamp::from_unix_millis(millis)
}

/// Provider id helper.
pub fn provider(raw: u64) -> ProviderId {
    ProviderId::from_raw(raw).expect("nonzero provider id")
}

/// Client id helper.
pub fn client(raw: u64) -> ClientId {
    ClientId::from_raw(raw).expect("nonzero client id")
}

/// Slot date helper.
pub fn date(value: &str) -> SlotDate {
    SlotDate::parse(value).expect("valid slot date")
}

/// Slot time helper.
pub fn time(value: &str) -> SlotTime {
    SlotTime::parse(value).expect("valid slot time")
}

/// INR amount helper.
pub fn inr(minor_units: i64) -> Money {
    Money::new(minor_units, Currency::parse("INR").expect("valid currency"))
}

/// Standard claim request for provider 1, slot 2025-01-10 10:00.
pub fn claim_request(client_raw: u64, order: &str) -> ClaimRequest {
    ClaimRequest {
        provider_id: provider(1),
        client_id: client(client_raw),
        date: date("2025-01-10"),
        time: time("10:00"),
        order_id: OrderId::new(order),
        amount: inr(150_000),
    }
}

/// Serialized `payment.captured` body.
pub fn capture_body(order: &str, payment: &str, amount: i64) -> Vec<u8> {
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

/// Serialized `payment.failed` body.
pub fn failed_body(order: &str, reason: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "event": "payment.failed",
        "payload": {
            "order_id": order,
            "reason": reason,
        },
    }))
    .expect("serializable body")
}

/// Signs a body with the test secret.
pub fn sign(body: &[u8]) -> String {
    hmac_sha256_hex(SECRET, body)
}
