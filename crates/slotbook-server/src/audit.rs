// crates/slotbook-server/src/audit.rs
// ============================================================================
// Module: Server Audit Logging
// Description: Structured audit events for booking-engine request handling.
// Purpose: Emit redacted audit records without hard logging dependencies.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! This module defines audit event payloads and sinks for the booking
//! server. Events are emitted as single-line JSON so deployments can route
//! them into their preferred logging pipeline without redesign. Payloads
//! never include raw webhook bodies or secret material — identifiers and
//! outcomes only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;

use serde::Serialize;
use slotbook_core::SweepReport;

// ============================================================================
// SECTION: Event Types
// ============================================================================

/// Webhook processing audit event.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Merchant order identifier when known.
    pub order_id: Option<String>,
    /// Outcome label.
    pub outcome: &'static str,
    /// HTTP status returned to the gateway.
    pub status: u16,
    /// True when the reservation-less legacy path handled the event.
    pub legacy_fallback: bool,
    /// Conflict or failure detail when present.
    pub detail: Option<String>,
}

/// Security audit event (authentication failures and the like).
#[derive(Debug, Clone, Serialize)]
pub struct SecurityAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Surface the event occurred on.
    pub surface: &'static str,
    /// Failure reason label.
    pub reason: &'static str,
}

/// Claim surface audit event.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Provider whose slot was requested.
    pub provider_id: u64,
    /// Merchant order identifier.
    pub order_id: String,
    /// Outcome label.
    pub outcome: &'static str,
}

/// Sweep tick audit event.
#[derive(Debug, Clone, Serialize)]
pub struct SweepAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Counters for the tick.
    pub report: SweepReport,
    /// Scan failure description when the tick could not run.
    pub scan_error: Option<String>,
}

// ============================================================================
// SECTION: Sink
// ============================================================================

/// Audit sink for booking-server events.
pub trait AuditSink: Send + Sync {
    /// Records a webhook processing event.
    fn record_webhook(&self, event: &WebhookAuditEvent);
    /// Records a security event.
    fn record_security(&self, event: &SecurityAuditEvent);
    /// Records a claim surface event.
    fn record_claim(&self, event: &ClaimAuditEvent);
    /// Records a sweep tick event.
    fn record_sweep(&self, event: &SweepAuditEvent);
}

/// Audit sink writing single-line JSON records to stderr.
pub struct StderrAuditSink;

impl StderrAuditSink {
    /// Serializes and writes one record, swallowing write failures: audit
    /// output must never take the request path down with it.
    fn write_record<T: Serialize>(record: &T) {
        if let Ok(payload) = serde_json::to_string(record) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

impl AuditSink for StderrAuditSink {
    fn record_webhook(&self, event: &WebhookAuditEvent) {
        Self::write_record(event);
    }

    fn record_security(&self, event: &SecurityAuditEvent) {
        Self::write_record(event);
    }

    fn record_claim(&self, event: &ClaimAuditEvent) {
        Self::write_record(event);
    }

    fn record_sweep(&self, event: &SweepAuditEvent) {
        Self::write_record(event);
    }
}
