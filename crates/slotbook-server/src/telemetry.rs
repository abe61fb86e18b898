// crates/slotbook-server/src/telemetry.rs
// ============================================================================
// Module: Server Telemetry
// Description: Observability hooks for booking-engine request handling.
// Purpose: Provide metric events without hard dependencies.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module exposes a thin metrics interface for request counters and
//! latencies. It is intentionally dependency-light so deployments can plug
//! in Prometheus or OpenTelemetry without redesign. Labels never carry
//! order identifiers or other per-request data — cardinality stays bounded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// SECTION: Metric Labels
// ============================================================================

/// Request surface classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RequestSurface {
    /// Inbound gateway webhook.
    Webhook,
    /// Booking-initiation claim.
    Claim,
    /// Health probe.
    Health,
}

impl RequestSurface {
    /// Returns a stable label for the surface.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Claim => "claim",
            Self::Health => "health",
        }
    }
}

/// Request metric event payload.
///
/// # Invariants
/// - `status` is the HTTP status returned to the caller.
#[derive(Debug, Clone, Copy)]
pub struct RequestMetricEvent {
    /// Request surface.
    pub surface: RequestSurface,
    /// HTTP status returned.
    pub status: u16,
    /// Request body size in bytes.
    pub request_bytes: usize,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Metrics sink for booking-server requests.
pub trait ServerMetrics: Send + Sync {
    /// Records a request counter event.
    fn record_request(&self, event: RequestMetricEvent);
    /// Records a latency observation for the request.
    fn record_latency(&self, event: RequestMetricEvent, latency: Duration);
}

/// No-op metrics sink.
///
/// # Invariants
/// - Metrics are intentionally discarded.
pub struct NoopMetrics;

impl ServerMetrics for NoopMetrics {
    fn record_request(&self, _event: RequestMetricEvent) {}

    fn record_latency(&self, _event: RequestMetricEvent, _latency: Duration) {}
}
