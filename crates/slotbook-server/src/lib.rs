// crates/slotbook-server/src/lib.rs
// ============================================================================
// Module: Slotbook Server Library
// Description: Public API surface for the Slotbook HTTP server.
// Purpose: Expose the server, audit sinks, and metrics hooks.
// Dependencies: crate::{audit, server, tasks, telemetry}
// ============================================================================

//! ## Overview
//! The server crate is the host boundary of the booking engine: it resolves
//! configuration and secrets, supplies wall-clock timestamps to the core,
//! exposes the webhook and claim endpoints over HTTP, and runs the sweep
//! and outbox pump as background tasks. Response codes encode the retry
//! contract with the payment gateway: 200 means stop retrying, 4xx means
//! the delivery is bad, 5xx means try again.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod server;
pub mod tasks;
pub mod telemetry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditSink;
pub use audit::ClaimAuditEvent;
pub use audit::SecurityAuditEvent;
pub use audit::StderrAuditSink;
pub use audit::SweepAuditEvent;
pub use audit::WebhookAuditEvent;
pub use server::BookingServer;
pub use server::ServerError;
pub use server::build_stores;
pub use tasks::spawn_outbox_pump;
pub use tasks::spawn_sweep;
pub use tasks::wall_clock;
pub use telemetry::NoopMetrics;
pub use telemetry::RequestMetricEvent;
pub use telemetry::RequestSurface;
pub use telemetry::ServerMetrics;
