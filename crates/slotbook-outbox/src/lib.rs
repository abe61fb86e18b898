// crates/slotbook-outbox/src/lib.rs
// ============================================================================
// Module: Slotbook Outbox Library
// Description: Public API surface for notification dispatch.
// Purpose: Expose the sink contract and the outbox pump.
// Dependencies: crate::{pump, sink}
// ============================================================================

//! ## Overview
//! Booking side effects (confirmation email, WhatsApp message, receipt,
//! meeting link) are delivered from a durable outbox, never inline with the
//! booking transaction. Delivery failure is retried with a bounded budget
//! and can never affect the booking itself. Any number of pump instances
//! may drain the same outbox: the task row's status CAS is the only
//! coordination.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod pump;
pub mod sink;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use pump::OutboxPump;
pub use pump::PumpReport;
pub use sink::ChannelSink;
pub use sink::LogSink;
pub use sink::Notification;
pub use sink::NotificationSink;
pub use sink::SinkError;
