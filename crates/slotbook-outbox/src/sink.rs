// crates/slotbook-outbox/src/sink.rs
// ============================================================================
// Module: Notification Sinks
// Description: Delivery contract and reference sinks for booking notifications.
// Purpose: Decouple what is sent from how it is sent.
// Dependencies: slotbook-core, serde, serde_json, tokio
// ============================================================================

//! ## Overview
//! A [`NotificationSink`] delivers one notification and reports success or
//! failure; the pump owns retries and idempotency markers, so sinks can stay
//! stateless. Two reference sinks ship with the crate: [`LogSink`] writes
//! audit-grade JSON records without external delivery, and [`ChannelSink`]
//! hands notifications to an in-process consumer over a Tokio channel.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;
use slotbook_core::Booking;
use slotbook_core::NotificationKind;
use slotbook_core::Timestamp;
use thiserror::Error;
use tokio::sync::mpsc::Sender;

// ============================================================================
// SECTION: Notification
// ============================================================================

/// One notification ready for delivery.
///
/// # Invariants
/// - Carries the denormalized booking details a sink needs; sinks never
///   read the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Outbox task identifier (delivery correlation).
    pub task_id: u64,
    /// Notification kind.
    pub kind: NotificationKind,
    /// The booking the notification belongs to.
    pub booking: Booking,
    /// Delivery instant supplied by the pump.
    pub dispatched_at: Timestamp,
}

// ============================================================================
// SECTION: Sink Contract
// ============================================================================

/// Sink delivery errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Delivery failed; the pump will retry within its budget.
    #[error("notification delivery failed: {0}")]
    DeliveryFailed(String),
    /// Log record could not be written.
    #[error("notification log write failed: {0}")]
    LogWriteFailed(String),
}

/// Delivery contract for booking notifications.
pub trait NotificationSink {
    /// Delivers one notification.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when delivery fails; the pump counts the
    /// attempt and retries up to its budget.
    fn deliver(&self, notification: &Notification) -> Result<(), SinkError>;
}

// ============================================================================
// SECTION: Log Sink
// ============================================================================

/// Log-only notification sink.
pub struct LogSink<W: Write + Send> {
    /// Output writer for log records.
    writer: Mutex<W>,
}

impl<W: Write + Send> LogSink<W> {
    /// Creates a log sink over a writer.
    pub const fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> NotificationSink for LogSink<W> {
    fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        let record = serde_json::json!({
            "event": "notification_delivered",
            "task_id": notification.task_id,
            "kind": notification.kind.as_str(),
            "booking_id": notification.booking.id.get(),
            "provider_id": notification.booking.provider_id.get(),
            "client_id": notification.booking.client_id.get(),
            "slot_date": notification.booking.date.as_str(),
            "slot_time": notification.booking.time.as_str(),
            "dispatched_at": notification.dispatched_at.as_unix_millis(),
        });
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| SinkError::LogWriteFailed("log writer mutex poisoned".to_string()))?;
        serde_json::to_writer(&mut *guard, &record)
            .map_err(|err| SinkError::LogWriteFailed(err.to_string()))?;
        guard.write_all(b"\n").map_err(|err| SinkError::LogWriteFailed(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Channel Sink
// ============================================================================

/// Channel-based notification sink.
///
/// # Invariants
/// - Each successful delivery enqueues exactly one notification.
#[derive(Debug)]
pub struct ChannelSink {
    /// Sender used to hand off notifications.
    sender: Sender<Notification>,
}

impl ChannelSink {
    /// Creates a channel sink over a sender.
    #[must_use]
    pub const fn new(sender: Sender<Notification>) -> Self {
        Self {
            sender,
        }
    }
}

impl NotificationSink for ChannelSink {
    fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        self.sender
            .try_send(notification.clone())
            .map_err(|err| SinkError::DeliveryFailed(err.to_string()))
    }
}
