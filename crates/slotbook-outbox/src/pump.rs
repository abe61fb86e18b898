// crates/slotbook-outbox/src/pump.rs
// ============================================================================
// Module: Outbox Pump
// Description: Drains due notification tasks into their sinks.
// Purpose: Deliver booking side effects at most once with bounded retry.
// Dependencies: slotbook-core, crate::sink
// ============================================================================

//! ## Overview
//! The pump reads due tasks from the durable outbox, resolves each booking,
//! and hands the notification to the sink registered for its kind. The task
//! row is the idempotency marker: `mark_sent` is a status CAS, so two pump
//! instances draining the same outbox cannot double-send a task whose sink
//! delivered. A sink failure counts one attempt; the task dead-letters when
//! the attempt budget is exhausted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use slotbook_core::NotificationKind;
use slotbook_core::SharedStores;
use slotbook_core::StoreError;
use slotbook_core::Timestamp;

use crate::sink::Notification;
use crate::sink::NotificationSink;

// ============================================================================
// SECTION: Report
// ============================================================================

/// Counters for one pump pass.
///
/// # Invariants
/// - Counters are per-pass; the pump keeps no cross-pass state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpReport {
    /// Tasks delivered and marked sent.
    pub delivered: usize,
    /// Tasks whose sink failed (attempt counted, retried later).
    pub failed: usize,
    /// Tasks with no registered sink or no resolvable booking.
    pub skipped: usize,
}

// ============================================================================
// SECTION: Outbox Pump
// ============================================================================

/// Drains the durable outbox into registered sinks.
pub struct OutboxPump {
    /// Shared store handles.
    stores: SharedStores,
    /// Sink per notification kind.
    sinks: BTreeMap<&'static str, Arc<dyn NotificationSink + Send + Sync>>,
    /// Delivery attempts before a task is dead-lettered.
    max_attempts: u32,
    /// Maximum tasks drained per pass.
    batch_limit: usize,
}

impl OutboxPump {
    /// Creates a pump with no sinks registered.
    #[must_use]
    pub fn new(stores: SharedStores, max_attempts: u32, batch_limit: usize) -> Self {
        Self {
            stores,
            sinks: BTreeMap::new(),
            max_attempts,
            batch_limit,
        }
    }

    /// Registers a sink for a notification kind (later registrations
    /// overwrite earlier ones).
    #[must_use]
    pub fn with_sink(
        mut self,
        kind: NotificationKind,
        sink: Arc<dyn NotificationSink + Send + Sync>,
    ) -> Self {
        self.sinks.insert(kind.as_str(), sink);
        self
    }

    /// Runs one pump pass over due tasks.
    ///
    /// Per-task failures never abort the pass.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only when the due-task scan itself fails.
    pub fn run_once(&self, now: Timestamp) -> Result<PumpReport, StoreError> {
        let mut report = PumpReport::default();
        let due = self.stores.outbox().due(self.batch_limit)?;
        for task in due {
            let Some(sink) = self.sinks.get(task.kind.as_str()) else {
                report.skipped += 1;
                continue;
            };
            let booking = match self.stores.bookings().find_by_id(task.booking_id) {
                Ok(Some(booking)) => booking,
                Ok(None) => {
                    // A task without a booking cannot be delivered; burn its
                    // attempts so it dead-letters for operator review.
                    let _ = self.stores.outbox().mark_failed(
                        task.id,
                        "booking not found",
                        self.max_attempts,
                        now,
                    );
                    report.skipped += 1;
                    continue;
                }
                Err(_) => {
                    report.skipped += 1;
                    continue;
                }
            };
            let notification = Notification {
                task_id: task.id,
                kind: task.kind,
                booking,
                dispatched_at: now,
            };
            match sink.deliver(&notification) {
                Ok(()) => {
                    self.stores.outbox().mark_sent(task.id, now)?;
                    report.delivered += 1;
                }
                Err(err) => {
                    self.stores.outbox().mark_failed(
                        task.id,
                        &err.to_string(),
                        self.max_attempts,
                        now,
                    )?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}
