// crates/slotbook-server/src/tasks.rs
// ============================================================================
// Module: Server Background Tasks
// Description: Periodic sweep and outbox pump loops.
// Purpose: Run repair and delivery on their own cadence, off the request path.
// Dependencies: slotbook-core, slotbook-outbox, tokio
// ============================================================================

//! ## Overview
//! The core never reads wall-clock time; this module is where the host
//! supplies it. Two loops run for the lifetime of the server: the
//! reconciliation sweep (minutes-scale repair) and the outbox pump
//! (notification delivery). Both log a JSON report line per tick through
//! the audit sink, and both tolerate tick failures — the next tick simply
//! retries, because every underlying action is idempotent.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use slotbook_core::ReconciliationSweep;
use slotbook_core::SweepReport;
use slotbook_core::Timestamp;
use slotbook_outbox::OutboxPump;
use tokio::task::JoinHandle;

use crate::audit::AuditSink;
use crate::audit::SweepAuditEvent;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Returns the current wall-clock time as a core timestamp.
#[must_use]
pub fn wall_clock() -> Timestamp {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
    Timestamp::from_unix_millis(millis)
}

// ============================================================================
// SECTION: Sweep Loop
// ============================================================================

/// Spawns the periodic reconciliation sweep.
#[must_use]
pub fn spawn_sweep(
    sweep: ReconciliationSweep,
    interval: Duration,
    audit: Arc<dyn AuditSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let now = wall_clock();
            match sweep.run_once(now) {
                Ok(report) => audit.record_sweep(&SweepAuditEvent {
                    event: "sweep_tick",
                    timestamp_ms: now.as_unix_millis(),
                    report,
                    scan_error: None,
                }),
                Err(err) => audit.record_sweep(&SweepAuditEvent {
                    event: "sweep_tick",
                    timestamp_ms: now.as_unix_millis(),
                    report: SweepReport::default(),
                    scan_error: Some(err.to_string()),
                }),
            }
        }
    })
}

// ============================================================================
// SECTION: Outbox Loop
// ============================================================================

/// Spawns the periodic outbox pump.
#[must_use]
pub fn spawn_outbox_pump(pump: OutboxPump, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            // Pass failures surface through task attempt counters and the
            // dead-letter state; the next tick retries what remains.
            let _ = pump.run_once(wall_clock());
        }
    })
}
