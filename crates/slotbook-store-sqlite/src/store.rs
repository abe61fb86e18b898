// crates/slotbook-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Booking Store
// Description: Durable store for reservations, payments, bookings, and outbox.
// Purpose: Provide unique-insert and compare-and-swap on SQLite WAL.
// Dependencies: slotbook-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! This module implements the four Slotbook store interfaces on a single
//! SQLite database. Claim inserts run inside immediate transactions so the
//! availability check and the insert are one atomic step; status moves are
//! `UPDATE … WHERE status IN (…)` with changed-row checks; double-booking
//! is stopped by a partial unique index over confirmed bookings, which
//! holds even when the reservation guard was bypassed. Database contents
//! are treated as untrusted on load and fail closed on corruption.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use slotbook_core::AttemptId;
use slotbook_core::Booking;
use slotbook_core::BookingId;
use slotbook_core::BookingInsert;
use slotbook_core::BookingStatus;
use slotbook_core::BookingStore;
use slotbook_core::ClientId;
use slotbook_core::Currency;
use slotbook_core::GatewayPaymentId;
use slotbook_core::Money;
use slotbook_core::NewBooking;
use slotbook_core::NewPaymentAttempt;
use slotbook_core::NewReservation;
use slotbook_core::NotificationKind;
use slotbook_core::OrderId;
use slotbook_core::OutboxStatus;
use slotbook_core::OutboxStore;
use slotbook_core::OutboxTask;
use slotbook_core::PaymentAttempt;
use slotbook_core::PaymentLedger;
use slotbook_core::PaymentStatus;
use slotbook_core::ProviderId;
use slotbook_core::RecordPayment;
use slotbook_core::Reservation;
use slotbook_core::ReservationId;
use slotbook_core::ReservationStatus;
use slotbook_core::ReservationStore;
use slotbook_core::SlotClaim;
use slotbook_core::SlotDate;
use slotbook_core::SlotTime;
use slotbook_core::StoreError;
use slotbook_core::Timestamp;
use slotbook_core::Transition;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 2;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` booking store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while opening or migrating the store.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Database open or pragma failure.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Configuration is invalid.
    #[error("sqlite store invalid config: {0}")]
    Invalid(String),
    /// Stored schema version is newer than this build supports.
    #[error("sqlite store schema version {found} is newer than supported {supported}")]
    VersionAhead {
        /// Version found in the database.
        found: i64,
        /// Version this build supports.
        supported: i64,
    },
}

/// Maps a rusqlite error onto the shared store error taxonomy.
fn db_err(err: &rusqlite::Error) -> StoreError {
    StoreError::Store(err.to_string())
}

/// Returns true when the error is a uniqueness-constraint violation.
fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
    )
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Durable booking store backed by one `SQLite` database.
#[derive(Clone)]
pub struct SqliteBookingStore {
    /// Write connection guarded by a mutex; claims and transitions are
    /// short transactions, so one writer is the simplest correct shape.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteBookingStore {
    /// Opens (and migrates) the store at the configured path.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened,
    /// configured, or migrated.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        if config.path.as_os_str().is_empty() {
            return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
        }
        let mut connection =
            Connection::open(&config.path).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        connection
            .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        connection
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        connection
            .execute_batch(&format!(
                "PRAGMA journal_mode = {};",
                config.journal_mode.pragma_value()
            ))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        connection
            .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        migrate(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Locks the connection, mapping poisoning to a store error.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Store("sqlite connection mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Creates or migrates the schema in one transaction.
fn migrate(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(SCHEMA_V1).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(SCHEMA_V2_OUTBOX)
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(1) => {
            // Version 1 predates the durable outbox.
            tx.execute_batch(SCHEMA_V2_OUTBOX)
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute("UPDATE store_meta SET version = ?1", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(SCHEMA_VERSION) => {}
        Some(found) => {
            return Err(SqliteStoreError::VersionAhead {
                found,
                supported: SCHEMA_VERSION,
            });
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))
}

/// Version 1 schema: reservations, payment attempts, bookings.
const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS reservations (
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
CREATE INDEX IF NOT EXISTS idx_reservations_slot
    ON reservations (provider_id, slot_date, slot_time);
CREATE INDEX IF NOT EXISTS idx_reservations_status
    ON reservations (status, expires_at);

CREATE TABLE IF NOT EXISTS payment_attempts (
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

CREATE TABLE IF NOT EXISTS bookings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id INTEGER NOT NULL,
    client_id INTEGER NOT NULL,
    slot_date TEXT NOT NULL,
    slot_time TEXT NOT NULL,
    attempt_id INTEGER NOT NULL UNIQUE,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_bookings_active_slot
    ON bookings (provider_id, slot_date, slot_time)
    WHERE status = 'confirmed';
";

/// Version 2 schema additions: the durable notification outbox.
const SCHEMA_V2_OUTBOX: &str = "
CREATE TABLE IF NOT EXISTS outbox_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    booking_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    sent_at INTEGER,
    UNIQUE (booking_id, kind)
);
CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox_tasks (status, id);
";

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Parses a stored reservation status label.
fn reservation_status(label: &str) -> Result<ReservationStatus, StoreError> {
    match label {
        "held" => Ok(ReservationStatus::Held),
        "payment_pending" => Ok(ReservationStatus::PaymentPending),
        "payment_confirmed" => Ok(ReservationStatus::PaymentConfirmed),
        "booked" => Ok(ReservationStatus::Booked),
        "failed" => Ok(ReservationStatus::Failed),
        "expired" => Ok(ReservationStatus::Expired),
        other => Err(StoreError::Corrupt(format!("unknown reservation status: {other}"))),
    }
}

/// Parses a stored payment status label.
fn payment_status(label: &str) -> Result<PaymentStatus, StoreError> {
    match label {
        "pending" => Ok(PaymentStatus::Pending),
        "success" => Ok(PaymentStatus::Success),
        "failed" => Ok(PaymentStatus::Failed),
        other => Err(StoreError::Corrupt(format!("unknown payment status: {other}"))),
    }
}

/// Parses a stored booking status label.
fn booking_status(label: &str) -> Result<BookingStatus, StoreError> {
    match label {
        "confirmed" => Ok(BookingStatus::Confirmed),
        "cancelled" => Ok(BookingStatus::Cancelled),
        other => Err(StoreError::Corrupt(format!("unknown booking status: {other}"))),
    }
}

/// Parses a stored notification kind label.
fn notification_kind(label: &str) -> Result<NotificationKind, StoreError> {
    match label {
        "confirmation_email" => Ok(NotificationKind::ConfirmationEmail),
        "confirmation_whatsapp" => Ok(NotificationKind::ConfirmationWhatsApp),
        "receipt" => Ok(NotificationKind::Receipt),
        "meeting_link" => Ok(NotificationKind::MeetingLink),
        other => Err(StoreError::Corrupt(format!("unknown notification kind: {other}"))),
    }
}

/// Parses a stored outbox status label.
fn outbox_status(label: &str) -> Result<OutboxStatus, StoreError> {
    match label {
        "pending" => Ok(OutboxStatus::Pending),
        "sent" => Ok(OutboxStatus::Sent),
        "dead" => Ok(OutboxStatus::Dead),
        other => Err(StoreError::Corrupt(format!("unknown outbox status: {other}"))),
    }
}

/// Converts a stored rowid into a non-zero u64.
fn stored_id(raw: i64, what: &str) -> Result<u64, StoreError> {
    u64::try_from(raw)
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| StoreError::Corrupt(format!("invalid {what} id: {raw}")))
}

/// Maps a reservation row.
fn row_reservation(row: &Row<'_>) -> Result<Reservation, StoreError> {
    let id: i64 = row.get(0).map_err(|err| db_err(&err))?;
    let provider: i64 = row.get(1).map_err(|err| db_err(&err))?;
    let client: i64 = row.get(2).map_err(|err| db_err(&err))?;
    let date: String = row.get(3).map_err(|err| db_err(&err))?;
    let time: String = row.get(4).map_err(|err| db_err(&err))?;
    let order: String = row.get(5).map_err(|err| db_err(&err))?;
    let status: String = row.get(6).map_err(|err| db_err(&err))?;
    let expires_at: i64 = row.get(7).map_err(|err| db_err(&err))?;
    let payment: Option<String> = row.get(8).map_err(|err| db_err(&err))?;
    let created_at: i64 = row.get(9).map_err(|err| db_err(&err))?;
    let updated_at: i64 = row.get(10).map_err(|err| db_err(&err))?;
    Ok(Reservation {
        id: ReservationId::from_raw(stored_id(id, "reservation")?)
            .ok_or_else(|| StoreError::Corrupt("zero reservation id".to_string()))?,
        provider_id: ProviderId::from_raw(stored_id(provider, "provider")?)
            .ok_or_else(|| StoreError::Corrupt("zero provider id".to_string()))?,
        client_id: ClientId::from_raw(stored_id(client, "client")?)
            .ok_or_else(|| StoreError::Corrupt("zero client id".to_string()))?,
        date: SlotDate::parse(&date).map_err(|err| StoreError::Corrupt(err.to_string()))?,
        time: SlotTime::parse(&time).map_err(|err| StoreError::Corrupt(err.to_string()))?,
        order_id: OrderId::new(order),
        status: reservation_status(&status)?,
        expires_at: Timestamp::from_unix_millis(expires_at),
        payment_id: payment.map(GatewayPaymentId::new),
        created_at: Timestamp::from_unix_millis(created_at),
        updated_at: Timestamp::from_unix_millis(updated_at),
    })
}

/// Column list matching [`row_reservation`].
const RESERVATION_COLUMNS: &str = "id, provider_id, client_id, slot_date, slot_time, order_id, \
                                   status, expires_at, payment_id, created_at, updated_at";

/// Maps a payment attempt row.
fn row_attempt(row: &Row<'_>) -> Result<PaymentAttempt, StoreError> {
    let id: i64 = row.get(0).map_err(|err| db_err(&err))?;
    let order: String = row.get(1).map_err(|err| db_err(&err))?;
    let payment: Option<String> = row.get(2).map_err(|err| db_err(&err))?;
    let reservation: Option<i64> = row.get(3).map_err(|err| db_err(&err))?;
    let amount_minor: i64 = row.get(4).map_err(|err| db_err(&err))?;
    let currency: String = row.get(5).map_err(|err| db_err(&err))?;
    let status: String = row.get(6).map_err(|err| db_err(&err))?;
    let booking: Option<i64> = row.get(7).map_err(|err| db_err(&err))?;
    let manual_review: Option<String> = row.get(8).map_err(|err| db_err(&err))?;
    let provider: i64 = row.get(9).map_err(|err| db_err(&err))?;
    let client: i64 = row.get(10).map_err(|err| db_err(&err))?;
    let date: String = row.get(11).map_err(|err| db_err(&err))?;
    let time: String = row.get(12).map_err(|err| db_err(&err))?;
    let created_at: i64 = row.get(13).map_err(|err| db_err(&err))?;
    let completed_at: Option<i64> = row.get(14).map_err(|err| db_err(&err))?;
    let reservation_id = match reservation {
        None => None,
        Some(raw) => Some(
            ReservationId::from_raw(stored_id(raw, "reservation")?)
                .ok_or_else(|| StoreError::Corrupt("zero reservation id".to_string()))?,
        ),
    };
    let booking_id = match booking {
        None => None,
        Some(raw) => Some(
            BookingId::from_raw(stored_id(raw, "booking")?)
                .ok_or_else(|| StoreError::Corrupt("zero booking id".to_string()))?,
        ),
    };
    Ok(PaymentAttempt {
        id: AttemptId::from_raw(stored_id(id, "attempt")?)
            .ok_or_else(|| StoreError::Corrupt("zero attempt id".to_string()))?,
        order_id: OrderId::new(order),
        gateway_payment_id: payment.map(GatewayPaymentId::new),
        reservation_id,
        amount: Money::new(
            amount_minor,
            Currency::parse(&currency).map_err(|err| StoreError::Corrupt(err.to_string()))?,
        ),
        status: payment_status(&status)?,
        booking_id,
        manual_review,
        provider_id: ProviderId::from_raw(stored_id(provider, "provider")?)
            .ok_or_else(|| StoreError::Corrupt("zero provider id".to_string()))?,
        client_id: ClientId::from_raw(stored_id(client, "client")?)
            .ok_or_else(|| StoreError::Corrupt("zero client id".to_string()))?,
        date: SlotDate::parse(&date).map_err(|err| StoreError::Corrupt(err.to_string()))?,
        time: SlotTime::parse(&time).map_err(|err| StoreError::Corrupt(err.to_string()))?,
        created_at: Timestamp::from_unix_millis(created_at),
        completed_at: completed_at.map(Timestamp::from_unix_millis),
    })
}

/// Column list matching [`row_attempt`].
const ATTEMPT_COLUMNS: &str = "id, order_id, gateway_payment_id, reservation_id, amount_minor, \
                               currency, status, booking_id, manual_review, provider_id, \
                               client_id, slot_date, slot_time, created_at, completed_at";

/// Maps a booking row.
fn row_booking(row: &Row<'_>) -> Result<Booking, StoreError> {
    let id: i64 = row.get(0).map_err(|err| db_err(&err))?;
    let provider: i64 = row.get(1).map_err(|err| db_err(&err))?;
    let client: i64 = row.get(2).map_err(|err| db_err(&err))?;
    let date: String = row.get(3).map_err(|err| db_err(&err))?;
    let time: String = row.get(4).map_err(|err| db_err(&err))?;
    let attempt: i64 = row.get(5).map_err(|err| db_err(&err))?;
    let status: String = row.get(6).map_err(|err| db_err(&err))?;
    let created_at: i64 = row.get(7).map_err(|err| db_err(&err))?;
    Ok(Booking {
        id: BookingId::from_raw(stored_id(id, "booking")?)
            .ok_or_else(|| StoreError::Corrupt("zero booking id".to_string()))?,
        provider_id: ProviderId::from_raw(stored_id(provider, "provider")?)
            .ok_or_else(|| StoreError::Corrupt("zero provider id".to_string()))?,
        client_id: ClientId::from_raw(stored_id(client, "client")?)
            .ok_or_else(|| StoreError::Corrupt("zero client id".to_string()))?,
        date: SlotDate::parse(&date).map_err(|err| StoreError::Corrupt(err.to_string()))?,
        time: SlotTime::parse(&time).map_err(|err| StoreError::Corrupt(err.to_string()))?,
        attempt_id: AttemptId::from_raw(stored_id(attempt, "attempt")?)
            .ok_or_else(|| StoreError::Corrupt("zero attempt id".to_string()))?,
        status: booking_status(&status)?,
        created_at: Timestamp::from_unix_millis(created_at),
    })
}

/// Column list matching [`row_booking`].
const BOOKING_COLUMNS: &str =
    "id, provider_id, client_id, slot_date, slot_time, attempt_id, status, created_at";

/// Maps an outbox task row.
fn row_outbox(row: &Row<'_>) -> Result<OutboxTask, StoreError> {
    let id: i64 = row.get(0).map_err(|err| db_err(&err))?;
    let booking: i64 = row.get(1).map_err(|err| db_err(&err))?;
    let kind: String = row.get(2).map_err(|err| db_err(&err))?;
    let status: String = row.get(3).map_err(|err| db_err(&err))?;
    let attempts: i64 = row.get(4).map_err(|err| db_err(&err))?;
    let last_error: Option<String> = row.get(5).map_err(|err| db_err(&err))?;
    let created_at: i64 = row.get(6).map_err(|err| db_err(&err))?;
    let sent_at: Option<i64> = row.get(7).map_err(|err| db_err(&err))?;
    Ok(OutboxTask {
        id: stored_id(id, "outbox task")?,
        booking_id: BookingId::from_raw(stored_id(booking, "booking")?)
            .ok_or_else(|| StoreError::Corrupt("zero booking id".to_string()))?,
        kind: notification_kind(&kind)?,
        status: outbox_status(&status)?,
        attempts: u32::try_from(attempts)
            .map_err(|_| StoreError::Corrupt(format!("invalid attempt count: {attempts}")))?,
        last_error,
        created_at: Timestamp::from_unix_millis(created_at),
        sent_at: sent_at.map(Timestamp::from_unix_millis),
    })
}

/// Column list matching [`row_outbox`].
const OUTBOX_COLUMNS: &str =
    "id, booking_id, kind, status, attempts, last_error, created_at, sent_at";

// ============================================================================
// SECTION: Reservation Store
// ============================================================================

impl ReservationStore for SqliteBookingStore {
    fn claim_slot(&self, new: &NewReservation, now: Timestamp) -> Result<SlotClaim, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_err(&err))?;
        // Availability check and insert are one atomic step inside the
        // immediate transaction. "Active" is the dual check: a blocking
        // status, and (pre-payment only) an unexpired hold.
        let holder = tx
            .query_row(
                &format!(
                    "SELECT {RESERVATION_COLUMNS} FROM reservations
                     WHERE provider_id = ?1 AND slot_date = ?2 AND slot_time = ?3
                       AND (
                           status IN ('payment_confirmed', 'booked')
                           OR (status IN ('held', 'payment_pending') AND expires_at > ?4)
                       )
                     LIMIT 1"
                ),
                params![
                    i64::try_from(new.provider_id.get())
                        .map_err(|_| StoreError::Invalid("provider id out of range".to_string()))?,
                    new.date.as_str(),
                    new.time.as_str(),
                    now.as_unix_millis(),
                ],
                |row| Ok(row_reservation(row)),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .transpose()?;
        if let Some(holder) = holder {
            return Ok(SlotClaim::ActiveHolder(holder));
        }
        tx.execute(
            "INSERT INTO reservations (
                provider_id, client_id, slot_date, slot_time, order_id,
                status, expires_at, payment_id, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, 'held', ?6, NULL, ?7, ?7)",
            params![
                i64::try_from(new.provider_id.get())
                    .map_err(|_| StoreError::Invalid("provider id out of range".to_string()))?,
                i64::try_from(new.client_id.get())
                    .map_err(|_| StoreError::Invalid("client id out of range".to_string()))?,
                new.date.as_str(),
                new.time.as_str(),
                new.order_id.as_str(),
                new.expires_at.as_unix_millis(),
                new.created_at.as_unix_millis(),
            ],
        )
        .map_err(|err| db_err(&err))?;
        let inserted = tx
            .query_row(
                &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = ?1"),
                params![new.order_id.as_str()],
                |row| Ok(row_reservation(row)),
            )
            .map_err(|err| db_err(&err))??;
        tx.commit().map_err(|err| db_err(&err))?;
        drop(guard);
        Ok(SlotClaim::Inserted(inserted))
    }

    fn find_by_order(&self, order_id: &OrderId) -> Result<Option<Reservation>, StoreError> {
        let guard = self.lock()?;
        guard
            .query_row(
                &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = ?1"),
                params![order_id.as_str()],
                |row| Ok(row_reservation(row)),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .transpose()
    }

    fn transition(
        &self,
        order_id: &OrderId,
        allowed_from: &[ReservationStatus],
        to: ReservationStatus,
        payment_id: Option<&GatewayPaymentId>,
        now: Timestamp,
    ) -> Result<Transition, StoreError> {
        if allowed_from.is_empty() {
            return match ReservationStore::find_by_order(self, order_id)? {
                Some(current) => Ok(Transition::Unchanged(current)),
                None => Ok(Transition::Missing),
            };
        }
        let placeholders: Vec<String> =
            (0..allowed_from.len()).map(|idx| format!("?{}", idx + 4)).collect();
        let sql = format!(
            "UPDATE reservations
             SET status = ?1, updated_at = ?2,
                 payment_id = COALESCE(payment_id, ?3)
             WHERE order_id = ?{order_param} AND status IN ({placeholders})",
            order_param = allowed_from.len() + 4,
            placeholders = placeholders.join(", "),
        );
        let changed = {
            let guard = self.lock()?;
            let mut stmt = guard.prepare_cached(&sql).map_err(|err| db_err(&err))?;
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
                Box::new(to.as_str()),
                Box::new(now.as_unix_millis()),
                Box::new(payment_id.map(|id| id.as_str().to_string())),
            ];
            for status in allowed_from {
                values.push(Box::new(status.as_str()));
            }
            values.push(Box::new(order_id.as_str().to_string()));
            let refs: Vec<&dyn rusqlite::ToSql> =
                values.iter().map(std::convert::AsRef::as_ref).collect();
            stmt.execute(refs.as_slice()).map_err(|err| db_err(&err))?
        };
        match ReservationStore::find_by_order(self, order_id)? {
            None => Ok(Transition::Missing),
            Some(current) if changed > 0 => Ok(Transition::Applied(current)),
            Some(current) => Ok(Transition::Unchanged(current)),
        }
    }

    fn confirmed_without_booking(
        &self,
        window_start: Timestamp,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        let guard = self.lock()?;
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations r
             WHERE r.status = 'payment_confirmed'
               AND r.updated_at >= ?1
               AND NOT EXISTS (
                   SELECT 1 FROM payment_attempts a
                   JOIN bookings b ON b.attempt_id = a.id
                   WHERE a.order_id = r.order_id
               )
             ORDER BY r.id
             LIMIT ?2"
        );
        let mut stmt = guard.prepare_cached(&sql).map_err(|err| db_err(&err))?;
        let rows = stmt
            .query_map(
                params![
                    window_start.as_unix_millis(),
                    i64::try_from(limit)
                        .map_err(|_| StoreError::Invalid("limit out of range".to_string()))?
                ],
                |row| Ok(row_reservation(row)),
            )
            .map_err(|err| db_err(&err))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|err| db_err(&err))??);
        }
        Ok(out)
    }

    fn expired_holds(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        let guard = self.lock()?;
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations
             WHERE status IN ('held', 'payment_pending') AND expires_at <= ?1
             ORDER BY id
             LIMIT ?2"
        );
        let mut stmt = guard.prepare_cached(&sql).map_err(|err| db_err(&err))?;
        let rows = stmt
            .query_map(
                params![
                    now.as_unix_millis(),
                    i64::try_from(limit)
                        .map_err(|_| StoreError::Invalid("limit out of range".to_string()))?
                ],
                |row| Ok(row_reservation(row)),
            )
            .map_err(|err| db_err(&err))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|err| db_err(&err))??);
        }
        Ok(out)
    }

    fn readiness(&self) -> Result<(), StoreError> {
        let guard = self.lock()?;
        let probe: i64 = guard
            .query_row("SELECT 1", [], |row| row.get(0))
            .map_err(|err| db_err(&err))?;
        if probe == 1 {
            Ok(())
        } else {
            Err(StoreError::Store("readiness probe returned unexpected value".to_string()))
        }
    }
}

// ============================================================================
// SECTION: Payment Ledger
// ============================================================================

impl PaymentLedger for SqliteBookingStore {
    fn create_pending(&self, new: &NewPaymentAttempt) -> Result<PaymentAttempt, StoreError> {
        let guard = self.lock()?;
        let result = guard.execute(
            "INSERT INTO payment_attempts (
                order_id, gateway_payment_id, reservation_id, amount_minor, currency,
                status, booking_id, manual_review, provider_id, client_id,
                slot_date, slot_time, created_at, completed_at
             ) VALUES (?1, NULL, ?2, ?3, ?4, 'pending', NULL, NULL, ?5, ?6, ?7, ?8, ?9, NULL)",
            params![
                new.order_id.as_str(),
                new.reservation_id
                    .map(|id| i64::try_from(id.get()))
                    .transpose()
                    .map_err(|_| StoreError::Invalid("reservation id out of range".to_string()))?,
                new.amount.minor_units,
                new.amount.currency.as_str(),
                i64::try_from(new.provider_id.get())
                    .map_err(|_| StoreError::Invalid("provider id out of range".to_string()))?,
                i64::try_from(new.client_id.get())
                    .map_err(|_| StoreError::Invalid("client id out of range".to_string()))?,
                new.date.as_str(),
                new.time.as_str(),
                new.created_at.as_unix_millis(),
            ],
        );
        match result {
            Ok(_) => {}
            // A replayed claim re-creates the same order; return the
            // existing row below.
            Err(err) if is_constraint_violation(&err) => {}
            Err(err) => return Err(db_err(&err)),
        }
        guard
            .query_row(
                &format!("SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE order_id = ?1"),
                params![new.order_id.as_str()],
                |row| Ok(row_attempt(row)),
            )
            .map_err(|err| db_err(&err))?
    }

    fn find_by_order(&self, order_id: &OrderId) -> Result<Option<PaymentAttempt>, StoreError> {
        let guard = self.lock()?;
        guard
            .query_row(
                &format!("SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE order_id = ?1"),
                params![order_id.as_str()],
                |row| Ok(row_attempt(row)),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .transpose()
    }

    fn find_by_gateway_payment(
        &self,
        payment_id: &GatewayPaymentId,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        let guard = self.lock()?;
        guard
            .query_row(
                &format!(
                    "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE gateway_payment_id = ?1"
                ),
                params![payment_id.as_str()],
                |row| Ok(row_attempt(row)),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .transpose()
    }

    fn record_gateway_payment(
        &self,
        order_id: &OrderId,
        payment_id: &GatewayPaymentId,
    ) -> Result<RecordPayment, StoreError> {
        {
            let guard = self.lock()?;
            let result = guard.execute(
                "UPDATE payment_attempts SET gateway_payment_id = ?1
                 WHERE order_id = ?2 AND gateway_payment_id IS NULL",
                params![payment_id.as_str(), order_id.as_str()],
            );
            match result {
                Ok(_) => {}
                Err(err) if is_constraint_violation(&err) => {
                    // The identifier is already recorded on another order.
                    return Err(StoreError::Store(format!(
                        "gateway payment {payment_id} already recorded for another order"
                    )));
                }
                Err(err) => return Err(db_err(&err)),
            }
        }
        match PaymentLedger::find_by_order(self, order_id)? {
            None => Ok(RecordPayment::Missing),
            Some(attempt) if attempt.gateway_payment_id.as_ref() == Some(payment_id) => {
                Ok(RecordPayment::Recorded(attempt))
            }
            Some(attempt) => Ok(RecordPayment::DifferentPayment(attempt)),
        }
    }

    fn mark_success(
        &self,
        order_id: &OrderId,
        completed_at: Timestamp,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        {
            let guard = self.lock()?;
            guard
                .execute(
                    "UPDATE payment_attempts SET status = 'success', completed_at = ?1
                     WHERE order_id = ?2 AND status = 'pending'",
                    params![completed_at.as_unix_millis(), order_id.as_str()],
                )
                .map_err(|err| db_err(&err))?;
        }
        PaymentLedger::find_by_order(self, order_id)
    }

    fn mark_failed(
        &self,
        order_id: &OrderId,
        completed_at: Timestamp,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        {
            let guard = self.lock()?;
            guard
                .execute(
                    "UPDATE payment_attempts SET status = 'failed', completed_at = ?1
                     WHERE order_id = ?2 AND status = 'pending'",
                    params![completed_at.as_unix_millis(), order_id.as_str()],
                )
                .map_err(|err| db_err(&err))?;
        }
        PaymentLedger::find_by_order(self, order_id)
    }

    fn link_booking(
        &self,
        attempt_id: AttemptId,
        booking_id: BookingId,
    ) -> Result<(), StoreError> {
        let guard = self.lock()?;
        guard
            .execute(
                "UPDATE payment_attempts SET booking_id = ?1
                 WHERE id = ?2 AND booking_id IS NULL",
                params![
                    i64::try_from(booking_id.get())
                        .map_err(|_| StoreError::Invalid("booking id out of range".to_string()))?,
                    i64::try_from(attempt_id.get())
                        .map_err(|_| StoreError::Invalid("attempt id out of range".to_string()))?,
                ],
            )
            .map_err(|err| db_err(&err))?;
        Ok(())
    }

    fn flag_manual_review(&self, attempt_id: AttemptId, reason: &str) -> Result<(), StoreError> {
        let guard = self.lock()?;
        guard
            .execute(
                "UPDATE payment_attempts SET manual_review = ?1
                 WHERE id = ?2 AND manual_review IS NULL",
                params![
                    reason,
                    i64::try_from(attempt_id.get())
                        .map_err(|_| StoreError::Invalid("attempt id out of range".to_string()))?,
                ],
            )
            .map_err(|err| db_err(&err))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Booking Store
// ============================================================================

impl BookingStore for SqliteBookingStore {
    fn insert_unique(&self, new: &NewBooking) -> Result<BookingInsert, StoreError> {
        let inserted = {
            let guard = self.lock()?;
            guard.execute(
                "INSERT INTO bookings (
                    provider_id, client_id, slot_date, slot_time,
                    attempt_id, status, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, 'confirmed', ?6)",
                params![
                    i64::try_from(new.provider_id.get())
                        .map_err(|_| StoreError::Invalid("provider id out of range".to_string()))?,
                    i64::try_from(new.client_id.get())
                        .map_err(|_| StoreError::Invalid("client id out of range".to_string()))?,
                    new.date.as_str(),
                    new.time.as_str(),
                    i64::try_from(new.attempt_id.get())
                        .map_err(|_| StoreError::Invalid("attempt id out of range".to_string()))?,
                    new.created_at.as_unix_millis(),
                ],
            )
        };
        match inserted {
            Ok(_) => {
                let booking = self.find_by_attempt(new.attempt_id)?.ok_or_else(|| {
                    StoreError::Corrupt("booking vanished after insert".to_string())
                })?;
                Ok(BookingInsert::Created(booking))
            }
            Err(err) if is_constraint_violation(&err) => {
                // Either the active-slot index or the attempt uniqueness
                // fired; re-read to find the owner.
                if let Some(existing) =
                    self.active_for_slot(new.provider_id, &new.date, &new.time)?
                {
                    return Ok(BookingInsert::SlotTaken(existing));
                }
                if let Some(own) = self.find_by_attempt(new.attempt_id)? {
                    return Ok(BookingInsert::SlotTaken(own));
                }
                Err(StoreError::Corrupt(
                    "booking constraint violation without a conflicting row".to_string(),
                ))
            }
            Err(err) => Err(db_err(&err)),
        }
    }

    fn find_by_id(&self, booking_id: BookingId) -> Result<Option<Booking>, StoreError> {
        let guard = self.lock()?;
        guard
            .query_row(
                &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
                params![i64::try_from(booking_id.get())
                    .map_err(|_| StoreError::Invalid("booking id out of range".to_string()))?],
                |row| Ok(row_booking(row)),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .transpose()
    }

    fn find_by_attempt(&self, attempt_id: AttemptId) -> Result<Option<Booking>, StoreError> {
        let guard = self.lock()?;
        guard
            .query_row(
                &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE attempt_id = ?1"),
                params![i64::try_from(attempt_id.get())
                    .map_err(|_| StoreError::Invalid("attempt id out of range".to_string()))?],
                |row| Ok(row_booking(row)),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .transpose()
    }

    fn active_for_slot(
        &self,
        provider_id: ProviderId,
        date: &SlotDate,
        time: &SlotTime,
    ) -> Result<Option<Booking>, StoreError> {
        let guard = self.lock()?;
        guard
            .query_row(
                &format!(
                    "SELECT {BOOKING_COLUMNS} FROM bookings
                     WHERE provider_id = ?1 AND slot_date = ?2 AND slot_time = ?3
                       AND status = 'confirmed'"
                ),
                params![
                    i64::try_from(provider_id.get())
                        .map_err(|_| StoreError::Invalid("provider id out of range".to_string()))?,
                    date.as_str(),
                    time.as_str(),
                ],
                |row| Ok(row_booking(row)),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .transpose()
    }
}

// ============================================================================
// SECTION: Outbox Store
// ============================================================================

impl OutboxStore for SqliteBookingStore {
    fn enqueue(
        &self,
        booking_id: BookingId,
        kind: NotificationKind,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO outbox_tasks (
                    booking_id, kind, status, attempts, last_error, created_at, sent_at
                 ) VALUES (?1, ?2, 'pending', 0, NULL, ?3, NULL)
                 ON CONFLICT (booking_id, kind) DO NOTHING",
                params![
                    i64::try_from(booking_id.get())
                        .map_err(|_| StoreError::Invalid("booking id out of range".to_string()))?,
                    kind.as_str(),
                    now.as_unix_millis(),
                ],
            )
            .map_err(|err| db_err(&err))?;
        Ok(())
    }

    fn due(&self, limit: usize) -> Result<Vec<OutboxTask>, StoreError> {
        let guard = self.lock()?;
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_tasks
             WHERE status = 'pending'
             ORDER BY id
             LIMIT ?1"
        );
        let mut stmt = guard.prepare_cached(&sql).map_err(|err| db_err(&err))?;
        let rows = stmt
            .query_map(
                params![i64::try_from(limit)
                    .map_err(|_| StoreError::Invalid("limit out of range".to_string()))?],
                |row| Ok(row_outbox(row)),
            )
            .map_err(|err| db_err(&err))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|err| db_err(&err))??);
        }
        Ok(out)
    }

    fn mark_sent(&self, task_id: u64, now: Timestamp) -> Result<(), StoreError> {
        let guard = self.lock()?;
        guard
            .execute(
                "UPDATE outbox_tasks SET status = 'sent', sent_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![
                    now.as_unix_millis(),
                    i64::try_from(task_id)
                        .map_err(|_| StoreError::Invalid("task id out of range".to_string()))?,
                ],
            )
            .map_err(|err| db_err(&err))?;
        Ok(())
    }

    fn mark_failed(
        &self,
        task_id: u64,
        error: &str,
        max_attempts: u32,
        _now: Timestamp,
    ) -> Result<(), StoreError> {
        let guard = self.lock()?;
        guard
            .execute(
                "UPDATE outbox_tasks
                 SET attempts = attempts + 1,
                     last_error = ?1,
                     status = CASE WHEN attempts + 1 >= ?2 THEN 'dead' ELSE 'pending' END
                 WHERE id = ?3 AND status = 'pending'",
                params![
                    error,
                    i64::from(max_attempts),
                    i64::try_from(task_id)
                        .map_err(|_| StoreError::Invalid("task id out of range".to_string()))?,
                ],
            )
            .map_err(|err| db_err(&err))?;
        Ok(())
    }
}
