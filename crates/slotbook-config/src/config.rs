// crates/slotbook-config/src/config.rs
// ============================================================================
// Module: Slotbook Configuration
// Description: Configuration loading and validation for Slotbook.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: slotbook-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and bound
//! limits. Missing or invalid configuration fails closed. Unknown fields
//! are rejected so a typo never silently disables a protection. Secret
//! material (the gateway webhook secret, the claim-surface bearer token)
//! is referenced by environment-variable name only and resolved at
//! startup, never stored in the file.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;
use slotbook_store_sqlite::SqliteStoreMode;
use slotbook_store_sqlite::SqliteSyncMode;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "slotbook.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "SLOTBOOK_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 256 * 1024;
/// Default maximum webhook/claim request body size in bytes.
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;
/// Maximum allowed request body size in bytes.
pub(crate) const MAX_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
/// Default environment variable carrying the webhook secret.
pub(crate) const DEFAULT_SECRET_ENV: &str = "SLOTBOOK_WEBHOOK_SECRET";
/// Minimum sweep interval in seconds (the sweep is minutes-scale by design).
pub(crate) const MIN_SWEEP_INTERVAL_SECS: u64 = 60;
/// Maximum sweep interval in seconds.
pub(crate) const MAX_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;
/// Default sweep interval in seconds.
pub(crate) const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
/// Default sweep repair window in hours.
pub(crate) const DEFAULT_SWEEP_WINDOW_HOURS: u64 = 24;
/// Maximum sweep repair window in hours.
pub(crate) const MAX_SWEEP_WINDOW_HOURS: u64 = 7 * 24;
/// Default sweep batch limit.
pub(crate) const DEFAULT_SWEEP_BATCH_LIMIT: usize = 256;
/// Maximum sweep batch limit.
pub(crate) const MAX_SWEEP_BATCH_LIMIT: usize = 10_000;
/// Default hold time-to-live in seconds.
pub(crate) const DEFAULT_HOLD_TTL_SECS: u64 = 300;
/// Minimum hold time-to-live in seconds.
pub(crate) const MIN_HOLD_TTL_SECS: u64 = 60;
/// Maximum hold time-to-live in seconds.
pub(crate) const MAX_HOLD_TTL_SECS: u64 = 60 * 60;
/// Default outbox poll interval in seconds.
pub(crate) const DEFAULT_OUTBOX_POLL_SECS: u64 = 30;
/// Minimum outbox poll interval in seconds.
pub(crate) const MIN_OUTBOX_POLL_SECS: u64 = 5;
/// Default outbox delivery attempt cap.
pub(crate) const DEFAULT_OUTBOX_MAX_ATTEMPTS: u32 = 8;
/// Maximum outbox delivery attempt cap.
pub(crate) const MAX_OUTBOX_MAX_ATTEMPTS: u32 = 64;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling and never echo secret
///   material.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// Config file exceeds the size limit.
    #[error("config file too large: {actual} bytes (max {max})")]
    TooLarge {
        /// Actual file size in bytes.
        actual: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
    /// Config file failed to parse.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Config failed validation.
    #[error("config invalid: {0}")]
    Invalid(String),
    /// A required secret environment variable is missing or empty.
    #[error("missing secret environment variable: {0}")]
    MissingSecret(String),
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// HTTP server configuration.
///
/// # Invariants
/// - `bind` must parse as a socket address.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address for the HTTP server.
    pub bind: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Environment variable carrying the claim-surface bearer token.
    /// When absent the claim surface accepts unauthenticated callers
    /// (loopback deployments only).
    #[serde(default)]
    pub auth_token_env: Option<String>,
}

/// Returns the default request body limit.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Payment gateway configuration.
///
/// # Invariants
/// - `webhook_secret_env` names a non-empty environment variable.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Environment variable carrying the shared webhook secret.
    #[serde(default = "default_secret_env")]
    pub webhook_secret_env: String,
}

/// Returns the default webhook secret environment variable name.
fn default_secret_env() -> String {
    DEFAULT_SECRET_ENV.to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            webhook_secret_env: default_secret_env(),
        }
    }
}

/// Store backend selection.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// In-memory store (tests and local demos only).
    Memory,
    /// SQLite-backed durable store.
    #[default]
    Sqlite,
}

/// Store configuration.
///
/// # Invariants
/// - `path` is required for the sqlite backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store backend.
    #[serde(default, rename = "type")]
    pub store_type: StoreType,
    /// Path to the SQLite database file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// SQLite journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// SQLite sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout.
const fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Reconciliation sweep configuration.
///
/// # Invariants
/// - `interval_secs` stays within the minutes-scale bounds; the sweep is a
///   repair mechanism, not a hot path.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepSettings {
    /// Tick interval in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Repair window in hours looking back from each tick.
    #[serde(default = "default_sweep_window_hours")]
    pub window_hours: u64,
    /// Maximum reservations per phase per tick.
    #[serde(default = "default_sweep_batch_limit")]
    pub batch_limit: usize,
}

/// Returns the default sweep interval.
const fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

/// Returns the default sweep window.
const fn default_sweep_window_hours() -> u64 {
    DEFAULT_SWEEP_WINDOW_HOURS
}

/// Returns the default sweep batch limit.
const fn default_sweep_batch_limit() -> usize {
    DEFAULT_SWEEP_BATCH_LIMIT
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            window_hours: default_sweep_window_hours(),
            batch_limit: default_sweep_batch_limit(),
        }
    }
}

/// Slot hold configuration.
///
/// # Invariants
/// - `ttl_secs` stays within the configured bounds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HoldConfig {
    /// Hold time-to-live in seconds.
    #[serde(default = "default_hold_ttl_secs")]
    pub ttl_secs: u64,
}

/// Returns the default hold TTL.
const fn default_hold_ttl_secs() -> u64 {
    DEFAULT_HOLD_TTL_SECS
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_hold_ttl_secs(),
        }
    }
}

/// Notification outbox configuration.
///
/// # Invariants
/// - `max_attempts` is at least one.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutboxConfig {
    /// Poll interval in seconds for the outbox pump.
    #[serde(default = "default_outbox_poll_secs")]
    pub poll_interval_secs: u64,
    /// Delivery attempts before a task is dead-lettered.
    #[serde(default = "default_outbox_max_attempts")]
    pub max_attempts: u32,
}

/// Returns the default outbox poll interval.
const fn default_outbox_poll_secs() -> u64 {
    DEFAULT_OUTBOX_POLL_SECS
}

/// Returns the default outbox attempt cap.
const fn default_outbox_max_attempts() -> u32 {
    DEFAULT_OUTBOX_MAX_ATTEMPTS
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_outbox_poll_secs(),
            max_attempts: default_outbox_max_attempts(),
        }
    }
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root Slotbook configuration.
///
/// # Invariants
/// - `validate` must pass before the config is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlotbookConfig {
    /// HTTP server section.
    pub server: ServerConfig,
    /// Payment gateway section.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Store section.
    #[serde(default)]
    pub store: StoreConfig,
    /// Sweep section.
    #[serde(default)]
    pub sweep: SweepSettings,
    /// Hold section.
    #[serde(default)]
    pub hold: HoldConfig,
    /// Outbox section.
    #[serde(default)]
    pub outbox: OutboxConfig,
}

impl SlotbookConfig {
    /// Loads configuration from `path`, or from `SLOTBOOK_CONFIG`, or from
    /// `slotbook.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is missing, oversized,
    /// unparsable, or invalid.
    pub fn load(path: Option<&PathBuf>) -> Result<Self, ConfigError> {
        let resolved = path.cloned().or_else(|| env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));
        let resolved = resolved.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_NAME));
        let bytes = fs::read(&resolved)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", resolved.display())))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge {
                actual: bytes.len(),
                max: MAX_CONFIG_FILE_SIZE,
            });
        }
        let text =
            String::from_utf8(bytes).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let config: Self = toml::from_str(&text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when any bound is violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "server.bind is not a socket address: {}",
                self.server.bind
            )));
        }
        if self.server.max_body_bytes == 0 || self.server.max_body_bytes > MAX_MAX_BODY_BYTES {
            return Err(ConfigError::Invalid(format!(
                "server.max_body_bytes out of range: {} (max {MAX_MAX_BODY_BYTES})",
                self.server.max_body_bytes
            )));
        }
        if let Some(token_env) = &self.server.auth_token_env
            && token_env.is_empty()
        {
            return Err(ConfigError::Invalid(
                "server.auth_token_env must not be empty when set".to_string(),
            ));
        }
        if self.gateway.webhook_secret_env.is_empty() {
            return Err(ConfigError::Invalid(
                "gateway.webhook_secret_env must not be empty".to_string(),
            ));
        }
        if self.store.store_type == StoreType::Sqlite && self.store.path.is_none() {
            return Err(ConfigError::Invalid(
                "store.path is required for the sqlite backend".to_string(),
            ));
        }
        if self.sweep.interval_secs < MIN_SWEEP_INTERVAL_SECS
            || self.sweep.interval_secs > MAX_SWEEP_INTERVAL_SECS
        {
            return Err(ConfigError::Invalid(format!(
                "sweep.interval_secs out of range: {} ({MIN_SWEEP_INTERVAL_SECS}-{MAX_SWEEP_INTERVAL_SECS})",
                self.sweep.interval_secs
            )));
        }
        if self.sweep.window_hours == 0 || self.sweep.window_hours > MAX_SWEEP_WINDOW_HOURS {
            return Err(ConfigError::Invalid(format!(
                "sweep.window_hours out of range: {} (max {MAX_SWEEP_WINDOW_HOURS})",
                self.sweep.window_hours
            )));
        }
        if self.sweep.batch_limit == 0 || self.sweep.batch_limit > MAX_SWEEP_BATCH_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "sweep.batch_limit out of range: {} (max {MAX_SWEEP_BATCH_LIMIT})",
                self.sweep.batch_limit
            )));
        }
        if self.hold.ttl_secs < MIN_HOLD_TTL_SECS || self.hold.ttl_secs > MAX_HOLD_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "hold.ttl_secs out of range: {} ({MIN_HOLD_TTL_SECS}-{MAX_HOLD_TTL_SECS})",
                self.hold.ttl_secs
            )));
        }
        if self.outbox.poll_interval_secs < MIN_OUTBOX_POLL_SECS {
            return Err(ConfigError::Invalid(format!(
                "outbox.poll_interval_secs below minimum: {} (min {MIN_OUTBOX_POLL_SECS})",
                self.outbox.poll_interval_secs
            )));
        }
        if self.outbox.max_attempts == 0 || self.outbox.max_attempts > MAX_OUTBOX_MAX_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "outbox.max_attempts out of range: {} (max {MAX_OUTBOX_MAX_ATTEMPTS})",
                self.outbox.max_attempts
            )));
        }
        Ok(())
    }

    /// Resolves the webhook secret from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] when the variable is unset or
    /// empty.
    pub fn webhook_secret(&self) -> Result<Vec<u8>, ConfigError> {
        let value = env::var(&self.gateway.webhook_secret_env)
            .map_err(|_| ConfigError::MissingSecret(self.gateway.webhook_secret_env.clone()))?;
        if value.is_empty() {
            return Err(ConfigError::MissingSecret(self.gateway.webhook_secret_env.clone()));
        }
        Ok(value.into_bytes())
    }

    /// Resolves the optional claim-surface bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] when a variable is configured
    /// but unset or empty.
    pub fn claim_auth_token(&self) -> Result<Option<String>, ConfigError> {
        let Some(token_env) = &self.server.auth_token_env else {
            return Ok(None);
        };
        let value =
            env::var(token_env).map_err(|_| ConfigError::MissingSecret(token_env.clone()))?;
        if value.is_empty() {
            return Err(ConfigError::MissingSecret(token_env.clone()));
        }
        Ok(Some(value))
    }
}
