// crates/slotbook-config/tests/config_validation.rs
// ============================================================================
// Module: Config Validation Tests
// Description: Validate fail-closed configuration parsing.
// Purpose: Ensure bad bounds and unknown fields are rejected.
// Dependencies: slotbook-config, tempfile
// ============================================================================

//! ## Overview
//! Conformance tests for configuration loading: defaults, bound violations,
//! unknown-field rejection, and the file size cap.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::fs;
use std::path::PathBuf;

use slotbook_config::ConfigError;
use slotbook_config::SlotbookConfig;
use slotbook_config::StoreType;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Writes a config file and loads it.
fn load(temp: &TempDir, contents: &str) -> Result<SlotbookConfig, ConfigError> {
    let path: PathBuf = temp.path().join("slotbook.toml");
    fs::write(&path, contents).unwrap();
    SlotbookConfig::load(Some(&path))
}

/// Minimal valid config body.
const MINIMAL: &str = r#"
[server]
bind = "127.0.0.1:8701"

[store]
type = "memory"
"#;

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn minimal_config_loads_with_defaults() {
    let temp = TempDir::new().unwrap();
    let config = load(&temp, MINIMAL).unwrap();
    assert_eq!(config.store.store_type, StoreType::Memory);
    assert_eq!(config.sweep.interval_secs, 300);
    assert_eq!(config.hold.ttl_secs, 300);
    assert_eq!(config.outbox.max_attempts, 8);
    assert_eq!(config.gateway.webhook_secret_env, "SLOTBOOK_WEBHOOK_SECRET");
}

#[test]
fn invalid_bind_address_is_rejected() {
    let temp = TempDir::new().unwrap();
    let err = load(
        &temp,
        r#"
[server]
bind = "not-an-address"

[store]
type = "memory"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn unknown_fields_are_rejected() {
    let temp = TempDir::new().unwrap();
    let err = load(
        &temp,
        r#"
[server]
bind = "127.0.0.1:8701"
surprise = true

[store]
type = "memory"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn sqlite_backend_requires_path() {
    let temp = TempDir::new().unwrap();
    let err = load(
        &temp,
        r#"
[server]
bind = "127.0.0.1:8701"

[store]
type = "sqlite"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn seconds_scale_sweep_interval_is_rejected() {
    let temp = TempDir::new().unwrap();
    let err = load(
        &temp,
        r#"
[server]
bind = "127.0.0.1:8701"

[store]
type = "memory"

[sweep]
interval_secs = 5
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn zero_outbox_attempts_is_rejected() {
    let temp = TempDir::new().unwrap();
    let err = load(
        &temp,
        r#"
[server]
bind = "127.0.0.1:8701"

[store]
type = "memory"

[outbox]
max_attempts = 0
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn oversized_config_file_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut contents = String::from(MINIMAL);
    contents.push('#');
    contents.push_str(&"x".repeat(300 * 1024));
    let err = load(&temp, &contents).unwrap_err();
    assert!(matches!(err, ConfigError::TooLarge { .. }));
}

#[test]
fn missing_file_is_an_io_error() {
    let err = SlotbookConfig::load(Some(&PathBuf::from("/nonexistent/slotbook.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
