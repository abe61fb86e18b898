// crates/slotbook-cli/src/main.rs
// ============================================================================
// Module: Slotbook CLI Entry Point
// Description: Command dispatcher for server and reconciliation workflows.
// Purpose: Provide an operator surface for serving, sweeping, and config checks.
// Dependencies: clap, slotbook-config, slotbook-core, slotbook-server, tokio
// ============================================================================

//! ## Overview
//! The Slotbook CLI runs the HTTP server (`serve`), executes one
//! reconciliation tick for cron-style deployments (`sweep`), and validates
//! configuration without side effects (`check-config`). All inputs are
//! untrusted and validated fail-closed; secrets are resolved from the
//! environment variables the config names.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use slotbook_config::SlotbookConfig;
use slotbook_core::ReconciliationSweep;
use slotbook_core::SweepConfig;
use slotbook_server::BookingServer;
use slotbook_server::build_stores;
use slotbook_server::wall_clock;

// ============================================================================
// SECTION: CLI Definition
// ============================================================================

/// Slotbook booking engine operator CLI.
#[derive(Parser, Debug)]
#[command(name = "slotbook", version, about = "Slot booking and payment reconciliation engine")]
struct Cli {
    /// Path to the configuration file (falls back to SLOTBOOK_CONFIG, then
    /// ./slotbook.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Command to run.
    #[command(subcommand)]
    command: Command,
}

/// CLI commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server with background sweep and outbox tasks.
    Serve,
    /// Run one reconciliation tick and print the report.
    Sweep,
    /// Load and validate the configuration, then exit.
    CheckConfig,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match SlotbookConfig::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(err) => return fail(&format!("configuration error: {err}")),
    };
    match cli.command {
        Command::Serve => run_serve(config),
        Command::Sweep => run_sweep(&config),
        Command::CheckConfig => {
            emit("configuration ok");
            ExitCode::SUCCESS
        }
    }
}

/// Runs the HTTP server until failure.
fn run_serve(config: SlotbookConfig) -> ExitCode {
    let server = match BookingServer::from_config(config) {
        Ok(server) => server,
        Err(err) => return fail(&format!("startup error: {err}")),
    };
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => return fail(&format!("runtime error: {err}")),
    };
    match runtime.block_on(server.serve()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => fail(&format!("server error: {err}")),
    }
}

/// Runs one reconciliation tick against the configured store.
fn run_sweep(config: &SlotbookConfig) -> ExitCode {
    let stores = match build_stores(config) {
        Ok(stores) => stores,
        Err(err) => return fail(&format!("store error: {err}")),
    };
    let window_ms = i64::try_from(config.sweep.window_hours)
        .unwrap_or(i64::MAX)
        .saturating_mul(60 * 60 * 1_000);
    let sweep = ReconciliationSweep::new(
        stores,
        SweepConfig {
            window_ms,
            batch_limit: config.sweep.batch_limit,
        },
    );
    match sweep.run_once(wall_clock()) {
        Ok(report) => match serde_json::to_string(&report) {
            Ok(line) => {
                emit(&line);
                ExitCode::SUCCESS
            }
            Err(err) => fail(&format!("report serialization error: {err}")),
        },
        Err(err) => fail(&format!("sweep error: {err}")),
    }
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes one line to stdout.
fn emit(line: &str) {
    let _ = writeln!(std::io::stdout(), "{line}");
}

/// Writes an error line to stderr and returns a failure code.
fn fail(message: &str) -> ExitCode {
    let _ = writeln!(std::io::stderr(), "{message}");
    ExitCode::FAILURE
}
