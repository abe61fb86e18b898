// crates/slotbook-server/src/server.rs
// ============================================================================
// Module: Booking Server
// Description: Axum HTTP surface for webhooks, claims, and health probes.
// Purpose: Map engine outcomes onto the gateway retry contract.
// Dependencies: slotbook-core, slotbook-config, slotbook-store-sqlite, axum, tokio
// ============================================================================

//! ## Overview
//! The booking server exposes three endpoints: `POST /webhooks/payment`
//! (gateway deliveries), `POST /claims` (booking initiation, internal
//! surface behind an optional bearer token), and `GET /healthz`. Status
//! codes encode the retry contract: 200 tells the gateway to stop retrying
//! (including idempotent replays and recorded conflicts), 4xx marks a
//! delivery that will never succeed, and 503 requests a retry. All inputs
//! are untrusted and validated fail-closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde_json::json;
use slotbook_config::SlotbookConfig;
use slotbook_config::StoreType;
use slotbook_core::ClaimError;
use slotbook_core::ClaimOutcome;
use slotbook_core::ClaimRequest;
use slotbook_core::ClientId;
use slotbook_core::Currency;
use slotbook_core::InMemoryBookingStore;
use slotbook_core::Money;
use slotbook_core::NotificationKind;
use slotbook_core::OrderId;
use slotbook_core::ProviderId;
use slotbook_core::ReconciliationSweep;
use slotbook_core::ReservationManager;
use slotbook_core::SharedStores;
use slotbook_core::SlotDate;
use slotbook_core::SlotTime;
use slotbook_core::SweepConfig;
use slotbook_core::WebhookError;
use slotbook_core::WebhookOutcome;
use slotbook_core::WebhookProcessor;
use slotbook_outbox::LogSink;
use slotbook_outbox::OutboxPump;
use slotbook_store_sqlite::SqliteBookingStore;
use slotbook_store_sqlite::SqliteStoreConfig;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::audit::AuditSink;
use crate::audit::ClaimAuditEvent;
use crate::audit::SecurityAuditEvent;
use crate::audit::StderrAuditSink;
use crate::audit::WebhookAuditEvent;
use crate::tasks::spawn_outbox_pump;
use crate::tasks::spawn_sweep;
use crate::tasks::wall_clock;
use crate::telemetry::NoopMetrics;
use crate::telemetry::RequestMetricEvent;
use crate::telemetry::RequestSurface;
use crate::telemetry::ServerMetrics;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header carrying the gateway's HMAC signature.
const SIGNATURE_HEADER: &str = "x-gateway-signature";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Booking server errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration failed validation or secret resolution.
    #[error("server config error: {0}")]
    Config(String),
    /// Store or component initialization failed.
    #[error("server init error: {0}")]
    Init(String),
    /// Transport failure (bind or serve).
    #[error("server transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Server State
// ============================================================================

/// Shared request-handling state.
struct ServerState {
    /// Idempotent webhook processor.
    processor: WebhookProcessor,
    /// Reservation manager for the claim surface.
    manager: ReservationManager,
    /// Shared store handles (health probes).
    stores: SharedStores,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Metrics sink.
    metrics: Arc<dyn ServerMetrics>,
    /// Optional bearer token guarding the claim surface.
    claim_token: Option<String>,
}

/// Booking server instance.
pub struct BookingServer {
    /// Validated configuration.
    config: SlotbookConfig,
    /// Shared store handles.
    stores: SharedStores,
    /// Shared request state.
    state: Arc<ServerState>,
}

impl BookingServer {
    /// Builds a server from configuration, resolving secrets and opening
    /// the store.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when validation, secret resolution, or store
    /// initialization fails.
    pub fn from_config(config: SlotbookConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let secret = config.webhook_secret().map_err(|err| ServerError::Config(err.to_string()))?;
        let claim_token =
            config.claim_auth_token().map_err(|err| ServerError::Config(err.to_string()))?;
        let stores = build_stores(&config)?;
        let hold_ttl_ms = i64::try_from(config.hold.ttl_secs)
            .map_err(|_| ServerError::Config("hold.ttl_secs out of range".to_string()))?
            .saturating_mul(1_000);
        let manager = ReservationManager::new(stores.clone()).with_hold_ttl_ms(hold_ttl_ms);
        let processor = WebhookProcessor::new(stores.clone(), secret);
        let state = Arc::new(ServerState {
            processor,
            manager,
            stores: stores.clone(),
            audit: Arc::new(StderrAuditSink),
            metrics: Arc::new(NoopMetrics),
            claim_token,
        });
        Ok(Self {
            config,
            stores,
            state,
        })
    }

    /// Returns the router for the HTTP surface (used directly in tests).
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/webhooks/payment", post(handle_webhook))
            .route("/claims", post(handle_claim))
            .route("/healthz", get(handle_health))
            .layer(DefaultBodyLimit::max(self.config.server.max_body_bytes))
            .with_state(Arc::clone(&self.state))
    }

    /// Serves requests and runs the background tasks until failure.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when binding or serving fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        let addr: SocketAddr = self
            .config
            .server
            .bind
            .parse()
            .map_err(|_| ServerError::Config("invalid bind address".to_string()))?;
        let sweep = ReconciliationSweep::new(
            self.stores.clone(),
            SweepConfig {
                window_ms: i64::try_from(self.config.sweep.window_hours)
                    .unwrap_or(i64::MAX)
                    .saturating_mul(60 * 60 * 1_000),
                batch_limit: self.config.sweep.batch_limit,
            },
        );
        let sweep_handle = spawn_sweep(
            sweep,
            Duration::from_secs(self.config.sweep.interval_secs),
            Arc::clone(&self.state.audit),
        );
        let pump = build_pump(&self.stores, &self.config);
        let pump_handle = spawn_outbox_pump(
            pump,
            Duration::from_secs(self.config.outbox.poll_interval_secs),
        );

        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|err| ServerError::Transport(format!("bind failed: {err}")))?;
        let result = axum::serve(listener, app)
            .await
            .map_err(|err| ServerError::Transport(format!("serve failed: {err}")));
        sweep_handle.abort();
        pump_handle.abort();
        result
    }
}

/// Builds the configured store backend.
///
/// # Errors
///
/// Returns [`ServerError`] when the sqlite path is missing or the database
/// cannot be opened.
pub fn build_stores(config: &SlotbookConfig) -> Result<SharedStores, ServerError> {
    match config.store.store_type {
        StoreType::Memory => Ok(SharedStores::from_store(InMemoryBookingStore::new())),
        StoreType::Sqlite => {
            let path = config
                .store
                .path
                .clone()
                .ok_or_else(|| ServerError::Config("sqlite store requires path".to_string()))?;
            let store = SqliteBookingStore::new(&SqliteStoreConfig {
                path,
                busy_timeout_ms: config.store.busy_timeout_ms,
                journal_mode: config.store.journal_mode,
                sync_mode: config.store.sync_mode,
            })
            .map_err(|err| ServerError::Init(err.to_string()))?;
            Ok(SharedStores::from_store(store))
        }
    }
}

/// Builds the outbox pump with log-only delivery for every kind. Real
/// deployments swap sinks per kind (mailer, WhatsApp sender, calendar).
fn build_pump(stores: &SharedStores, config: &SlotbookConfig) -> OutboxPump {
    let sink = Arc::new(LogSink::new(std::io::stderr()));
    let mut pump = OutboxPump::new(stores.clone(), config.outbox.max_attempts, 256);
    for kind in NotificationKind::ALL {
        pump = pump.with_sink(kind, sink.clone());
    }
    pump
}

// ============================================================================
// SECTION: Webhook Handler
// ============================================================================

/// Handles one gateway webhook delivery.
async fn handle_webhook(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let response = process_webhook(&state, &headers, &body);
    record_metrics(&state, RequestSurface::Webhook, &response, body.len(), started);
    response
}

/// Processes one gateway webhook delivery into a response.
fn process_webhook(state: &ServerState, headers: &HeaderMap, body: &Bytes) -> Response {
    let now = wall_clock();
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok())
    else {
        state.audit.record_security(&SecurityAuditEvent {
            event: "webhook_signature_missing",
            timestamp_ms: now.as_unix_millis(),
            surface: "webhook",
            reason: "missing_header",
        });
        return (StatusCode::UNAUTHORIZED, axum::Json(json!({"error": "missing signature"})))
            .into_response();
    };
    match state.processor.handle_event(body, signature, now) {
        Ok(outcome) => {
            let (status, payload, label, legacy, detail) = webhook_success(&outcome);
            state.audit.record_webhook(&WebhookAuditEvent {
                event: "webhook_processed",
                timestamp_ms: now.as_unix_millis(),
                order_id: webhook_order(&outcome),
                outcome: label,
                status: status.as_u16(),
                legacy_fallback: legacy,
                detail,
            });
            (status, axum::Json(payload)).into_response()
        }
        Err(err) => {
            let status = webhook_error_status(&err);
            if matches!(err, WebhookError::InvalidSignature(_)) {
                state.audit.record_security(&SecurityAuditEvent {
                    event: "webhook_signature_rejected",
                    timestamp_ms: now.as_unix_millis(),
                    surface: "webhook",
                    reason: "signature_mismatch",
                });
            } else {
                state.audit.record_webhook(&WebhookAuditEvent {
                    event: "webhook_rejected",
                    timestamp_ms: now.as_unix_millis(),
                    order_id: None,
                    outcome: "error",
                    status: status.as_u16(),
                    legacy_fallback: false,
                    detail: Some(err.to_string()),
                });
            }
            (status, axum::Json(json!({"error": err.to_string()}))).into_response()
        }
    }
}

/// Maps a processing outcome to status, body, and audit labels.
fn webhook_success(
    outcome: &WebhookOutcome,
) -> (StatusCode, serde_json::Value, &'static str, bool, Option<String>) {
    match outcome {
        WebhookOutcome::Booked {
            booking_id,
            newly_created,
            legacy_fallback,
        } => (
            StatusCode::OK,
            json!({"status": "booked", "booking_id": booking_id.get(), "newly_created": newly_created}),
            "booked",
            *legacy_fallback,
            None,
        ),
        WebhookOutcome::PaymentRecordedNoBooking {
            reason,
        } => (
            StatusCode::OK,
            json!({"status": "payment_recorded_no_booking", "reason": reason}),
            "payment_recorded_no_booking",
            false,
            Some(reason.clone()),
        ),
        WebhookOutcome::FailureRecorded {
            order_id,
            released,
        } => (
            StatusCode::OK,
            json!({"status": "failure_recorded", "order_id": order_id.as_str(), "released": released}),
            "failure_recorded",
            false,
            None,
        ),
    }
}

/// Extracts the order identifier for audit records when known.
fn webhook_order(outcome: &WebhookOutcome) -> Option<String> {
    match outcome {
        WebhookOutcome::FailureRecorded {
            order_id, ..
        } => Some(order_id.as_str().to_string()),
        WebhookOutcome::Booked {
            ..
        }
        | WebhookOutcome::PaymentRecordedNoBooking {
            ..
        } => None,
    }
}

/// Maps webhook errors onto the gateway retry contract.
fn webhook_error_status(err: &WebhookError) -> StatusCode {
    match err {
        WebhookError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
        WebhookError::Event(_) | WebhookError::UnknownOrder(_) => StatusCode::BAD_REQUEST,
        WebhookError::AmountMismatch {
            ..
        } => StatusCode::UNPROCESSABLE_ENTITY,
        WebhookError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// ============================================================================
// SECTION: Claim Handler
// ============================================================================

/// Claim request body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClaimBody {
    /// Provider whose slot is requested.
    provider_id: u64,
    /// Client requesting the slot.
    client_id: u64,
    /// Slot date (`YYYY-MM-DD`).
    date: String,
    /// Slot time (`HH:MM`).
    time: String,
    /// Merchant order identifier for the payment attempt.
    order_id: String,
    /// Expected amount in minor units.
    amount_minor: i64,
    /// Currency code for the amount.
    currency: String,
}

/// Handles one booking-initiation claim.
async fn handle_claim(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let response = process_claim(&state, &headers, &body);
    record_metrics(&state, RequestSurface::Claim, &response, body.len(), started);
    response
}

/// Processes one booking-initiation claim into a response.
fn process_claim(state: &ServerState, headers: &HeaderMap, body: &Bytes) -> Response {
    let now = wall_clock();
    if let Some(expected) = &state.claim_token
        && !bearer_matches(headers, expected)
    {
        state.audit.record_security(&SecurityAuditEvent {
            event: "claim_auth_rejected",
            timestamp_ms: now.as_unix_millis(),
            surface: "claim",
            reason: "bearer_mismatch",
        });
        return (StatusCode::UNAUTHORIZED, axum::Json(json!({"error": "unauthorized"})))
            .into_response();
    }
    let parsed: ClaimBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({"error": format!("invalid claim body: {err}")})),
            )
                .into_response();
        }
    };
    let request = match claim_request(&parsed) {
        Ok(request) => request,
        Err(reason) => {
            return (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(json!({"error": reason})))
                .into_response();
        }
    };
    let (status, outcome_label, payload) = match state.manager.claim(&request, now) {
        Ok(ClaimOutcome::Claimed(reservation)) => (
            StatusCode::CREATED,
            "claimed",
            json!({
                "status": "claimed",
                "reservation_id": reservation.id.get(),
                "order_id": reservation.order_id.as_str(),
                "expires_at": reservation.expires_at.as_unix_millis(),
            }),
        ),
        Ok(ClaimOutcome::AlreadyHeld(reservation)) => (
            StatusCode::OK,
            "already_held",
            json!({
                "status": "already_held",
                "reservation_id": reservation.id.get(),
                "order_id": reservation.order_id.as_str(),
                "expires_at": reservation.expires_at.as_unix_millis(),
            }),
        ),
        Err(ClaimError::SlotHeld) => (
            StatusCode::CONFLICT,
            "conflict",
            json!({"status": "conflict", "error": "slot unavailable"}),
        ),
        Err(ClaimError::Store(err)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "store_error",
            json!({"error": err.to_string()}),
        ),
    };
    state.audit.record_claim(&ClaimAuditEvent {
        event: "claim_processed",
        timestamp_ms: now.as_unix_millis(),
        provider_id: request.provider_id.get(),
        order_id: request.order_id.as_str().to_string(),
        outcome: outcome_label,
    });
    (status, axum::Json(payload)).into_response()
}

/// Validates and converts a claim body into an engine request.
fn claim_request(body: &ClaimBody) -> Result<ClaimRequest, String> {
    let provider_id = ProviderId::from_raw(body.provider_id)
        .ok_or_else(|| "provider_id must be non-zero".to_string())?;
    let client_id = ClientId::from_raw(body.client_id)
        .ok_or_else(|| "client_id must be non-zero".to_string())?;
    let date = SlotDate::parse(&body.date).map_err(|err| err.to_string())?;
    let time = SlotTime::parse(&body.time).map_err(|err| err.to_string())?;
    if body.order_id.is_empty() {
        return Err("order_id must not be empty".to_string());
    }
    if body.amount_minor <= 0 {
        return Err("amount_minor must be positive".to_string());
    }
    let currency = Currency::parse(&body.currency).map_err(|err| err.to_string())?;
    Ok(ClaimRequest {
        provider_id,
        client_id,
        date,
        time,
        order_id: OrderId::new(body.order_id.clone()),
        amount: Money::new(body.amount_minor, currency),
    })
}

/// Compares the `Authorization: Bearer` header against the expected token
/// in constant time.
fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    let Some(value) = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()) else {
        return false;
    };
    let Some(token) = value.strip_prefix("Bearer ") else {
        return false;
    };
    token.as_bytes().ct_eq(expected.as_bytes()).into()
}

// ============================================================================
// SECTION: Health Handler
// ============================================================================

/// Reports store readiness.
async fn handle_health(State(state): State<Arc<ServerState>>) -> Response {
    let started = Instant::now();
    let response = match state.stores.reservations().readiness() {
        Ok(()) => (StatusCode::OK, axum::Json(json!({"status": "ok"}))).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(json!({"status": "unavailable", "error": err.to_string()})),
        )
            .into_response(),
    };
    record_metrics(&state, RequestSurface::Health, &response, 0, started);
    response
}

// ============================================================================
// SECTION: Metrics
// ============================================================================

/// Records counter and latency observations for one request.
fn record_metrics(
    state: &ServerState,
    surface: RequestSurface,
    response: &Response,
    request_bytes: usize,
    started: Instant,
) {
    let event = RequestMetricEvent {
        surface,
        status: response.status().as_u16(),
        request_bytes,
    };
    state.metrics.record_request(event);
    state.metrics.record_latency(event, started.elapsed());
}

// ============================================================================
// SECTION: Tests
// ============================================================================
