// crates/slotbook-core/src/runtime/webhook.rs
// ============================================================================
// Module: Slotbook Webhook Processor
// Description: Idempotent processing of inbound payment gateway events.
// Purpose: Drive the reservation state machine from at-least-once deliveries.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The webhook processor translates an external, at-least-once, possibly
//! out-of-order, signed payment event into state-machine transitions,
//! without ever creating two bookings for one payment or losing a confirmed
//! payment. Every step is individually idempotent: the handler may run
//! twice for the same event with no side effects beyond the first
//! successful run. The primary defense against duplicate delivery is the
//! gateway payment identifier, which is globally unique on the ledger.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::BookingId;
use crate::core::EventParseError;
use crate::core::GatewayEvent;
use crate::core::GatewayPaymentId;
use crate::core::Money;
use crate::core::OrderId;
use crate::core::PaymentAttempt;
use crate::core::PaymentStatus;
use crate::core::Reservation;
use crate::core::ReservationStatus;
use crate::core::SignatureError;
use crate::core::Timestamp;
use crate::core::signature::verify_signature;
use crate::interfaces::RecordPayment;
use crate::interfaces::StoreError;
use crate::runtime::materializer::BookingMaterializer;
use crate::runtime::materializer::Materialized;
use crate::runtime::materializer::MaterializerError;
use crate::runtime::reservations::ReservationManager;
use crate::runtime::store::SharedStores;

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Successful webhook processing outcome.
///
/// # Invariants
/// - Every variant maps to an HTTP 200 at the transport layer: the gateway
///   must stop retrying once any of these is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A booking exists for the payment.
    Booked {
        /// The booking (fresh or re-read on a duplicate delivery).
        booking_id: BookingId,
        /// True when this call created the booking.
        newly_created: bool,
        /// True when the reservation-less legacy path materialized it.
        legacy_fallback: bool,
    },
    /// Payment accepted but the slot was taken in the interim; money is
    /// preserved and the attempt is flagged for manual refund/reassignment.
    PaymentRecordedNoBooking {
        /// Why no booking was created.
        reason: String,
    },
    /// A `payment.failed` event settled the attempt.
    FailureRecorded {
        /// Order whose attempt failed.
        order_id: OrderId,
        /// True when the reservation hold was released by this call.
        released: bool,
    },
}

/// Webhook processing errors.
///
/// # Invariants
/// - Variants are stable so the transport layer can map retryable (store)
///   versus non-retryable (signature, payload, amount) failures.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature header missing, malformed, or mismatched.
    #[error("webhook signature rejected: {0}")]
    InvalidSignature(#[from] SignatureError),
    /// Body failed strict event validation.
    #[error(transparent)]
    Event(#[from] EventParseError),
    /// Captured amount does not match the ledger expectation.
    #[error("amount mismatch for order {order_id}: expected {expected}, got {actual}")]
    AmountMismatch {
        /// Order whose amount mismatched.
        order_id: OrderId,
        /// Amount the ledger expected.
        expected: Money,
        /// Amount the gateway reported.
        actual: Money,
    },
    /// No payment attempt exists for the order (it is created at claim time).
    #[error("unknown order: {0}")]
    UnknownOrder(OrderId),
    /// Store failure; the gateway should retry delivery.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<MaterializerError> for WebhookError {
    fn from(err: MaterializerError) -> Self {
        match err {
            MaterializerError::Store(err) => Self::Store(err),
        }
    }
}

// ============================================================================
// SECTION: Webhook Processor
// ============================================================================

/// Idempotent processor for gateway webhook deliveries.
#[derive(Clone)]
pub struct WebhookProcessor {
    /// Shared store handles.
    stores: SharedStores,
    /// Reservation manager for advance/release.
    reservations: ReservationManager,
    /// Booking materializer.
    materializer: BookingMaterializer,
    /// Shared webhook secret for signature verification.
    secret: Vec<u8>,
}

impl WebhookProcessor {
    /// Creates a processor over the given stores and webhook secret.
    #[must_use]
    pub fn new(stores: SharedStores, secret: Vec<u8>) -> Self {
        Self {
            reservations: ReservationManager::new(stores.clone()),
            materializer: BookingMaterializer::new(stores.clone()),
            stores,
            secret,
        }
    }

    /// Handles one raw webhook delivery.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::InvalidSignature`] before any processing when
    /// the signature does not authenticate, [`WebhookError::Event`] for
    /// payloads that fail strict validation, [`WebhookError::AmountMismatch`]
    /// for money discrepancies, [`WebhookError::UnknownOrder`] when no
    /// attempt exists, and [`WebhookError::Store`] for transient store
    /// failures the gateway should retry.
    pub fn handle_event(
        &self,
        raw_body: &[u8],
        signature_header: &str,
        now: Timestamp,
    ) -> Result<WebhookOutcome, WebhookError> {
        verify_signature(&self.secret, raw_body, signature_header)?;
        match GatewayEvent::parse(raw_body)? {
            GatewayEvent::PaymentCaptured {
                order_id,
                payment_id,
                amount,
            } => self.handle_captured(&order_id, &payment_id, &amount, now),
            GatewayEvent::PaymentFailed {
                order_id, ..
            } => self.handle_failed(&order_id, now),
        }
    }

    /// Processes a `payment.captured` event.
    fn handle_captured(
        &self,
        order_id: &OrderId,
        payment_id: &GatewayPaymentId,
        amount: &Money,
        now: Timestamp,
    ) -> Result<WebhookOutcome, WebhookError> {
        // Idempotency gate: a booking already linked to this gateway payment
        // means a duplicate delivery; answer with the existing booking.
        if let Some(attempt) = self.stores.payments().find_by_gateway_payment(payment_id)?
            && let Some(booking_id) = attempt.booking_id
        {
            return Ok(WebhookOutcome::Booked {
                booking_id,
                newly_created: false,
                legacy_fallback: attempt.reservation_id.is_none(),
            });
        }

        // Record the gateway payment identifier first-seen on the attempt.
        let attempt = match self.stores.payments().record_gateway_payment(order_id, payment_id)? {
            RecordPayment::Recorded(attempt) => attempt,
            RecordPayment::DifferentPayment(attempt) => {
                // A second capture under a new payment id for a settled
                // order: preserve the money trail, never book twice.
                self.stores.payments().flag_manual_review(
                    attempt.id,
                    &format!("second capture {payment_id} for order {order_id}"),
                )?;
                return Ok(WebhookOutcome::PaymentRecordedNoBooking {
                    reason: "order already settled under a different gateway payment".to_string(),
                });
            }
            RecordPayment::Missing => return Err(WebhookError::UnknownOrder(order_id.clone())),
        };

        // Zero-tolerance amount check. A discrepancy is a policy violation
        // that must be surfaced, not silently accepted.
        if !attempt.amount.matches(amount) {
            let _ = self.stores.payments().mark_failed(order_id, now)?;
            return Err(WebhookError::AmountMismatch {
                order_id: order_id.clone(),
                expected: attempt.amount,
                actual: amount.clone(),
            });
        }

        match self.stores.reservations().find_by_order(order_id)? {
            None => {
                // Legacy data: no reservation was ever created for this
                // order. Degraded mode — the booking table's constraint is
                // the only guard left.
                let _ = self.stores.payments().mark_success(order_id, now)?;
                self.finish_booking(&attempt, true, now)
            }
            Some(reservation) if reservation.status.is_terminal() => {
                self.handle_late_capture(&attempt, &reservation, now)
            }
            Some(_) => {
                let _ = self.reservations.advance(
                    order_id,
                    ReservationStatus::PaymentConfirmed,
                    Some(payment_id),
                    now,
                )?;
                let _ = self.stores.payments().mark_success(order_id, now)?;
                self.finish_booking(&attempt, false, now)
            }
        }
    }

    /// Processes a late capture for a reservation that already terminated.
    ///
    /// The payment is real, so it is marked successful either way; whether a
    /// booking appears depends solely on the booking-table constraint. A
    /// still-free slot retroactively accepts the lapsed hold; a taken slot
    /// preserves the money with a recorded conflict.
    fn handle_late_capture(
        &self,
        attempt: &PaymentAttempt,
        reservation: &Reservation,
        now: Timestamp,
    ) -> Result<WebhookOutcome, WebhookError> {
        if reservation.status == ReservationStatus::Booked {
            // The terminal state already carries a booking; re-read it.
            if let Some(booking) = self.stores.bookings().find_by_attempt(attempt.id)? {
                return Ok(WebhookOutcome::Booked {
                    booking_id: booking.id,
                    newly_created: false,
                    legacy_fallback: false,
                });
            }
            return Err(WebhookError::Store(StoreError::Corrupt(format!(
                "reservation {} is booked but attempt {} has no booking",
                reservation.id, attempt.id
            ))));
        }
        let _ = self.stores.payments().mark_success(&attempt.order_id, now)?;
        self.finish_booking(attempt, false, now)
    }

    /// Materializes the booking and maps the outcome, re-reading the attempt
    /// so the materializer sees the recorded gateway payment identifier.
    fn finish_booking(
        &self,
        attempt: &PaymentAttempt,
        legacy_fallback: bool,
        now: Timestamp,
    ) -> Result<WebhookOutcome, WebhookError> {
        let current = self
            .stores
            .payments()
            .find_by_order(&attempt.order_id)?
            .ok_or_else(|| WebhookError::UnknownOrder(attempt.order_id.clone()))?;
        match self.materializer.materialize(&current, now)? {
            Materialized::Created(booking) => Ok(WebhookOutcome::Booked {
                booking_id: booking.id,
                newly_created: true,
                legacy_fallback,
            }),
            Materialized::AlreadyBooked(booking) => Ok(WebhookOutcome::Booked {
                booking_id: booking.id,
                newly_created: false,
                legacy_fallback,
            }),
            Materialized::Conflict {
                existing,
            } => Ok(WebhookOutcome::PaymentRecordedNoBooking {
                reason: format!("slot already booked by booking {}", existing.id),
            }),
        }
    }

    /// Processes a `payment.failed` event: settle the attempt, then release
    /// the hold — but never release a reservation whose attempt succeeded
    /// (an out-of-order failure after a capture must not clobber it).
    fn handle_failed(
        &self,
        order_id: &OrderId,
        now: Timestamp,
    ) -> Result<WebhookOutcome, WebhookError> {
        let attempt = self
            .stores
            .payments()
            .mark_failed(order_id, now)?
            .ok_or_else(|| WebhookError::UnknownOrder(order_id.clone()))?;
        let released = if attempt.status == PaymentStatus::Failed {
            self.reservations.release(order_id, now)?
        } else {
            false
        };
        Ok(WebhookOutcome::FailureRecorded {
            order_id: order_id.clone(),
            released,
        })
    }
}
