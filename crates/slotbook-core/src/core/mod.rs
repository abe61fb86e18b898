// crates/slotbook-core/src/core/mod.rs
// ============================================================================
// Module: Slotbook Core Types
// Description: Canonical Slotbook domain records and value types.
// Purpose: Provide stable, serializable types for reservations, payments, and bookings.
// Dependencies: serde, sha2, subtle
// ============================================================================

//! ## Overview
//! Slotbook core types define the three persisted records of the booking
//! engine (reservation, payment attempt, booking), the outbox task record,
//! the gateway event model, and the value types they share. These types are
//! the canonical source of truth for any derived API surfaces.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod booking;
pub mod event;
pub mod identifiers;
pub mod money;
pub mod outbox;
pub mod payment;
pub mod reservation;
pub mod signature;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use booking::Booking;
pub use booking::BookingStatus;
pub use booking::NewBooking;
pub use event::EventParseError;
pub use event::GatewayEvent;
pub use identifiers::AttemptId;
pub use identifiers::BookingId;
pub use identifiers::ClientId;
pub use identifiers::GatewayPaymentId;
pub use identifiers::OrderId;
pub use identifiers::ProviderId;
pub use identifiers::ReservationId;
pub use money::Currency;
pub use money::CurrencyError;
pub use money::Money;
pub use outbox::NotificationKind;
pub use outbox::OutboxStatus;
pub use outbox::OutboxTask;
pub use payment::NewPaymentAttempt;
pub use payment::PaymentAttempt;
pub use payment::PaymentStatus;
pub use reservation::NewReservation;
pub use reservation::Reservation;
pub use reservation::ReservationStatus;
pub use signature::SignatureError;
pub use signature::hmac_sha256_hex;
pub use signature::verify_signature;
pub use time::HOLD_TTL_MS;
pub use time::SlotDate;
pub use time::SlotTime;
pub use time::SlotTimeError;
pub use time::Timestamp;
