// crates/slotbook-core/src/core/signature.rs
// ============================================================================
// Module: Slotbook Webhook Signatures
// Description: HMAC-SHA256 webhook body authentication.
// Purpose: Reject forged gateway events before any processing happens.
// Dependencies: sha2, subtle
// ============================================================================

//! ## Overview
//! Gateway webhooks carry a lowercase-hex HMAC-SHA256 of the raw request
//! body, keyed by the shared webhook secret. Verification recomputes the
//! tag over the exact bytes received and compares in constant time. The
//! HMAC construction (RFC 2104) is built directly on the SHA-256 digest;
//! comparison uses `subtle` so mismatch position never leaks through
//! timing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sha2::Digest;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// SHA-256 block size in bytes (HMAC key padding width).
const SHA256_BLOCK_BYTES: usize = 64;
/// SHA-256 output size in bytes.
const SHA256_OUTPUT_BYTES: usize = 32;
/// Inner padding byte for the HMAC construction.
const HMAC_IPAD: u8 = 0x36;
/// Outer padding byte for the HMAC construction.
const HMAC_OPAD: u8 = 0x5c;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when verifying a webhook signature.
///
/// # Invariants
/// - Variants are stable for programmatic handling and never echo secret
///   material or the expected tag.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// Header is absent, not hex, or the wrong length for SHA-256.
    #[error("malformed signature header")]
    Malformed,
    /// Recomputed tag does not match the header.
    #[error("signature mismatch")]
    Mismatch,
}

// ============================================================================
// SECTION: HMAC-SHA256
// ============================================================================

/// Computes the HMAC-SHA256 tag of `message` under `secret`.
#[must_use]
fn hmac_sha256(secret: &[u8], message: &[u8]) -> [u8; SHA256_OUTPUT_BYTES] {
    let mut key_block = [0_u8; SHA256_BLOCK_BYTES];
    if secret.len() > SHA256_BLOCK_BYTES {
        let digest = Sha256::digest(secret);
        key_block[..SHA256_OUTPUT_BYTES].copy_from_slice(&digest);
    } else {
        key_block[..secret.len()].copy_from_slice(secret);
    }

    let mut inner = Sha256::new();
    let ipad: Vec<u8> = key_block.iter().map(|byte| byte ^ HMAC_IPAD).collect();
    inner.update(&ipad);
    inner.update(message);
    let inner_digest = inner.finalize();

    let mut outer = Sha256::new();
    let opad: Vec<u8> = key_block.iter().map(|byte| byte ^ HMAC_OPAD).collect();
    outer.update(&opad);
    outer.update(inner_digest);
    outer.finalize().into()
}

/// Computes the lowercase-hex HMAC-SHA256 tag of `message` under `secret`.
#[must_use]
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> String {
    hex_encode(&hmac_sha256(secret, message))
}

/// Verifies a lowercase-hex signature header against the raw body.
///
/// The comparison is constant-time over the decoded tag bytes; header
/// decoding rejects non-hex or wrong-length input before any comparison.
///
/// # Errors
///
/// Returns [`SignatureError::Malformed`] when the header cannot decode and
/// [`SignatureError::Mismatch`] when the tag does not match.
pub fn verify_signature(
    secret: &[u8],
    raw_body: &[u8],
    signature_header: &str,
) -> Result<(), SignatureError> {
    let claimed = hex_decode(signature_header).ok_or(SignatureError::Malformed)?;
    if claimed.len() != SHA256_OUTPUT_BYTES {
        return Err(SignatureError::Malformed);
    }
    let expected = hmac_sha256(secret, raw_body);
    if bool::from(expected.ct_eq(claimed.as_slice())) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

// ============================================================================
// SECTION: Hex Helpers
// ============================================================================

/// Encodes bytes as lowercase hex.
fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(hex_digit(byte >> 4));
        out.push(hex_digit(byte & 0x0f));
    }
    out
}

/// Returns the lowercase hex digit for a nibble value.
const fn hex_digit(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        _ => (b'a' + (nibble - 10)) as char,
    }
}

/// Decodes a hex string (either case); returns `None` on malformed input.
fn hex_decode(value: &str) -> Option<Vec<u8>> {
    let bytes = value.as_bytes();
    if bytes.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(bytes.len() / 2);
    for pair in bytes.chunks_exact(2) {
        let high = hex_value(pair[0])?;
        let low = hex_value(pair[1])?;
        out.push((high << 4) | low);
    }
    Some(out)
}

/// Returns the value of a single hex digit; `None` for non-hex bytes.
const fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
