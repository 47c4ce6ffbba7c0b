//! Cryptographic utilities for gateway signature verification.
//!
//! The gateway signs two things with HMAC-SHA256, hex encoded:
//!
//! - the `"{order_id}|{payment_id}"` pair returned to the client after checkout,
//!   keyed with the API key secret
//! - every webhook body, keyed with the webhook secret

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 and return hex-encoded result.
///
/// # Panics
///
/// This function will never panic in practice. The `expect` call is guarded by
/// the invariant that HMAC-SHA256 accepts keys of any size per RFC 2104.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> String {
    // INVARIANT: HMAC-SHA256 accepts keys of any size per RFC 2104, so
    // `new_from_slice` only fails if the Hmac implementation is broken.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Check a hex signature over `message`. Hex case is ignored.
#[must_use]
pub fn verify_signature(secret: &str, message: &[u8], signature: &str) -> bool {
    let expected = hmac_sha256_hex(secret, message);
    constant_time_eq(&expected, &signature.trim().to_ascii_lowercase())
}

/// The message the gateway signs for a completed checkout.
#[must_use]
pub fn payment_signature_payload(order_id: &str, payment_id: &str) -> String {
    format!("{order_id}|{payment_id}")
}
