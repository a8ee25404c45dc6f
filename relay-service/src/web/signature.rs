//! Inbound webhook signature verification.
//!
//! The CRM signs each request body with HMAC-SHA256 and sends the lowercase
//! hex digest in a header. Verification runs over the exact bytes received,
//! before the body is parsed, so re-serialization can never change the
//! digest.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `body` under `secret`.
pub fn compute_signature(body: &[u8], secret: &str) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        unreachable!("hmac accepts keys of any length");
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify `signature` against the raw request body.
///
/// The comparison is exact and case-sensitive against the lowercase hex
/// digest, and runs in constant time.
///
/// # Arguments
///
/// * `body` - The request body exactly as received
/// * `signature` - The header-supplied hex digest
/// * `secret` - The shared signing secret
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        warn!(
            has_secret = !secret.is_empty(),
            has_signature = !signature.is_empty(),
            "signature_missing_fields"
        );
        return false;
    }

    let expected = compute_signature(body, secret);
    let valid = constant_time_compare(&expected, signature);

    if !valid {
        warn!(
            expected_length = expected.len(),
            actual_length = signature.len(),
            "signature_mismatch"
        );
    }

    valid
}

/// Constant-time string comparison to prevent timing attacks.
pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
