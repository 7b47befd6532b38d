//! High-entropy secret generation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Bytes of randomness behind a generated secret.
const SECRET_BYTES: usize = 32;

/// Generate a URL-safe secret from `n` bytes of OS randomness.
#[must_use]
pub fn generate(n: usize) -> String {
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Generate a new secret with the default entropy (32 bytes).
#[must_use]
pub fn url_safe() -> String {
    generate(SECRET_BYTES)
}
