//! Cryptographic utilities.
//!
//! Keyed hashing of client identifiers for the contribution limiter, and
//! constant-time comparison of API keys.

use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use sha2::Sha256;

use z_analytics_core::{entropy, ClientId, PrivacyError};

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 and return hex-encoded result.
///
/// # Panics
///
/// This function will never panic in practice. The `expect` call is guarded by
/// the invariant that HMAC-SHA256 accepts keys of any size per RFC 2104.
#[must_use]
pub fn hmac_sha256_hex(secret: &[u8], message: &str) -> String {
    // INVARIANT: HMAC-SHA256 accepts keys of any size per RFC 2104, so
    // `new_from_slice` only fails if the Hmac implementation is broken.
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC-SHA256 accepts any key size");
    mac.update(message.as_bytes());
    let result = mac.finalize();

    hex::encode(result.into_bytes())
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

/// Keyed hasher for client identifiers.
///
/// The raw identifier never outlives the request; only this hash is used as
/// a limiter key. The key is not persisted, so hashes are unlinkable across
/// processes unless `CLIENT_HASH_KEY` is configured.
#[derive(Clone)]
pub struct ClientHasher {
    key: Vec<u8>,
}

impl ClientHasher {
    /// Hasher with a configured key.
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Hasher with a fresh random key.
    ///
    /// # Errors
    ///
    /// Returns `PrivacyError::EntropyUnavailable` if the generator fails.
    pub fn random<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Result<Self, PrivacyError> {
        let mut key = vec![0u8; 32];
        entropy::fill(rng, &mut key)?;
        Ok(Self { key })
    }

    /// Hash a client identifier.
    #[must_use]
    pub fn hash(&self, client_id: &ClientId) -> String {
        hmac_sha256_hex(&self.key, client_id.as_str())
    }
}

impl std::fmt::Debug for ClientHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClientHasher(<redacted>)")
    }
}
