//! Deterministic server-side Laplace noise.
//!
//! Noise for a bucket is derived from a per-day secret key and the bucket's
//! label, so re-materializing a day yields identical noisy counts and an
//! auditor holding the day key can [`reproduce`] them. Fresh randomness on
//! every query would let an attacker average repeated queries back to the raw
//! count.
//!
//! ```text
//! day_key = HMAC-SHA256(master, "z-analytics/noise-day/v1|" ++ date)
//! u       = HMAC-SHA256(day_key, label) mapped into (0, 1)
//! noise   = -b · sgn(u - ½) · ln(1 - 2|u - ½|),  b = sensitivity / ε
//! ```

use std::fmt;

use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use crate::entropy;
use crate::error::{PrivacyError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Minimum length of the master noise secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Length of a per-day key.
pub const DAY_KEY_LEN: usize = 32;

const DAY_KEY_CONTEXT: &str = "z-analytics/noise-day/v1|";

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    // INVARIANT: HMAC-SHA256 accepts keys of any size per RFC 2104.
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts any key size");
    mac.update(message);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Master secret from which per-day keys are derived.
#[derive(Clone)]
pub struct NoiseSecret(Vec<u8>);

impl NoiseSecret {
    /// Wrap a master secret.
    ///
    /// # Errors
    ///
    /// Returns `PrivacyError::WeakNoiseSecret` if shorter than
    /// [`MIN_SECRET_LEN`] bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() < MIN_SECRET_LEN {
            return Err(PrivacyError::WeakNoiseSecret {
                min: MIN_SECRET_LEN,
            });
        }
        Ok(Self(bytes))
    }

    /// Derive the key for one calendar day.
    #[must_use]
    pub fn day_key(&self, date: NaiveDate) -> DayKey {
        let label = format!("{DAY_KEY_CONTEXT}{date}");
        DayKey(hmac_sha256(&self.0, label.as_bytes()))
    }
}

impl fmt::Debug for NoiseSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NoiseSecret(<redacted>)")
    }
}

/// Key seeding all noise for one day.
#[derive(Clone, PartialEq, Eq)]
pub struct DayKey([u8; DAY_KEY_LEN]);

impl DayKey {
    /// Wrap stored key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DAY_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random day key.
    ///
    /// # Errors
    ///
    /// Returns `PrivacyError::EntropyUnavailable` if the generator fails.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Result<Self> {
        let mut bytes = [0u8; DAY_KEY_LEN];
        entropy::fill(rng, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Raw key bytes, for persistence.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DAY_KEY_LEN] {
        &self.0
    }

    /// Public identifier of the key: first 8 bytes of its SHA-256, hex.
    ///
    /// Recorded with snapshots as `noise_seed`. It identifies which key was
    /// used without revealing it.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }

    /// Uniform value in the open interval `(0, 1)` bound to `label`.
    #[must_use]
    pub fn uniform(&self, label: &str) -> f64 {
        let mac = hmac_sha256(&self.0, label.as_bytes());
        let mut bits = [0u8; 8];
        bits.copy_from_slice(&mac[..8]);
        open_unit(u64::from_le_bytes(bits))
    }
}

impl fmt::Debug for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DayKey({})", self.fingerprint())
    }
}

/// Map 64 bits to the open interval `(0, 1)`: never exactly 0 or 1.
#[allow(clippy::cast_precision_loss)]
fn open_unit(bits: u64) -> f64 {
    ((bits >> 11) as f64 + 0.5) / (1u64 << 53) as f64
}

/// Laplace inverse CDF at `u` for location 0 and the given scale.
#[must_use]
pub fn laplace_inverse_cdf(u: f64, scale: f64) -> f64 {
    let centered = u - 0.5;
    -scale * centered.signum() * 2.0f64.mul_add(-centered.abs(), 1.0).ln()
}

/// The Laplace mechanism calibrated for one release.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaplaceMechanism {
    epsilon: f64,
    sensitivity: f64,
}

impl LaplaceMechanism {
    /// Mechanism with scale `sensitivity / epsilon`.
    ///
    /// # Errors
    ///
    /// Returns an error unless both values are finite and positive.
    pub fn new(sensitivity: f64, epsilon: f64) -> Result<Self> {
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(PrivacyError::InvalidEpsilon("server"));
        }
        if !sensitivity.is_finite() || sensitivity <= 0.0 {
            return Err(PrivacyError::InvalidSensitivity);
        }
        Ok(Self {
            epsilon,
            sensitivity,
        })
    }

    /// Epsilon spent by one release.
    #[must_use]
    pub const fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Laplace scale `b`.
    #[must_use]
    pub fn scale(&self) -> f64 {
        self.sensitivity / self.epsilon
    }

    /// The noise value for `label` under `key`.
    #[must_use]
    pub fn noise(&self, key: &DayKey, label: &str) -> f64 {
        laplace_inverse_cdf(key.uniform(label), self.scale())
    }

    /// Noisy release of `raw`: rounded and clamped to be non-negative.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn release(&self, key: &DayKey, label: &str, raw: u64) -> u64 {
        (raw as f64 + self.noise(key, label)).round().max(0.0) as u64
    }
}

/// Recompute a published noisy count from its inputs.
///
/// Given the day key, the bucket label and the raw count, this returns the
/// value materialization wrote. Auditors use it to verify snapshots.
#[must_use]
pub fn reproduce(mechanism: &LaplaceMechanism, key: &DayKey, label: &str, raw: u64) -> u64 {
    mechanism.release(key, label, raw)
}
