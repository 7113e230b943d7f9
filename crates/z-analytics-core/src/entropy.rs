//! Fallible access to secure randomness.
//!
//! Every draw goes through `try_fill_bytes`. A generator failure surfaces as
//! [`PrivacyError::EntropyUnavailable`]; there is no silent fallback to a
//! weaker source.

use rand::{CryptoRng, RngCore};

use crate::error::{PrivacyError, Result};

/// Fill `buf` with secure random bytes.
///
/// # Errors
///
/// Returns `PrivacyError::EntropyUnavailable` if the generator fails.
pub fn fill<R: RngCore + CryptoRng + ?Sized>(rng: &mut R, buf: &mut [u8]) -> Result<()> {
    rng.try_fill_bytes(buf)
        .map_err(|_| PrivacyError::EntropyUnavailable)
}

/// A uniform `u64`.
///
/// # Errors
///
/// Returns `PrivacyError::EntropyUnavailable` if the generator fails.
pub fn next_u64<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    fill(rng, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// A uniform `f64` in `[0, 1)` with 53 bits of precision.
///
/// # Errors
///
/// Returns `PrivacyError::EntropyUnavailable` if the generator fails.
pub fn unit_f64<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Result<f64> {
    Ok(unit_from_bits(next_u64(rng)?))
}

/// A uniform index in `0..n` using a multiply-shift reduction.
///
/// # Errors
///
/// Returns `PrivacyError::EntropyUnavailable` if the generator fails.
pub fn index<R: RngCore + CryptoRng + ?Sized>(rng: &mut R, n: usize) -> Result<usize> {
    let x = next_u64(rng)?;
    #[allow(clippy::cast_possible_truncation)]
    let i = ((u128::from(x) * n as u128) >> 64) as usize;
    Ok(i)
}

/// `count` random bytes, hex encoded.
///
/// # Errors
///
/// Returns `PrivacyError::EntropyUnavailable` if the generator fails.
pub fn hex_token<R: RngCore + CryptoRng + ?Sized>(rng: &mut R, count: usize) -> Result<String> {
    let mut buf = vec![0u8; count];
    fill(rng, &mut buf)?;
    Ok(hex::encode(buf))
}

/// Map 64 random bits to `[0, 1)`.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn unit_from_bits(bits: u64) -> f64 {
    (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

#[cfg(test)]
pub(crate) mod testing {
    use rand::{CryptoRng, RngCore};

    /// A generator whose every call fails.
    pub struct FailingRng;

    impl RngCore for FailingRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::other("entropy source offline")))
        }
    }

    impl CryptoRng for FailingRng {}
}
