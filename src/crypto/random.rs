//! Secure random number generation.
//!
//! Wraps the operating system entropy source for key material, GREASE
//! selection, and the randomized protocol delays.

use rand::{CryptoRng, RngCore};
use rand_core::OsRng;

/// Cryptographically secure random number generator.
pub struct SecureRandom;

impl SecureRandom {
    /// Fill a buffer with cryptographically secure random bytes.
    pub fn fill(dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }

    /// Generate a fixed-size array of random bytes.
    pub fn bytes<const N: usize>() -> [u8; N] {
        let mut buf = [0u8; N];
        OsRng.fill_bytes(&mut buf);
        buf
    }

    /// Generate a random u64.
    pub fn u64() -> u64 {
        OsRng.next_u64()
    }

    /// Generate a random u32.
    pub fn u32() -> u32 {
        OsRng.next_u32()
    }

    /// Get an RNG instance that implements CryptoRng.
    pub fn rng() -> impl RngCore + CryptoRng {
        OsRng
    }
}

/// Sample an integer uniformly from `[min, max]`.
///
/// Returns `min` when the range is empty. The timing-tuning constants in the
/// registration flow pass through here, so the bounds are inclusive the way
/// the station expects the delay distribution.
pub fn rand_int(min: u64, max: u64) -> u64 {
    if min >= max {
        return min;
    }
    min + SecureRandom::u64() % (max - min + 1)
}
