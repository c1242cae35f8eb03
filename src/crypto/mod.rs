//! Cryptographic primitives for the Conjure registration protocol.
//!
//! This module provides:
//! - Elligator-transformed ephemeral X25519 key agreement with the station
//! - The HKDF-SHA256 subkey schedule shared with the station
//! - AES-128-GCM sealing of the registration payloads
//! - HMAC-SHA256 over the protocol context strings
//! - Secure random number generation
//!
//! Secret material is zeroized on drop.

mod aead;
mod kdf;
mod keys;
mod random;

pub use aead::seal;
pub use kdf::conjure_hmac;
pub use keys::SharedKeys;
pub use random::{rand_int, SecureRandom};

/// Size of the X25519 shared secret in bytes.
pub const SHARED_SECRET_SIZE: usize = 32;

/// Size of the Elligator2 representative in bytes.
pub const REPRESENTATIVE_SIZE: usize = 32;

/// Size of the AES-128-GCM payload keys in bytes.
pub const PAYLOAD_KEY_SIZE: usize = 16;

/// Size of the AES-GCM IV in bytes.
pub const IV_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes.
pub const GCM_TAG_SIZE: usize = 16;

/// Width of the fresh master secret in the subkey schedule.
pub const MASTER_SECRET_SIZE: usize = 48;

/// Width of the phantom-selection seed in the subkey schedule.
pub const CONJURE_SEED_SIZE: usize = 16;

/// HKDF salt fixed by the station protocol (28 bytes).
pub const HKDF_SALT: &[u8] = b"conjureconjureconjureconjure";
