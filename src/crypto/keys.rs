//! The per-session shared key bundle.
//!
//! A session starts by generating an ephemeral X25519 keypair whose public
//! key admits an Elligator2 representative, so the 32 bytes that reach the
//! wire are indistinguishable from random. The X25519 shared secret with the
//! station's long-term key then feeds an HKDF-SHA256 schedule whose read
//! order is fixed by the station.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use curve25519_elligator2::{MapToPointVariant, Randomized};

use crate::crypto::{
    SecureRandom, CONJURE_SEED_SIZE, HKDF_SALT, IV_SIZE, MASTER_SECRET_SIZE, PAYLOAD_KEY_SIZE,
    REPRESENTATIVE_SIZE, SHARED_SECRET_SIZE,
};
use crate::error::{Error, Result};

/// Subkey schedule shared between a session and the station.
///
/// Immutable once derived; registrations hold it by reference and never
/// write to it.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedKeys {
    /// Raw X25519 output with the station public key.
    pub shared_secret: [u8; SHARED_SECRET_SIZE],
    /// Elligator2-encoded ephemeral public key, as sent on the wire.
    pub representative: [u8; REPRESENTATIVE_SIZE],
    /// AES-128-GCM key for the fixed-size payload.
    pub fsp_key: [u8; PAYLOAD_KEY_SIZE],
    /// IV for the fixed-size payload.
    pub fsp_iv: [u8; IV_SIZE],
    /// AES-128-GCM key for the variable-size payload.
    pub vsp_key: [u8; PAYLOAD_KEY_SIZE],
    /// IV for the variable-size payload.
    pub vsp_iv: [u8; IV_SIZE],
    /// Fresh master secret handed to the station.
    pub new_master_secret: [u8; MASTER_SECRET_SIZE],
    /// Seed for phantom address selection.
    pub conjure_seed: [u8; CONJURE_SEED_SIZE],
}

impl SharedKeys {
    /// Derive a full key bundle against the station's long-term public key.
    ///
    /// Ephemeral private keys are drawn until one whose public key has a
    /// valid Elligator2 representative is found; roughly half of all
    /// candidates qualify, so the loop is short.
    pub fn derive(station_pubkey: &[u8; 32]) -> Result<Self> {
        let (shared_secret, representative) = elligator_transformed_exchange(station_pubkey);
        Self::from_parts(shared_secret, representative)
    }

    /// Expand the subkey schedule from an established secret.
    ///
    /// Split out of [`SharedKeys::derive`] so the schedule itself stays a
    /// pure function of its inputs.
    pub fn from_parts(
        shared_secret: [u8; SHARED_SECRET_SIZE],
        representative: [u8; REPRESENTATIVE_SIZE],
    ) -> Result<Self> {
        // Single expansion with empty info; the station reads the same
        // stream and slices it in this exact order.
        const SCHEDULE_LEN: usize = PAYLOAD_KEY_SIZE
            + IV_SIZE
            + PAYLOAD_KEY_SIZE
            + IV_SIZE
            + MASTER_SECRET_SIZE
            + CONJURE_SEED_SIZE;

        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &shared_secret);
        let mut okm = [0u8; SCHEDULE_LEN];
        hk.expand(&[], &mut okm)
            .map_err(|_| Error::crypto("HKDF expansion failed"))?;

        let mut keys = SharedKeys {
            shared_secret,
            representative,
            fsp_key: [0u8; PAYLOAD_KEY_SIZE],
            fsp_iv: [0u8; IV_SIZE],
            vsp_key: [0u8; PAYLOAD_KEY_SIZE],
            vsp_iv: [0u8; IV_SIZE],
            new_master_secret: [0u8; MASTER_SECRET_SIZE],
            conjure_seed: [0u8; CONJURE_SEED_SIZE],
        };

        let mut at = 0;
        for field in [
            keys.fsp_key.as_mut_slice(),
            keys.fsp_iv.as_mut_slice(),
            keys.vsp_key.as_mut_slice(),
            keys.vsp_iv.as_mut_slice(),
            keys.new_master_secret.as_mut_slice(),
            keys.conjure_seed.as_mut_slice(),
        ] {
            field.copy_from_slice(&okm[at..at + field.len()]);
            at += field.len();
        }
        okm.zeroize();

        Ok(keys)
    }

    /// Hex prefix of the shared secret used in the session log tag.
    pub fn secret_hex_prefix(&self) -> String {
        hex::encode(&self.shared_secret[..3])
    }
}

/// Generate an Elligator2-encodable ephemeral keypair and complete the
/// exchange with the station key.
///
/// Returns the raw shared secret and the representative bytes.
fn elligator_transformed_exchange(station_pubkey: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let station = PublicKey::from(*station_pubkey);
    let mut rng = SecureRandom::rng();

    loop {
        let mut privkey = [0u8; 32];
        rng.fill_bytes(&mut privkey);
        let tweak = (rng.next_u32() & 0xff) as u8;

        // Only about half of all points are representable.
        let representative: Option<[u8; 32]> =
            Randomized::to_representative(&privkey, tweak).into();
        if let Some(representative) = representative {
            let secret = StaticSecret::from(privkey);
            let shared = secret.diffie_hellman(&station);
            privkey.zeroize();
            return (*shared.as_bytes(), representative);
        }
        privkey.zeroize();
    }
}
