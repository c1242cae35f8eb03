//! Deterministic decoy selection.
//!
//! The station replays the same draw from the shared secret to learn which
//! decoys a session registered through, so selection must be a pure function
//! of the secret and the width.

use crate::assets::Decoy;
use crate::crypto::conjure_hmac;

/// Pick `width` decoys from `pool` keyed by the shared secret.
///
/// Draw `i` hashes `"registrationdecoy" || i` under the secret and reduces
/// the digest modulo the pool size, so draws are independent and duplicates
/// are permitted. The effective width never exceeds the pool; an empty pool
/// yields an empty selection, which the orchestrator treats as unreachable.
pub fn select_decoys(shared_secret: &[u8], pool: &[Decoy], width: usize) -> Vec<Decoy> {
    if pool.is_empty() {
        return Vec::new();
    }

    let width = width.min(pool.len());
    let mut picked = Vec::with_capacity(width);
    for i in 0..width {
        let digest = conjure_hmac(shared_secret, &format!("registrationdecoy{i}"));
        picked.push(pool[mod_index(&digest, pool.len() as u64)].clone());
    }
    picked
}

/// Reduce a digest, read as a big-endian unsigned integer, modulo `modulus`.
fn mod_index(digest: &[u8; 32], modulus: u64) -> usize {
    let mut acc: u128 = 0;
    for &byte in digest {
        acc = ((acc << 8) | u128::from(byte)) % u128::from(modulus);
    }
    acc as usize
}
