//! AES-128-GCM sealing of the registration payloads.
//!
//! The station protocol fixes the cipher, the 16-byte key width, the 12-byte
//! IV, and the appended 16-byte tag. Each payload (FSP, VSP) is sealed once
//! with its own key and IV from the shared subkey schedule, so no nonce
//! counter is needed here.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};

use crate::crypto::{IV_SIZE, PAYLOAD_KEY_SIZE};
use crate::error::{Error, Result};

/// Encrypt `plaintext`, returning ciphertext with the 16-byte tag appended.
pub fn seal(key: &[u8; PAYLOAD_KEY_SIZE], iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher =
        Aes128Gcm::new_from_slice(key).map_err(|_| Error::crypto("invalid AES-128 key width"))?;
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| Error::crypto("AES-GCM seal failed"))
}

/// Decrypt a sealed payload. The client never opens station traffic; this is
/// the test-side inverse of [`seal`].
#[cfg(test)]
pub fn open(
    key: &[u8; PAYLOAD_KEY_SIZE],
    iv: &[u8; IV_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let cipher =
        Aes128Gcm::new_from_slice(key).map_err(|_| Error::crypto("invalid AES-128 key width"))?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| Error::crypto("AES-GCM open failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::GCM_TAG_SIZE;

    const KEY: [u8; PAYLOAD_KEY_SIZE] = [0x11; PAYLOAD_KEY_SIZE];
    const IV: [u8; IV_SIZE] = [0x22; IV_SIZE];

    #[test]
    fn test_seal_appends_tag() {
        let sealed = seal(&KEY, &IV, b"fixed size payload").unwrap();
        assert_eq!(sealed.len(), b"fixed size payload".len() + GCM_TAG_SIZE);
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let sealed = seal(&KEY, &IV, b"covert").unwrap();
        assert_eq!(open(&KEY, &IV, &sealed).unwrap(), b"covert");
    }

    #[test]
    fn test_seal_is_deterministic_per_key_iv() {
        // Registration attempts within a session re-seal the same payload
        // with the same key and IV; every decoy must carry identical bytes.
        let a = seal(&KEY, &IV, b"payload").unwrap();
        let b = seal(&KEY, &IV, b"payload").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut sealed = seal(&KEY, &IV, b"payload").unwrap();
        sealed[0] ^= 0x01;
        assert!(open(&KEY, &IV, &sealed).is_err());
    }
}
