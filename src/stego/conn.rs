//! The decoy-side TLS channel.
//!
//! Drives the parroted handshake, derives the outbound record keys from the
//! server key share, and exposes the one capability an off-the-shelf stack
//! never grants: reading the pending outbound keystream before application
//! data is encrypted. AES-GCM is counter-mode underneath, so the keystream
//! for the next record is exactly the encryption of zeros under the next
//! record nonce.

use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use bytes::{BufMut, BytesMut};
use hkdf::Hkdf;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::crypto::{SecureRandom, IV_SIZE, PAYLOAD_KEY_SIZE};
use crate::error::{Error, Result};
use crate::stego::hello::{ClientHelloBuilder, ContentType, ServerHello};

const HKDF_CHANNEL_SALT: &[u8] = b"conjure-decoy-stream";
const MAX_RECORD: usize = 1 << 14;

/// An established decoy TLS channel.
pub struct StegoTlsStream<S> {
    stream: S,
    cipher: Aes128Gcm,
    write_iv: [u8; IV_SIZE],
    seq: u64,
}

impl<S> StegoTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Run the parroted handshake against a connected decoy stream.
    pub async fn handshake(mut stream: S, sni: &str) -> Result<Self> {
        let ephemeral = EphemeralSecret::random_from_rng(SecureRandom::rng());
        let client_public = PublicKey::from(&ephemeral);

        let hello = ClientHelloBuilder::new(sni, client_public).build();
        stream.write_all(&hello).await?;

        let (content_type, body) = read_record(&mut stream).await?;
        if content_type != ContentType::Handshake as u8 {
            return Err(Error::InvalidMessage("expected handshake record".into()));
        }

        let server_hello = ServerHello::parse(&body)?;
        let server_public = server_hello
            .key_share
            .ok_or_else(|| Error::InvalidMessage("decoy offered no key share".into()))?;
        let shared = ephemeral.diffie_hellman(&server_public);

        let hk = Hkdf::<Sha256>::new(Some(HKDF_CHANNEL_SALT), shared.as_bytes());
        let mut key = [0u8; PAYLOAD_KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        hk.expand(b"client write key", &mut key)
            .map_err(|_| Error::crypto("record key expansion failed"))?;
        hk.expand(b"client write iv", &mut iv)
            .map_err(|_| Error::crypto("record iv expansion failed"))?;

        let cipher = Aes128Gcm::new_from_slice(&key)
            .map_err(|_| Error::crypto("invalid record key width"))?;

        Ok(Self {
            stream,
            cipher,
            write_iv: iv,
            seq: 0,
        })
    }

    /// Peek `len` bytes of the keystream the next outbound record will be
    /// encrypted under, without consuming it.
    pub fn out_keystream(&self, len: usize) -> Result<Vec<u8>> {
        let zeros = vec![0u8; len];
        let mut keystream = self
            .cipher
            .encrypt(Nonce::from_slice(&self.record_nonce()), zeros.as_slice())
            .map_err(|_| Error::crypto("keystream derivation failed"))?;
        keystream.truncate(len);
        Ok(keystream)
    }

    /// Seal `plaintext` into one application-data record and send it.
    pub async fn write_record(&mut self, plaintext: &[u8]) -> Result<()> {
        if plaintext.len() > MAX_RECORD {
            return Err(Error::InvalidMessage("record overflow".into()));
        }

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&self.record_nonce()), plaintext)
            .map_err(|_| Error::crypto("record seal failed"))?;

        let mut record = BytesMut::with_capacity(5 + sealed.len());
        record.put_u8(ContentType::ApplicationData as u8);
        record.put_u16(0x0303);
        record.put_u16(sealed.len() as u16);
        record.put_slice(&sealed);

        self.stream.write_all(&record).await?;
        self.seq += 1;
        Ok(())
    }

    /// Read and discard decoy responses until `window` elapses, then drop
    /// the connection. Read errors are swallowed; the station has already
    /// seen everything it needs.
    pub async fn drain(mut self, window: Duration) {
        let deadline = Instant::now() + window;
        let mut buf = [0u8; 4096];
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return;
            }
            match timeout(left, self.stream.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => continue,
                _ => return,
            }
        }
    }

    /// TLS 1.3 style per-record nonce: IV XOR the sequence number.
    fn record_nonce(&self) -> [u8; IV_SIZE] {
        let mut nonce = self.write_iv;
        for (slot, byte) in nonce[4..].iter_mut().zip(self.seq.to_be_bytes()) {
            *slot ^= byte;
        }
        nonce
    }

    #[cfg(test)]
    pub(crate) fn with_keys(stream: S, key: [u8; PAYLOAD_KEY_SIZE], iv: [u8; IV_SIZE]) -> Self {
        Self {
            stream,
            cipher: Aes128Gcm::new_from_slice(&key).unwrap(),
            write_iv: iv,
            seq: 0,
        }
    }
}

/// Read one TLS record, returning its content type and body.
async fn read_record<S>(stream: &mut S) -> Result<(u8, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await?;

    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    if len > MAX_RECORD {
        return Err(Error::InvalidMessage("oversized record".into()));
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok((header[0], body))
}
