//! TLS handshake message construction and parsing for the decoy channel.
//!
//! The ClientHello parrots the Chrome 62 fingerprint the station filters
//! candidate flows on: its cipher-suite order, GREASE placement, ALPN and
//! signature-algorithm lists. A stock TLS stack cannot reproduce this, so
//! the records are assembled by hand.

use bytes::{BufMut, BytesMut};
use x25519_dalek::PublicKey;

use crate::crypto::SecureRandom;
use crate::error::{Error, Result};

/// TLS record content types.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ContentType {
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

/// TLS handshake message types.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
}

const EXT_RENEGOTIATION_INFO: u16 = 0xff01;
const EXT_SERVER_NAME: u16 = 0;
const EXT_EXTENDED_MASTER_SECRET: u16 = 0x0017;
const EXT_SESSION_TICKET: u16 = 0x0023;
const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
const EXT_STATUS_REQUEST: u16 = 0x0005;
const EXT_SCT: u16 = 0x0012;
const EXT_ALPN: u16 = 0x0010;
const EXT_CHANNEL_ID: u16 = 0x7550;
const EXT_EC_POINT_FORMATS: u16 = 0x000b;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;
const EXT_KEY_SHARE: u16 = 0x0033;

const GROUP_X25519: u16 = 0x001d;

/// Draw one GREASE value (RFC 8701): 0x?a?a with a random high nibble.
fn grease() -> u16 {
    let nibble = (SecureRandom::u32() % 16) as u16;
    (nibble << 12) | 0x0a0a | (nibble << 4)
}

/// Builder for the Chrome-62-parroted ClientHello.
pub struct ClientHelloBuilder {
    sni: String,
    client_public: PublicKey,
    alpn: Vec<&'static str>,
}

impl ClientHelloBuilder {
    /// Create a builder for `sni` carrying the session's ephemeral key share.
    pub fn new(sni: impl Into<String>, client_public: PublicKey) -> Self {
        Self {
            sni: sni.into(),
            client_public,
            alpn: vec!["h2", "http/1.1"],
        }
    }

    /// Build the full ClientHello record.
    pub fn build(&self) -> Vec<u8> {
        let body = self.build_body();

        let mut record = BytesMut::with_capacity(5 + body.len());
        record.put_u8(ContentType::Handshake as u8);
        record.put_u16(0x0301); // legacy record version on first flight
        record.put_u16(body.len() as u16);
        record.put_slice(&body);
        record.to_vec()
    }

    fn build_body(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(512);

        buf.put_u8(HandshakeType::ClientHello as u8);
        let length_at = buf.len();
        buf.put_slice(&[0, 0, 0]); // 3-byte length backfilled below

        buf.put_u16(0x0303); // legacy version
        buf.put_slice(&SecureRandom::bytes::<32>());
        buf.put_u8(0); // empty legacy session id

        let suites = self.cipher_suites();
        buf.put_u16(suites.len() as u16);
        buf.put_slice(&suites);

        buf.put_u8(1); // null compression only
        buf.put_u8(0);

        let extensions = self.extensions();
        buf.put_u16(extensions.len() as u16);
        buf.put_slice(&extensions);

        let body_len = buf.len() - 4;
        buf[length_at] = ((body_len >> 16) & 0xff) as u8;
        buf[length_at + 1] = ((body_len >> 8) & 0xff) as u8;
        buf[length_at + 2] = (body_len & 0xff) as u8;

        buf.to_vec()
    }

    /// Chrome 62 suite order, GREASE first.
    fn cipher_suites(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(30);
        for suite in [
            grease(),
            0xc02b, // ECDHE-ECDSA-AES128-GCM
            0xc02f, // ECDHE-RSA-AES128-GCM
            0xc02c, // ECDHE-ECDSA-AES256-GCM
            0xc030, // ECDHE-RSA-AES256-GCM
            0xcca9, // ECDHE-ECDSA-CHACHA20
            0xcca8, // ECDHE-RSA-CHACHA20
            0xc013, // ECDHE-RSA-AES128-CBC
            0xc014, // ECDHE-RSA-AES256-CBC
            0x009c, // RSA-AES128-GCM
            0x009d, // RSA-AES256-GCM
            0x002f, // RSA-AES128-CBC
            0x0035, // RSA-AES256-CBC
            0x000a, // RSA-3DES
        ] {
            buf.put_u16(suite);
        }
        buf.to_vec()
    }

    fn extensions(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(320);

        // Leading GREASE extension, empty body.
        buf.put_u16(grease());
        buf.put_u16(0);

        buf.put_u16(EXT_RENEGOTIATION_INFO);
        buf.put_u16(1);
        buf.put_u8(0);

        self.put_sni(&mut buf);

        buf.put_u16(EXT_EXTENDED_MASTER_SECRET);
        buf.put_u16(0);

        buf.put_u16(EXT_SESSION_TICKET);
        buf.put_u16(0);

        self.put_signature_algorithms(&mut buf);

        // status_request: OCSP, no responder ids, no extensions
        buf.put_u16(EXT_STATUS_REQUEST);
        buf.put_u16(5);
        buf.put_u8(1);
        buf.put_u16(0);
        buf.put_u16(0);

        buf.put_u16(EXT_SCT);
        buf.put_u16(0);

        self.put_alpn(&mut buf);

        buf.put_u16(EXT_CHANNEL_ID);
        buf.put_u16(0);

        buf.put_u16(EXT_EC_POINT_FORMATS);
        buf.put_u16(2);
        buf.put_u8(1);
        buf.put_u8(0); // uncompressed

        self.put_supported_groups(&mut buf);
        self.put_supported_versions(&mut buf);
        self.put_key_share(&mut buf);

        // Trailing GREASE extension with a single zero byte.
        buf.put_u16(grease());
        buf.put_u16(1);
        buf.put_u8(0);

        buf.to_vec()
    }

    fn put_sni(&self, buf: &mut BytesMut) {
        let name = self.sni.as_bytes();
        buf.put_u16(EXT_SERVER_NAME);
        buf.put_u16((5 + name.len()) as u16);
        buf.put_u16((3 + name.len()) as u16); // server name list
        buf.put_u8(0); // host_name
        buf.put_u16(name.len() as u16);
        buf.put_slice(name);
    }

    fn put_signature_algorithms(&self, buf: &mut BytesMut) {
        let algorithms: [u16; 9] = [
            0x0403, // ecdsa_secp256r1_sha256
            0x0804, // rsa_pss_rsae_sha256
            0x0401, // rsa_pkcs1_sha256
            0x0503, // ecdsa_secp384r1_sha384
            0x0805, // rsa_pss_rsae_sha384
            0x0501, // rsa_pkcs1_sha384
            0x0806, // rsa_pss_rsae_sha512
            0x0601, // rsa_pkcs1_sha512
            0x0201, // rsa_pkcs1_sha1
        ];
        buf.put_u16(EXT_SIGNATURE_ALGORITHMS);
        buf.put_u16((2 + algorithms.len() * 2) as u16);
        buf.put_u16((algorithms.len() * 2) as u16);
        for alg in algorithms {
            buf.put_u16(alg);
        }
    }

    fn put_alpn(&self, buf: &mut BytesMut) {
        let list_len: usize = self.alpn.iter().map(|p| 1 + p.len()).sum();
        buf.put_u16(EXT_ALPN);
        buf.put_u16((2 + list_len) as u16);
        buf.put_u16(list_len as u16);
        for proto in &self.alpn {
            buf.put_u8(proto.len() as u8);
            buf.put_slice(proto.as_bytes());
        }
    }

    fn put_supported_groups(&self, buf: &mut BytesMut) {
        let groups = [grease(), GROUP_X25519, 0x0017, 0x0018];
        buf.put_u16(EXT_SUPPORTED_GROUPS);
        buf.put_u16((2 + groups.len() * 2) as u16);
        buf.put_u16((groups.len() * 2) as u16);
        for group in groups {
            buf.put_u16(group);
        }
    }

    fn put_supported_versions(&self, buf: &mut BytesMut) {
        buf.put_u16(EXT_SUPPORTED_VERSIONS);
        buf.put_u16(5);
        buf.put_u8(4);
        buf.put_u16(0x0304);
        buf.put_u16(0x0303);
    }

    fn put_key_share(&self, buf: &mut BytesMut) {
        let key = self.client_public.as_bytes();
        buf.put_u16(EXT_KEY_SHARE);
        buf.put_u16((6 + key.len()) as u16);
        buf.put_u16((4 + key.len()) as u16); // client shares list
        buf.put_u16(GROUP_X25519);
        buf.put_u16(key.len() as u16);
        buf.put_slice(key);
    }
}

/// Parsed ServerHello from the decoy channel.
#[derive(Debug)]
pub struct ServerHello {
    /// Server random.
    pub server_random: [u8; 32],
    /// Negotiated cipher suite.
    pub cipher_suite: u16,
    /// Server's ephemeral X25519 key share, when present.
    pub key_share: Option<PublicKey>,
}

impl ServerHello {
    /// Parse a ServerHello handshake body (record framing already removed).
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 4 || body[0] != HandshakeType::ServerHello as u8 {
            return Err(Error::InvalidMessage("not a ServerHello".into()));
        }

        let msg_len = ((body[1] as usize) << 16) | ((body[2] as usize) << 8) | body[3] as usize;
        if body.len() < 4 + msg_len {
            return Err(Error::InvalidMessage("truncated ServerHello".into()));
        }
        let body = &body[4..4 + msg_len];

        if body.len() < 2 + 32 + 1 {
            return Err(Error::InvalidMessage("ServerHello body too short".into()));
        }
        let server_random: [u8; 32] = body[2..34]
            .try_into()
            .map_err(|_| Error::InvalidMessage("bad server random".into()))?;

        let session_id_len = body[34] as usize;
        let mut at = 35 + session_id_len;
        if body.len() < at + 3 {
            return Err(Error::InvalidMessage("ServerHello truncated".into()));
        }

        let cipher_suite = u16::from_be_bytes([body[at], body[at + 1]]);
        at += 3; // suite + compression

        let mut key_share = None;
        if body.len() >= at + 2 {
            let ext_len = u16::from_be_bytes([body[at], body[at + 1]]) as usize;
            at += 2;
            let end = (at + ext_len).min(body.len());

            while at + 4 <= end {
                let ext_type = u16::from_be_bytes([body[at], body[at + 1]]);
                let len = u16::from_be_bytes([body[at + 2], body[at + 3]]) as usize;
                at += 4;
                if at + len > end {
                    break;
                }

                if ext_type == EXT_KEY_SHARE && len >= 4 {
                    let group = u16::from_be_bytes([body[at], body[at + 1]]);
                    let key_len = u16::from_be_bytes([body[at + 2], body[at + 3]]) as usize;
                    if group == GROUP_X25519 && key_len == 32 && len >= 4 + key_len {
                        let key: [u8; 32] = body[at + 4..at + 36]
                            .try_into()
                            .map_err(|_| Error::InvalidMessage("bad key share".into()))?;
                        key_share = Some(PublicKey::from(key));
                    }
                }
                at += len;
            }
        }

        Ok(ServerHello {
            server_random,
            cipher_suite,
            key_share,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x25519_dalek::EphemeralSecret;

    fn client_public() -> PublicKey {
        PublicKey::from(&EphemeralSecret::random_from_rng(SecureRandom::rng()))
    }

    #[test]
    fn test_client_hello_framing() {
        let hello = ClientHelloBuilder::new("www.example.com", client_public()).build();

        assert_eq!(hello[0], ContentType::Handshake as u8);
        assert_eq!(&hello[1..3], &[0x03, 0x01]);
        let record_len = u16::from_be_bytes([hello[3], hello[4]]) as usize;
        assert_eq!(hello.len(), 5 + record_len);
        assert_eq!(hello[5], HandshakeType::ClientHello as u8);
    }

    #[test]
    fn test_client_hello_carries_sni_and_key_share() {
        let public = client_public();
        let hello = ClientHelloBuilder::new("decoy.example.org", public).build();

        let haystack = hello.as_slice();
        assert!(haystack
            .windows(b"decoy.example.org".len())
            .any(|w| w == b"decoy.example.org"));
        assert!(haystack
            .windows(32)
            .any(|w| w == public.as_bytes().as_slice()));
    }

    #[test]
    fn test_grease_values_well_formed() {
        for _ in 0..64 {
            let g = grease();
            assert_eq!(g & 0x0f0f, 0x0a0a);
            assert_eq!((g >> 12), (g >> 4) & 0x0f);
        }
    }
}
