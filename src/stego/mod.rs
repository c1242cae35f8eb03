//! Steganographic embedding of registrations in decoy TLS sessions.
//!
//! A registration rides inside what looks like an ordinary HTTPS request to
//! a third-party host: the client drives a fingerprint-parroted handshake,
//! then writes one application record whose plaintext is a plausible HTTP
//! GET where the filler header value is the registration tag masked against
//! the record keystream. The station, which observes the decoy flow, strips
//! the keystream back off; the decoy itself sees only a slightly odd
//! request and answers with garbage we drain and discard.

mod conn;
mod hello;

pub use conn::StegoTlsStream;
pub use hello::{ClientHelloBuilder, ServerHello};

use crate::crypto::{rand_int, SecureRandom};

/// How long to keep reading from the decoy after the registration is sent.
pub const DRAIN_WINDOW_SECS: u64 = 15;

/// Masked bytes produced per 3-byte tag group.
const GROUP_OUT: usize = 4;

/// Keystream bytes that must be requested for a tag of `tag_len` bytes
/// landing at `offset` in the record plaintext.
///
/// One spare group is requested beyond the tag because the top two bits of
/// every keystream byte are unusable for data.
pub fn keystream_demand(offset: usize, tag_len: usize) -> usize {
    offset + (tag_len / 3 + 1) * GROUP_OUT
}

/// Mask a registration tag against the outbound record keystream.
///
/// Each 3-byte tag group becomes four bytes in `0x40..=0x7f`: the low six
/// bits are the 6-bit group XORed with the corresponding keystream byte, and
/// the high bits pin the output into the printable range. When the record is
/// encrypted the keystream cancels, leaving the station the 6-bit groups to
/// reassemble. `tag.len()` must be divisible by three, which the payload
/// builder guarantees.
pub fn reverse_encrypt(tag: &[u8], keystream: &[u8]) -> Vec<u8> {
    debug_assert_eq!(tag.len() % 3, 0);

    let mut out = Vec::with_capacity(tag.len() / 3 * GROUP_OUT);
    for (chunk, ks) in tag.chunks_exact(3).zip(keystream.chunks_exact(GROUP_OUT)) {
        let groups = [
            chunk[0] >> 2,
            (chunk[0] & 0x03) << 4 | chunk[1] >> 4,
            (chunk[1] & 0x0f) << 2 | chunk[2] >> 6,
            chunk[2] & 0x3f,
        ];
        for (group, key) in groups.into_iter().zip(ks) {
            out.push(0x40 | ((group ^ key) & 0x3f));
        }
    }
    out
}

/// The plausible HTTP request the masked tag continues.
///
/// Ends inside the value of a filler header; the caller appends the masked
/// tag and the final blank line. The filler length varies so request sizes
/// do not cluster.
pub fn http_request_beginning(hostname: &str) -> Vec<u8> {
    let shared = format!(
        "Host: {hostname}\r\nUser-Agent: Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36"
    );
    let pad_len = rand_int(7, 612u64.saturating_sub(shared.len() as u64).max(7)) as usize;
    let mut filler = vec![0u8; pad_len];
    SecureRandom::fill(&mut filler);
    for byte in &mut filler {
        *byte = b'A' + *byte % 26;
    }

    let mut request = format!("GET / HTTP/1.1\r\n{shared}\r\nX-Ignore: ").into_bytes();
    request.extend_from_slice(&filler);
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The station side: XOR the wire-visible bytes with the keystream it
    /// recovered, keep the low six bits, and regroup 4-to-3.
    fn station_recover(masked: &[u8], keystream: &[u8]) -> Vec<u8> {
        let mut tag = Vec::with_capacity(masked.len() / 4 * 3);
        for (chunk, ks) in masked.chunks_exact(4).zip(keystream.chunks_exact(4)) {
            let g: Vec<u8> = chunk
                .iter()
                .zip(ks)
                .map(|(byte, key)| (byte ^ key) & 0x3f)
                .collect();
            tag.push(g[0] << 2 | g[1] >> 4);
            tag.push(g[1] << 4 | g[2] >> 2);
            tag.push(g[2] << 6 | g[3]);
        }
        tag
    }

    #[test]
    fn test_reverse_encrypt_roundtrip() {
        let tag: Vec<u8> = (0u8..=255).cycle().take(108).collect();
        let keystream = SecureRandom::bytes::<160>().to_vec();

        let masked = reverse_encrypt(&tag, &keystream);
        assert_eq!(masked.len(), tag.len() / 3 * 4);
        assert_eq!(station_recover(&masked, &keystream), tag);
    }

    #[test]
    fn test_masked_bytes_are_request_safe() {
        let tag = SecureRandom::bytes::<96>().to_vec();
        let keystream = SecureRandom::bytes::<128>().to_vec();
        for byte in reverse_encrypt(&tag, &keystream) {
            assert!((0x40..=0x7f).contains(&byte));
        }
    }

    #[test]
    fn test_keystream_demand() {
        // 54-byte tag at offset 100: 100 + (18 + 1) * 4
        assert_eq!(keystream_demand(100, 54), 176);
    }

    #[test]
    fn test_http_request_shape() {
        let request = http_request_beginning("decoy.example.com");
        let text = String::from_utf8(request).unwrap();
        assert!(text.starts_with("GET / HTTP/1.1\r\nHost: decoy.example.com\r\n"));
        assert!(text.contains("X-Ignore: "));
        assert!(!text.ends_with("\r\n"));
    }
}
