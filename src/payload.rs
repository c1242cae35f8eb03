//! Registration payload construction.
//!
//! A registration carries two sealed payloads: the variable-size payload
//! (VSP), a `ClientToStation` message padded so its ciphertext length is a
//! multiple of three, and the fixed-size payload (FSP), six bytes announcing
//! the VSP ciphertext length and the session flags. The tag handed to the
//! decoy stream is `enc_VSP || representative || enc_FSP`, divisible by
//! three by construction so the 3-to-4 keystream masking covers it exactly.

use bytes::{BufMut, BytesMut};

use crate::crypto::{seal, SharedKeys, GCM_TAG_SIZE};
use crate::error::{Error, Result};

/// Plaintext width of the fixed-size payload.
pub const FSP_SIZE: usize = 6;

/// Sealed width of the fixed-size payload.
pub const ENC_FSP_SIZE: usize = FSP_SIZE + GCM_TAG_SIZE;

/// Baseline FSP flags every registration carries.
const DEFAULT_FLAGS: u8 = 0x01;

/// FSP flag asking the station to prepend a PROXY-protocol header.
const FLAG_PROXY_HEADER: u8 = 1 << 1;

/// Station-facing registration message.
///
/// Protobuf wire format, encoded by hand; field numbers are part of the
/// schema the station accepts and must stay put.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientToStation {
    /// Application-level destination, when the caller set one.
    pub covert_address: Option<String>,
    /// Generation counter of the decoy list used for selection.
    pub decoy_list_generation: u32,
    /// Whether the client believes IPv6 is usable.
    pub v6_support: bool,
    /// Masked SNI for the phantom connection, when configured.
    pub masked_decoy_server_name: Option<String>,
    /// Zero padding aligning the sealed length.
    pub padding: Vec<u8>,
}

impl ClientToStation {
    /// Serialize to protobuf wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(64 + self.padding.len());

        if let Some(covert) = &self.covert_address {
            put_len_field(&mut buf, 1, covert.as_bytes());
        }
        put_varint_field(&mut buf, 2, u64::from(self.decoy_list_generation));
        put_varint_field(&mut buf, 3, u64::from(self.v6_support));
        if let Some(sni) = &self.masked_decoy_server_name {
            put_len_field(&mut buf, 4, sni.as_bytes());
        }
        if !self.padding.is_empty() {
            put_len_field(&mut buf, 5, &self.padding);
        }

        buf.to_vec()
    }
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            buf.put_u8(byte | 0x80);
        } else {
            buf.put_u8(byte);
            break;
        }
    }
}

fn put_varint_field(buf: &mut BytesMut, field: u32, value: u64) {
    put_varint(buf, u64::from(field) << 3);
    put_varint(buf, value);
}

fn put_len_field(buf: &mut BytesMut, field: u32, data: &[u8]) {
    put_varint(buf, (u64::from(field) << 3) | 2);
    put_varint(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Build the variable-size payload plaintext.
///
/// Zero padding grows the message until the sealed length (plaintext plus
/// GCM tag) is a multiple of three.
pub fn build_vsp(
    covert_address: Option<&str>,
    generation: u32,
    v6_support: bool,
    masked_sni: Option<&str>,
) -> Vec<u8> {
    let mut msg = ClientToStation {
        covert_address: covert_address.map(str::to_owned),
        decoy_list_generation: generation,
        v6_support,
        masked_decoy_server_name: masked_sni.map(str::to_owned),
        padding: Vec::new(),
    };

    while (msg.encode().len() + GCM_TAG_SIZE) % 3 != 0 {
        msg.padding.push(0);
    }
    msg.encode()
}

/// Build the fixed-size payload for a sealed VSP of `enc_vsp_len` bytes.
pub fn build_fsp(enc_vsp_len: u16, use_proxy_header: bool) -> [u8; FSP_SIZE] {
    let mut buf = [0u8; FSP_SIZE];
    buf[0..2].copy_from_slice(&enc_vsp_len.to_be_bytes());

    let mut flags = DEFAULT_FLAGS;
    if use_proxy_header {
        flags |= FLAG_PROXY_HEADER;
    }
    buf[2] = flags;

    buf
}

/// Verify the covert configuration fits the FSP's u16 length field.
///
/// Run before the registration fan-out so an oversized covert address
/// surfaces before any network activity. The v6 flag does not change the
/// encoded length, so any value stands in here.
pub fn check_size(
    covert_address: Option<&str>,
    generation: u32,
    masked_sni: Option<&str>,
) -> Result<()> {
    let vsp = build_vsp(covert_address, generation, true, masked_sni);
    if vsp.len() > usize::from(u16::MAX) {
        return Err(Error::PayloadTooLarge {
            limit: usize::from(u16::MAX),
            actual: vsp.len(),
        });
    }
    Ok(())
}

/// Build the full registration tag: `enc_VSP || representative || enc_FSP`.
///
/// Fails with [`Error::PayloadTooLarge`] before anything is sealed when the
/// VSP does not fit the FSP's u16 length field.
pub fn build_tag(
    keys: &SharedKeys,
    covert_address: Option<&str>,
    generation: u32,
    v6_support: bool,
    masked_sni: Option<&str>,
    use_proxy_header: bool,
) -> Result<Vec<u8>> {
    let vsp = build_vsp(covert_address, generation, v6_support, masked_sni);
    if vsp.len() > usize::from(u16::MAX) {
        return Err(Error::PayloadTooLarge {
            limit: usize::from(u16::MAX),
            actual: vsp.len(),
        });
    }

    let enc_vsp = seal(&keys.vsp_key, &keys.vsp_iv, &vsp)?;
    let fsp = build_fsp(enc_vsp.len() as u16, use_proxy_header);
    let enc_fsp = seal(&keys.fsp_key, &keys.fsp_iv, &fsp)?;

    let mut tag = enc_vsp;
    tag.extend_from_slice(&keys.representative);
    tag.extend_from_slice(&enc_fsp);
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> SharedKeys {
        SharedKeys::from_parts([0x21u8; 32], [0x7eu8; 32]).unwrap()
    }

    #[test]
    fn test_vsp_sealed_length_divisible_by_three() {
        for covert in [None, Some("10.0.0.1:5601"), Some("x"), Some("a-much-longer-covert-name.example.com:443")] {
            let vsp = build_vsp(covert, 1153, true, None);
            assert_eq!((vsp.len() + GCM_TAG_SIZE) % 3, 0, "covert={covert:?}");
        }
    }

    #[test]
    fn test_fsp_layout() {
        let fsp = build_fsp(0x0102, false);
        assert_eq!(fsp.len(), FSP_SIZE);
        assert_eq!(&fsp[0..2], &[0x01, 0x02]);
        assert_eq!(fsp[2], DEFAULT_FLAGS);
        assert_eq!(&fsp[3..6], &[0, 0, 0]);

        let fsp = build_fsp(7, true);
        assert_eq!(fsp[2], DEFAULT_FLAGS | FLAG_PROXY_HEADER);
    }

    #[test]
    fn test_tag_layout() {
        let keys = keys();
        let tag = build_tag(&keys, Some("covert.example:443"), 9, false, None, false).unwrap();

        assert_eq!(tag.len() % 3, 0);
        // representative sits between the sealed payloads
        let repr_at = tag.len() - ENC_FSP_SIZE - 32;
        assert_eq!(&tag[repr_at..repr_at + 32], &[0x7eu8; 32]);
        assert_eq!(tag.len() - repr_at - 32, ENC_FSP_SIZE);
    }

    #[test]
    fn test_tag_is_deterministic() {
        let keys = keys();
        let a = build_tag(&keys, Some("c:1"), 2, true, None, false).unwrap();
        let b = build_tag(&keys, Some("c:1"), 2, true, None, false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_oversized_covert_rejected() {
        let keys = keys();
        let covert = "c".repeat(70_000);
        let err = build_tag(&keys, Some(&covert), 0, false, None, false).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
    }

    #[test]
    fn test_encode_field_presence() {
        let bare = ClientToStation {
            decoy_list_generation: 3,
            v6_support: false,
            ..Default::default()
        }
        .encode();
        let with_covert = ClientToStation {
            covert_address: Some("host:443".into()),
            decoy_list_generation: 3,
            v6_support: false,
            ..Default::default()
        }
        .encode();

        // field 1 is a length-delimited string: tag byte, length byte, bytes
        assert_eq!(with_covert.len(), bare.len() + 2 + "host:443".len());
        assert_eq!(with_covert[0], 0x0a);
    }
}
