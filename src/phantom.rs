//! Phantom address selection.
//!
//! The station watches fixed routed ranges; the client derives one address
//! in them from the conjure seed so both sides agree on the rendezvous point
//! without it ever appearing in a payload.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{Error, Result};

/// Routed IPv4 range phantoms are drawn from.
pub const PHANTOM_V4_NET: (Ipv4Addr, u32) = (Ipv4Addr::new(192, 122, 190, 0), 24);

/// Routed IPv6 range phantoms are drawn from.
pub const PHANTOM_V6_NET: (Ipv6Addr, u32) = (Ipv6Addr::new(0x2001, 0x48a8, 0x687f, 0x0001, 0, 0, 0, 0), 64);

const V4_HOSTS: u128 = 1u128 << (32 - PHANTOM_V4_NET.1);
const V6_HOSTS: u128 = 1u128 << (128 - PHANTOM_V6_NET.1);

/// Map a conjure seed to a phantom address.
///
/// With v6 support the family falls out of the seed with probability
/// proportional to each range's host count; without it the v4 range is
/// forced. Host bits come from an HKDF stream over the seed, so the result
/// is reproducible from `(seed, v6_supported)` alone.
pub fn select_phantom(seed: &[u8], v6_supported: bool) -> Result<IpAddr> {
    let total = if v6_supported {
        V4_HOSTS + V6_HOSTS
    } else {
        V4_HOSTS
    };

    let pick = seed_value(seed)? % total;
    if pick < V4_HOSTS {
        let base = u32::from(PHANTOM_V4_NET.0);
        Ok(IpAddr::V4(Ipv4Addr::from(base | pick as u32)))
    } else {
        let base = u128::from(PHANTOM_V6_NET.0);
        Ok(IpAddr::V6(Ipv6Addr::from(base | (pick - V4_HOSTS))))
    }
}

/// Expand the seed into the 128-bit selection value.
fn seed_value(seed: &[u8]) -> Result<u128> {
    let hk = Hkdf::<Sha256>::new(None, seed);
    let mut okm = [0u8; 16];
    hk.expand(b"phantom-select", &mut okm)
        .map_err(|_| Error::crypto("phantom seed expansion failed"))?;
    Ok(u128::from_be_bytes(okm))
}

/// Whether an address lies in the routed range for its family.
pub fn in_phantom_range(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            let mask = u32::MAX << (32 - PHANTOM_V4_NET.1);
            u32::from(v4) & mask == u32::from(PHANTOM_V4_NET.0)
        }
        IpAddr::V6(v6) => {
            let mask = u128::MAX << (128 - PHANTOM_V6_NET.1);
            u128::from(v6) & mask == u128::from(PHANTOM_V6_NET.0)
        }
    }
}
