//! # Conjure Client Core
//!
//! The registration-and-rendezvous engine of the Conjure refraction
//! networking protocol. A client covertly registers a session with
//! cooperating network infrastructure by riding TLS handshakes to unrelated
//! decoy hosts, then connects to a cryptographically selected "phantom"
//! address where the infrastructure picks the flow up and proxies it onward.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Dialer (session build, sleep, phantom rendezvous)       │
//! ├──────────────────────────────────────────────────────────┤
//! │  Registration fan-out (parallel decoy attempts, v6       │
//! │  policy, unreachable tally)                              │
//! ├──────────────────────────────────────────────────────────┤
//! │  TLS steganography (parroted handshake, keystream-masked │
//! │  payload embedding)                                      │
//! ├──────────────────────────────────────────────────────────┤
//! │  Selection (decoy draw, phantom address derivation)      │
//! ├──────────────────────────────────────────────────────────┤
//! │  Crypto (Elligator X25519, HKDF schedule, AES-128-GCM)   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Goals
//!
//! 1. **Unobservability**: registrations are byte-indistinguishable from
//!    ordinary HTTPS requests to real third-party hosts
//! 2. **Determinism where the station needs it**: decoy and phantom
//!    selection replay exactly from the shared secret
//! 3. **Latency**: registration attempts overlap; the first conclusive
//!    result drives control flow

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod assets;
pub mod connector;
pub mod crypto;
pub mod decoys;
pub mod dialer;
pub mod error;
pub mod payload;
pub mod phantom;
pub mod registration;
pub mod session;
pub mod stego;

#[cfg(test)]
mod testutil;

pub use assets::{AssetBundle, AssetSource, Decoy, IpFamily};
pub use connector::{BoxedConn, Conn, Connector, TcpConnector};
pub use dialer::Dialer;
pub use error::{Error, Result};
pub use session::{Session, SessionStats, Transport, V6Policy};

/// Registrations sent per session unless configured otherwise.
pub const DEFAULT_REG_WIDTH: usize = 5;

/// Options for building sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Number of parallel registration attempts (minimum 1).
    pub width: usize,
    /// Ask the station to prepend a PROXY-protocol header.
    pub use_proxy_header: bool,
    /// Framing prelude for the phantom connection.
    pub transport: Transport,
    /// Address-family policy for the registration fan-out.
    pub v6_policy: V6Policy,
    /// Masked SNI to request for the phantom connection.
    pub phantom_sni: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_REG_WIDTH,
            use_proxy_header: false,
            transport: Transport::Min,
            v6_policy: V6Policy::Auto,
            phantom_sni: None,
        }
    }
}
