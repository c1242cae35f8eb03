//! Asset-layer interface: station key, decoy list, and the v6-support cache.
//!
//! The asset snapshot is process-wide shared state read concurrently by
//! sessions. It sits behind the [`AssetSource`] trait so tests can substitute
//! it; the bundled [`AssetBundle`] is the in-memory implementation an
//! external loader publishes between sessions.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Port decoys and phantoms are dialed on.
pub const DECOY_PORT: u16 = 443;

/// How long a v6-support determination stays fresh.
pub const V6_CACHE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Which address families a registration fan-out may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    /// IPv4 decoys only.
    V4,
    /// IPv6 decoys only.
    V6,
    /// The union of both pools.
    Both,
}

impl IpFamily {
    /// Whether this family selection includes IPv6 decoys.
    pub fn includes_v6(self) -> bool {
        !matches!(self, IpFamily::V4)
    }
}

/// A third-party TLS host used as an unwitting registration conduit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoy {
    /// SNI / hostname presented during the decoy handshake.
    pub hostname: String,
    /// IPv4 address, if the decoy has one.
    pub ipv4: Option<Ipv4Addr>,
    /// IPv6 address, if the decoy has one.
    pub ipv6: Option<Ipv6Addr>,
}

impl Decoy {
    /// Create a decoy record.
    pub fn new(
        hostname: impl Into<String>,
        ipv4: Option<Ipv4Addr>,
        ipv6: Option<Ipv6Addr>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            ipv4,
            ipv6,
        }
    }

    /// The address dialed for this decoy. IPv4 wins when both are present.
    pub fn ip(&self) -> Option<IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .or_else(|| self.ipv6.map(IpAddr::V6))
    }

    /// Dialable socket address on the decoy port.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.ip().map(|ip| SocketAddr::new(ip, DECOY_PORT))
    }
}

/// Cached result of the last IPv6 reachability determination.
#[derive(Debug, Clone, Copy)]
pub struct V6Support {
    /// Whether IPv6 decoys were reachable when last checked.
    pub supported: bool,
    /// Family selection recorded with the determination.
    pub family: IpFamily,
    /// When the determination was made; `None` until first checked.
    pub checked_at: Option<Instant>,
}

impl V6Support {
    /// Whether the cached determination is recent enough to act on.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.checked_at
            .map(|at| at.elapsed() < ttl)
            .unwrap_or(false)
    }
}

impl Default for V6Support {
    fn default() -> Self {
        Self {
            supported: true,
            family: IpFamily::Both,
            checked_at: None,
        }
    }
}

/// Read surface of the asset snapshot consumed by the protocol core.
pub trait AssetSource: Send + Sync {
    /// The station's long-term X25519 public key.
    fn station_pubkey(&self) -> [u8; 32];

    /// Decoys with an IPv4 address.
    fn v4_decoys(&self) -> Vec<Decoy>;

    /// Decoys with an IPv6 address.
    fn v6_decoys(&self) -> Vec<Decoy>;

    /// The whole decoy list.
    fn all_decoys(&self) -> Vec<Decoy>;

    /// One IPv6 decoy for the reachability probe.
    fn v6_decoy(&self) -> Option<Decoy>;

    /// Current v6-support determination.
    fn v6_support(&self) -> V6Support;

    /// Record a v6-support determination.
    fn set_v6_support(&self, family: IpFamily);

    /// Monotone decoy-list generation counter.
    fn generation(&self) -> u32;

    /// The decoy pool for a family selection.
    fn decoys_for(&self, family: IpFamily) -> Vec<Decoy> {
        match family {
            IpFamily::V4 => self.v4_decoys(),
            IpFamily::V6 => self.v6_decoys(),
            IpFamily::Both => self.all_decoys(),
        }
    }
}

/// In-memory asset snapshot.
///
/// Treated as immutable for the duration of a session apart from the
/// v6-support cache; a loader may hot-swap the whole bundle between
/// sessions.
#[derive(Serialize, Deserialize)]
pub struct AssetBundle {
    #[serde(with = "base64_key")]
    station_pubkey: [u8; 32],
    decoys: Vec<Decoy>,
    generation: u32,
    #[serde(skip)]
    v6: RwLock<V6Support>,
}

impl AssetBundle {
    /// Create a bundle from a station key and decoy list.
    pub fn new(station_pubkey: [u8; 32], decoys: Vec<Decoy>, generation: u32) -> Self {
        Self {
            station_pubkey,
            decoys,
            generation,
            v6: RwLock::new(V6Support::default()),
        }
    }
}

impl AssetSource for AssetBundle {
    fn station_pubkey(&self) -> [u8; 32] {
        self.station_pubkey
    }

    fn v4_decoys(&self) -> Vec<Decoy> {
        self.decoys
            .iter()
            .filter(|d| d.ipv4.is_some())
            .cloned()
            .collect()
    }

    fn v6_decoys(&self) -> Vec<Decoy> {
        self.decoys
            .iter()
            .filter(|d| d.ipv6.is_some())
            .cloned()
            .collect()
    }

    fn all_decoys(&self) -> Vec<Decoy> {
        self.decoys.clone()
    }

    fn v6_decoy(&self) -> Option<Decoy> {
        self.decoys.iter().find(|d| d.ipv6.is_some()).cloned()
    }

    fn v6_support(&self) -> V6Support {
        *self.v6.read()
    }

    fn set_v6_support(&self, family: IpFamily) {
        let mut cache = self.v6.write();
        cache.supported = family.includes_v6();
        cache.family = family;
        cache.checked_at = Some(Instant::now());
    }

    fn generation(&self) -> u32 {
        self.generation
    }
}

mod base64_key {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("station key must be 32 bytes"))
    }
}
