//! Conjure sessions.
//!
//! A session is one circumvention attempt: a freshly derived key bundle plus
//! the knobs controlling the registration fan-out. It is consumed once and
//! is immutable from the moment the fan-out starts, apart from its stats.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::crypto::SharedKeys;
use crate::error::Result;
use crate::SessionConfig;

static SESSIONS_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Framing prelude written to the phantom connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// 32-byte HMAC tag announcing the session (the default).
    #[default]
    Min,
    /// Nothing is written; for debugging against a permissive station.
    Null,
    /// Probe-resistant transport; not implemented in the core.
    Obfs4,
}

/// Which address families a session may register over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum V6Policy {
    /// Never touch IPv6.
    V4Only,
    /// IPv6 decoys only; no v4 fallback.
    V6Only,
    /// Use both pools without probing.
    Both,
    /// Probe reachability (or trust a fresh cache entry) and decide.
    #[default]
    Auto,
}

/// Timing measurements accumulated over a session.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// TCP connect time to the decoy, milliseconds.
    pub tcp_to_decoy_ms: Option<u32>,
    /// TLS establishment time to the decoy, milliseconds.
    pub tls_to_decoy_ms: Option<u32>,
    /// Wall time from dial start to phantom connection, milliseconds.
    pub total_time_to_connect_ms: Option<u32>,
}

/// One circumvention attempt.
pub struct Session {
    pub(crate) keys: Arc<SharedKeys>,
    pub(crate) width: usize,
    pub(crate) v6_policy: V6Policy,
    pub(crate) use_proxy_header: bool,
    pub(crate) session_id: u64,
    pub(crate) transport: Transport,
    pub(crate) covert_address: Option<String>,
    pub(crate) phantom_sni: Option<String>,
    pub(crate) phantom: Option<IpAddr>,
    pub(crate) stats: Arc<Mutex<SessionStats>>,
}

impl Session {
    /// Build a session against a station key, deriving fresh shared keys.
    pub fn new(
        config: &SessionConfig,
        covert_address: Option<String>,
        station_pubkey: &[u8; 32],
    ) -> Result<Self> {
        let session_id = SESSIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
        let keys = SharedKeys::derive(station_pubkey)?;

        let session = Session {
            keys: Arc::new(keys),
            width: config.width.max(1),
            v6_policy: config.v6_policy,
            use_proxy_header: config.use_proxy_header,
            session_id,
            transport: config.transport,
            covert_address,
            phantom_sni: config.phantom_sni.clone(),
            phantom: None,
            stats: Arc::new(Mutex::new(SessionStats::default())),
        };

        tracing::debug!(
            "{} shared secret  - {}",
            session.id_string(),
            hex::encode(session.keys.shared_secret)
        );
        tracing::debug!(
            "{} representative - {}",
            session.id_string(),
            hex::encode(session.keys.representative)
        );

        Ok(session)
    }

    /// The log tag identifying this session.
    pub fn id_string(&self) -> String {
        id_tag(self.session_id, Some(&self.keys))
    }

    /// The phantom selected for this session, once registered.
    pub fn phantom(&self) -> Option<IpAddr> {
        self.phantom
    }

    /// Snapshot of the session's timing stats.
    pub fn stats(&self) -> SessionStats {
        self.stats.lock().clone()
    }
}

/// Format the session log tag; a placeholder stands in before keys exist.
pub(crate) fn id_tag(session_id: u64, keys: Option<&SharedKeys>) -> String {
    match keys {
        Some(keys) => format!("[{}-{}]", session_id, keys.secret_hex_prefix()),
        None => format!("[{session_id}-000000]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    #[test]
    fn test_session_ids_are_monotone() {
        let a = Session::new(&config(), None, &[1u8; 32]).unwrap();
        let b = Session::new(&config(), None, &[1u8; 32]).unwrap();
        assert!(b.session_id > a.session_id);
    }

    #[test]
    fn test_id_tag_format() {
        let keys = SharedKeys::from_parts([0xcdu8; 32], [0u8; 32]).unwrap();
        assert_eq!(id_tag(12, Some(&keys)), "[12-cdcdcd]");
        assert_eq!(id_tag(12, None), "[12-000000]");
    }

    #[test]
    fn test_width_floor() {
        let mut cfg = config();
        cfg.width = 0;
        let session = Session::new(&cfg, None, &[1u8; 32]).unwrap();
        assert_eq!(session.width, 1);
    }

    #[test]
    fn test_session_carries_covert() {
        let session =
            Session::new(&config(), Some("covert.example:443".into()), &[1u8; 32]).unwrap();
        assert_eq!(session.covert_address.as_deref(), Some("covert.example:443"));
        assert!(session.phantom().is_none());
    }
}
