//! Registration fan-out and phantom rendezvous.
//!
//! A session registers by sending `width` decoy handshakes in parallel, each
//! carrying the same sealed tag. The fan-out stops waiting on the first
//! success or the first error that proves the network is reachable;
//! outstanding attempts finish in the background and their results are
//! dropped. Only when every attempt reports network-unreachable does the
//! session fail, which is also the trigger for the v6-to-v4 retry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use crate::assets::{AssetSource, Decoy, IpFamily, DECOY_PORT, V6_CACHE_TTL};
use crate::connector::{BoxedConn, Connector};
use crate::crypto::{conjure_hmac, rand_int, SharedKeys};
use crate::decoys::select_decoys;
use crate::error::{Error, Result};
use crate::payload;
use crate::phantom::select_phantom;
use crate::session::{Session, SessionStats, Transport, V6Policy};
use crate::stego::{
    http_request_beginning, keystream_demand, reverse_encrypt, StegoTlsStream, DRAIN_WINDOW_SECS,
};

/// Port phantoms are dialed on.
pub const PHANTOM_PORT: u16 = 443;

/// RTT assumed for timing decisions before one is measured, milliseconds.
const DEFAULT_RTT_MS: u64 = 300;

/// Hard window for the IPv6 fast-reject probe.
const V6_PROBE_WINDOW: Duration = Duration::from_micros(500);

// The typo is part of the wire protocol; the station computes the same
// bytes over the same string.
const MIN_TRANSPORT_CONTEXT: &str = "MinTrasportHMACString";

/// The 32-byte tag a Min-transport session writes to the phantom.
pub fn min_transport_tag(shared_secret: &[u8]) -> [u8; 32] {
    conjure_hmac(shared_secret, MIN_TRANSPORT_CONTEXT)
}

/// One registration derived from a session.
///
/// All `width` attempts share this record; only the stats behind the mutex
/// are written after the fan-out starts.
pub struct Registration {
    session_id_str: String,
    keys: Arc<SharedKeys>,
    /// Phantom address the station will intercept.
    pub phantom: std::net::IpAddr,
    /// Family selection the fan-out ran under.
    pub family: IpFamily,
    /// v6-support flag sent to the station.
    pub v6_support: bool,
    /// Application-level destination carried in the sealed payload.
    pub covert_address: Option<String>,
    transport: Transport,
    tag: Vec<u8>,
    stats: Arc<Mutex<SessionStats>>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("session_id_str", &self.session_id_str)
            .field("phantom", &self.phantom)
            .field("family", &self.family)
            .field("v6_support", &self.v6_support)
            .field("covert_address", &self.covert_address)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl Registration {
    /// Dial the phantom and write the transport's opening tag.
    ///
    /// The dial runs under a randomized deadline scaled by the measured
    /// decoy RTT. Callers needing an outer deadline wrap the future in
    /// `tokio::time::timeout`; dropping it cancels the dial.
    pub async fn connect(&self, connector: &dyn Connector) -> Result<BoxedConn> {
        let deadline = self.random_duration(0, 1061 * 2, 1953 * 3);
        let addr = SocketAddr::new(self.phantom, PHANTOM_PORT);

        let mut conn = match timeout(deadline, connector.connect(addr)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(err)) => {
                tracing::info!(
                    "{} failed to dial phantom {}: {}",
                    self.session_id_str,
                    addr,
                    err
                );
                return Err(Error::Network(err));
            }
            Err(_) => return Err(Error::Timeout(deadline.as_millis() as u64)),
        };
        tracing::info!("{} connected to phantom {}", self.session_id_str, addr);

        match self.transport {
            Transport::Min => {
                let tag = min_transport_tag(&self.keys.shared_secret);
                conn.write_all(&tag).await?;
            }
            Transport::Null => {}
            Transport::Obfs4 => return Err(Error::NotImplemented("obfs4 transport")),
        }

        Ok(conn)
    }

    /// `base + rtt * (rand(min, max) / 1000)` milliseconds, with the RTT
    /// falling back to 300 ms until a decoy dial has measured one.
    pub fn random_duration(&self, base_ms: u64, min: u64, max: u64) -> Duration {
        let addon = rand_int(min, max) / 1000;
        Duration::from_millis(base_ms + self.rtt_ms() * addon)
    }

    fn rtt_ms(&self) -> u64 {
        self.stats
            .lock()
            .tcp_to_decoy_ms
            .filter(|&ms| ms != 0)
            .map(u64::from)
            .unwrap_or(DEFAULT_RTT_MS)
    }

    fn set_tcp_to_decoy(&self, ms: u32) {
        self.stats.lock().tcp_to_decoy_ms = Some(ms);
    }

    fn set_tls_to_decoy(&self, ms: u32) {
        self.stats.lock().tls_to_decoy_ms = Some(ms);
    }

    /// Summary line logged when a registration attempt completes.
    pub fn digest_stats(&self) -> String {
        let stats = self.stats.lock();
        format!(
            "{{result:\"success\", tcp_to_decoy:{}, tls_to_decoy:{}, total_time_to_connect:{}}}",
            stats.tcp_to_decoy_ms.unwrap_or(0),
            stats.tls_to_decoy_ms.unwrap_or(0),
            stats.total_time_to_connect_ms.unwrap_or(0),
        )
    }

    /// Assemble the decoy HTTP request with the masked tag spliced in.
    fn build_request<S>(&self, hostname: &str, tls: &StegoTlsStream<S>) -> Result<Vec<u8>>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
    {
        let mut request = http_request_beginning(hostname);
        let keystream = tls.out_keystream(keystream_demand(request.len(), self.tag.len()))?;

        let masked = reverse_encrypt(&self.tag, &keystream[request.len()..]);
        request.extend_from_slice(&masked);
        request.extend_from_slice(b"\r\n\r\n");
        Ok(request)
    }
}

/// Register a session: decide the family, run the fan-out, fall back to v4
/// when a v6-inclusive fan-out proves unreachable.
pub(crate) async fn register(
    session: &mut Session,
    assets: &dyn AssetSource,
    connector: Arc<dyn Connector>,
) -> Result<Arc<Registration>> {
    // Size bound surfaces before any packet leaves the host.
    payload::check_size(
        session.covert_address.as_deref(),
        assets.generation(),
        session.phantom_sni.as_deref(),
    )?;

    let policy = session.v6_policy;
    let (family, v6_support) = match policy {
        V6Policy::V4Only => (IpFamily::V4, false),
        V6Policy::V6Only => (IpFamily::V6, true),
        V6Policy::Both => (IpFamily::Both, true),
        V6Policy::Auto => {
            let cached = assets.v6_support();
            let supported = if cached.is_fresh(V6_CACHE_TTL) {
                cached.supported
            } else {
                let supported = probe_v6(assets, connector.clone()).await;
                assets.set_v6_support(if supported {
                    IpFamily::Both
                } else {
                    IpFamily::V4
                });
                supported
            };
            if supported {
                tracing::debug!("{} including v6", session.id_string());
                (IpFamily::Both, true)
            } else {
                tracing::debug!("{} using v4", session.id_string());
                (IpFamily::V4, false)
            }
        }
    };

    match attempt(session, assets, connector.clone(), family, v6_support).await {
        Err(err)
            if err.is_unreachable() && family.includes_v6() && policy != V6Policy::V6Only =>
        {
            tracing::debug!("{} v6 unreachable, retrying with v4", session.id_string());
            assets.set_v6_support(IpFamily::V4);
            attempt(session, assets, connector, IpFamily::V4, false).await
        }
        outcome => outcome,
    }
}

/// One fan-out over a fixed family selection.
async fn attempt(
    session: &mut Session,
    assets: &dyn AssetSource,
    connector: Arc<dyn Connector>,
    family: IpFamily,
    v6_support: bool,
) -> Result<Arc<Registration>> {
    let pool = assets.decoys_for(family);
    let decoys = select_decoys(&session.keys.shared_secret, &pool, session.width);
    if decoys.is_empty() {
        return Err(Error::unreachable("no decoys available for registration"));
    }
    if decoys.len() < session.width {
        tracing::warn!(
            "{} using width {} (requested {})",
            session.id_string(),
            decoys.len(),
            session.width
        );
    }

    let phantom = select_phantom(&session.keys.conjure_seed, v6_support)?;
    session.phantom = Some(phantom);

    let tag = payload::build_tag(
        &session.keys,
        session.covert_address.as_deref(),
        assets.generation(),
        v6_support,
        session.phantom_sni.as_deref(),
        session.use_proxy_header,
    )?;

    let reg = Arc::new(Registration {
        session_id_str: session.id_string(),
        keys: session.keys.clone(),
        phantom,
        family,
        v6_support,
        covert_address: session.covert_address.clone(),
        transport: session.transport,
        tag,
        stats: session.stats.clone(),
    });

    tracing::debug!(
        "{} registration - v6:{} covert:{:?} phantom:{} width:{} transport:{:?}",
        reg.session_id_str,
        reg.v6_support,
        reg.covert_address,
        reg.phantom,
        decoys.len(),
        reg.transport,
    );

    let width = decoys.len();
    let (results_tx, mut results_rx) = mpsc::channel::<Result<()>>(width);
    for decoy in decoys {
        tracing::debug!(
            "{} sending registration to {} {:?}",
            reg.session_id_str,
            decoy.hostname,
            decoy.ip()
        );
        tokio::spawn(send_registration(
            reg.clone(),
            decoy,
            connector.clone(),
            results_tx.clone(),
        ));
    }
    drop(results_tx);

    // Drain until the first success or the first error that proves the
    // network reachable; count unreachables toward total failure.
    let mut unreachable_count = 0;
    while let Some(outcome) = results_rx.recv().await {
        match outcome {
            Ok(()) => break,
            Err(err) if err.is_unreachable() => {
                unreachable_count += 1;
                if unreachable_count == width {
                    break;
                }
            }
            Err(err) => {
                tracing::trace!("{} {}", reg.session_id_str, err);
                break;
            }
        }
    }

    if unreachable_count == width {
        tracing::trace!("{} network unreachable", reg.session_id_str);
        return Err(Error::unreachable(
            "all decoys failed to register -- dial unreachable",
        ));
    }

    Ok(reg)
}

/// Fast-reject IPv6 probe: dial one v6 decoy and watch for an immediate
/// local error inside the probe window. Anything slower is optimistically
/// treated as support.
async fn probe_v6(assets: &dyn AssetSource, connector: Arc<dyn Connector>) -> bool {
    let Some(addr) = assets
        .v6_decoy()
        .and_then(|d| d.ipv6)
        .map(|ip| SocketAddr::new(ip.into(), DECOY_PORT))
    else {
        return false;
    };

    let (probe_tx, mut probe_rx) = mpsc::channel::<std::io::Result<()>>(1);
    tokio::spawn(async move {
        let outcome = connector.connect(addr).await.map(drop);
        let _ = probe_tx.send(outcome).await;
    });

    tokio::time::sleep(V6_PROBE_WINDOW).await;
    match probe_rx.try_recv() {
        Ok(Err(err)) => {
            tracing::trace!("v6 probe rejected early: {err}");
            false
        }
        // Connected inside the window, or still pending: assume support.
        _ => true,
    }
}

/// One registration attempt. Runs in parallel with its siblings and posts
/// exactly one result; nothing here may touch shared state beyond the
/// mutex-guarded stats.
async fn send_registration(
    reg: Arc<Registration>,
    decoy: Decoy,
    connector: Arc<dyn Connector>,
    results: mpsc::Sender<Result<()>>,
) {
    match send_to_decoy(&reg, &decoy, connector.as_ref()).await {
        Ok(tls) => {
            let _ = results.send(Ok(())).await;
            // Look like a client awaiting a response, then hang up.
            tls.drain(Duration::from_secs(DRAIN_WINDOW_SECS)).await;
            tracing::info!("{} {}", reg.session_id_str, reg.digest_stats());
        }
        Err(err) => {
            let _ = results.send(Err(err)).await;
        }
    }
}

async fn send_to_decoy(
    reg: &Registration,
    decoy: &Decoy,
    connector: &dyn Connector,
) -> Result<StegoTlsStream<BoxedConn>> {
    let addr = decoy
        .addr()
        .ok_or_else(|| Error::dial("decoy has no usable address"))?;

    let tcp_start = Instant::now();
    let dialed = connector.connect(addr).await;
    reg.set_tcp_to_decoy(elapsed_ms(tcp_start));
    let conn = dialed.map_err(Error::from_dial)?;

    let rtt = reg.rtt_ms();
    let deadline = Duration::from_millis(rand_int(1061 * rtt * 2, 1953 * rtt * 3) / 1000);

    let sni = if decoy.hostname.is_empty() {
        addr.ip().to_string()
    } else {
        decoy.hostname.clone()
    };

    let tls_start = Instant::now();
    let mut tls = match timeout(deadline, StegoTlsStream::handshake(conn, &sni)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(err)) => return Err(as_dial_failure(err)),
        Err(_) => return Err(Error::dial("decoy TLS handshake deadline exceeded")),
    };
    reg.set_tls_to_decoy(elapsed_ms(tls_start));

    let request = reg.build_request(&sni, &tls)?;
    tls.write_record(&request).await.map_err(as_dial_failure)?;
    Ok(tls)
}

/// Collapse attempt-local errors into the registration error kinds.
fn as_dial_failure(err: Error) -> Error {
    match err {
        Error::Unreachable(_) | Error::DialFailure(_) => err,
        Error::Network(io_err) => Error::from_dial(io_err),
        other => Error::DialFailure(other.to_string()),
    }
}

fn elapsed_ms(start: Instant) -> u32 {
    start.elapsed().as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phantom::in_phantom_range;
    use crate::testutil::{test_bundle, MockBehavior, MockConnector};
    use crate::SessionConfig;
    use tokio::io::AsyncReadExt;

    fn test_registration(keys: SharedKeys, transport: Transport) -> Registration {
        Registration {
            session_id_str: "[0-test]".into(),
            keys: Arc::new(keys),
            phantom: "192.122.190.1".parse().unwrap(),
            family: IpFamily::V4,
            v6_support: false,
            covert_address: None,
            transport,
            tag: vec![0u8; 54],
            stats: Arc::new(Mutex::new(SessionStats::default())),
        }
    }

    #[test]
    fn test_min_transport_tag_vector() {
        // Zero-secret known answer; the same bytes must hit the wire.
        assert_eq!(
            hex::encode(min_transport_tag(&[0u8; 32])),
            "eeff073379f43acfc6fc967695fd78be7fd7c42ae6194eccfeff8461b7a41be8"
        );
    }

    #[tokio::test]
    async fn test_min_transport_tag_reaches_phantom_socket() {
        let keys = SharedKeys::from_parts([0u8; 32], [0u8; 32]).unwrap();
        let reg = test_registration(keys, Transport::Min);

        let connector = MockConnector::new(|_| MockBehavior::Phantom);
        let _conn = reg.connect(connector.as_ref()).await.unwrap();

        let mut peer = connector.take_phantom_peer().unwrap();
        let mut wire = [0u8; 32];
        peer.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire, min_transport_tag(&[0u8; 32]));
    }

    #[tokio::test]
    async fn test_null_transport_writes_nothing() {
        let keys = SharedKeys::from_parts([4u8; 32], [0u8; 32]).unwrap();
        let reg = test_registration(keys, Transport::Null);

        let connector = MockConnector::new(|_| MockBehavior::Phantom);
        let _conn = reg.connect(connector.as_ref()).await.unwrap();

        let mut peer = connector.take_phantom_peer().unwrap();
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_millis(50), peer.read(&mut buf)).await;
        assert!(read.is_err(), "nothing should arrive on a Null transport");
    }

    #[tokio::test]
    async fn test_obfs4_not_implemented() {
        let keys = SharedKeys::from_parts([4u8; 32], [0u8; 32]).unwrap();
        let reg = test_registration(keys, Transport::Obfs4);

        let connector = MockConnector::new(|_| MockBehavior::Phantom);
        let err = reg.connect(connector.as_ref()).await.unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[tokio::test]
    async fn test_all_unreachable_fails_without_phantom_dial() {
        let assets = test_bundle();
        let connector = MockConnector::new(|_| MockBehavior::Unreachable);
        let mut session =
            Session::new(&SessionConfig::default(), None, &assets.station_pubkey()).unwrap();

        let err = register(&mut session, &assets, connector.clone())
            .await
            .unwrap_err();
        assert!(err.is_unreachable());

        // Every dialed address was a decoy; the phantom was never attempted.
        for addr in connector.dialed() {
            assert!(!in_phantom_range(addr.ip()), "phantom dialed: {addr}");
        }
    }

    #[tokio::test]
    async fn test_partial_success_proceeds() {
        let assets = test_bundle();
        // One decoy answers; its siblings refuse outright. Refusal proves
        // the network reachable, so the fan-out must proceed either way.
        let connector = MockConnector::new(|addr| match addr.ip() {
            std::net::IpAddr::V6(_) => MockBehavior::Unreachable,
            std::net::IpAddr::V4(v4) if v4.octets()[3] == 1 => MockBehavior::DecoyTls,
            _ => MockBehavior::Refused,
        });

        let mut session =
            Session::new(&SessionConfig::default(), None, &assets.station_pubkey()).unwrap();
        let reg = register(&mut session, &assets, connector)
            .await
            .unwrap();
        assert!(in_phantom_range(reg.phantom));
    }

    #[tokio::test]
    async fn test_unreachable_fanout_retries_v4() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let assets = test_bundle();
        // The first fan-out's dials all come back unreachable; the v4 rerun
        // finds working decoys. `Both` policy skips the probe, so dial order
        // is: width attempts, then the retry's attempts.
        let width = SessionConfig::default().width;
        let dials = AtomicUsize::new(0);
        let connector = MockConnector::new(move |addr| {
            if dials.fetch_add(1, Ordering::SeqCst) < width {
                MockBehavior::Unreachable
            } else if addr.is_ipv4() {
                MockBehavior::DecoyTls
            } else {
                MockBehavior::Unreachable
            }
        });

        let mut config = SessionConfig::default();
        config.v6_policy = crate::V6Policy::Both;
        let mut session = Session::new(&config, None, &assets.station_pubkey()).unwrap();

        let reg = register(&mut session, &assets, connector)
            .await
            .unwrap();
        assert_eq!(reg.family, IpFamily::V4);
        assert!(!reg.v6_support);

        let cache = assets.v6_support();
        assert!(!cache.supported);
        assert_eq!(cache.family, IpFamily::V4);
    }

    #[tokio::test]
    async fn test_registration_stats_are_recorded() {
        let assets = test_bundle();
        let connector = MockConnector::new(|addr| match addr.ip() {
            std::net::IpAddr::V6(_) => MockBehavior::Unreachable,
            _ => MockBehavior::DecoyTls,
        });

        let mut session =
            Session::new(&SessionConfig::default(), None, &assets.station_pubkey()).unwrap();
        let _reg = register(&mut session, &assets, connector)
            .await
            .unwrap();

        let stats = session.stats();
        assert!(stats.tcp_to_decoy_ms.is_some());
    }
}
