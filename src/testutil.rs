//! Shared test fixtures: a scriptable network and a minimal decoy responder.

#![allow(dead_code)]

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::assets::{AssetBundle, Decoy};
use crate::connector::{BoxedConn, Connector};
use crate::crypto::SecureRandom;

/// What a mock dial to a given address should do.
pub(crate) enum MockBehavior {
    /// Fail immediately with `ENETUNREACH`.
    Unreachable,
    /// Fail immediately with connection refused.
    Refused,
    /// Succeed and answer like a decoy TLS server.
    DecoyTls,
    /// Succeed with a raw pipe whose far end the test keeps.
    Phantom,
}

/// Connector whose behavior is decided per-address by the test.
pub(crate) struct MockConnector {
    decide: Box<dyn Fn(SocketAddr) -> MockBehavior + Send + Sync>,
    dialed: Mutex<Vec<SocketAddr>>,
    phantom_peers: Mutex<Vec<DuplexStream>>,
}

impl MockConnector {
    pub(crate) fn new(
        decide: impl Fn(SocketAddr) -> MockBehavior + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            decide: Box::new(decide),
            dialed: Mutex::new(Vec::new()),
            phantom_peers: Mutex::new(Vec::new()),
        })
    }

    /// Every address dialed so far, in order.
    pub(crate) fn dialed(&self) -> Vec<SocketAddr> {
        self.dialed.lock().clone()
    }

    /// The far end of the most recent phantom connection.
    pub(crate) fn take_phantom_peer(&self) -> Option<DuplexStream> {
        self.phantom_peers.lock().pop()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, addr: SocketAddr) -> io::Result<BoxedConn> {
        self.dialed.lock().push(addr);
        match (self.decide)(addr) {
            MockBehavior::Unreachable => Err(io::Error::from_raw_os_error(101)),
            MockBehavior::Refused => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )),
            MockBehavior::DecoyTls => {
                let (client, server) = tokio::io::duplex(64 * 1024);
                tokio::spawn(respond_tls(server));
                Ok(Box::new(client))
            }
            MockBehavior::Phantom => {
                let (client, server) = tokio::io::duplex(64 * 1024);
                self.phantom_peers.lock().push(server);
                Ok(Box::new(client))
            }
        }
    }
}

/// Minimal decoy side of the parroted handshake: consume the ClientHello,
/// answer with a ServerHello carrying a fresh key share, then discard
/// whatever else arrives until the peer hangs up.
pub(crate) async fn respond_tls(mut stream: DuplexStream) {
    let mut header = [0u8; 5];
    if stream.read_exact(&mut header).await.is_err() {
        return;
    }
    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    let mut body = vec![0u8; len];
    if stream.read_exact(&mut body).await.is_err() {
        return;
    }

    let server_secret = EphemeralSecret::random_from_rng(SecureRandom::rng());
    let server_public = PublicKey::from(&server_secret);
    if stream.write_all(&build_server_hello(&server_public)).await.is_err() {
        return;
    }

    let mut sink = [0u8; 4096];
    while let Ok(n) = stream.read(&mut sink).await {
        if n == 0 {
            break;
        }
    }
}

/// ServerHello record with an x25519 key share, shaped the way the parser
/// in `stego::hello` expects.
pub(crate) fn build_server_hello(key_share: &PublicKey) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(128);
    body.put_u8(2); // ServerHello
    let length_at = body.len();
    body.put_slice(&[0, 0, 0]);

    body.put_u16(0x0303);
    body.put_slice(&SecureRandom::bytes::<32>());
    body.put_u8(0); // empty session id echo
    body.put_u16(0x1301); // TLS_AES_128_GCM_SHA256
    body.put_u8(0); // null compression

    body.put_u16(40); // extensions length: one key_share
    body.put_u16(0x0033);
    body.put_u16(36);
    body.put_u16(0x001d);
    body.put_u16(32);
    body.put_slice(key_share.as_bytes());

    let body_len = body.len() - 4;
    body[length_at] = ((body_len >> 16) & 0xff) as u8;
    body[length_at + 1] = ((body_len >> 8) & 0xff) as u8;
    body[length_at + 2] = (body_len & 0xff) as u8;

    let mut record = BytesMut::with_capacity(5 + body.len());
    record.put_u8(22); // handshake
    record.put_u16(0x0303);
    record.put_u16(body.len() as u16);
    record.put_slice(&body);
    record.to_vec()
}

/// Asset snapshot with ten v4 decoys and four v6 decoys.
pub(crate) fn test_bundle() -> AssetBundle {
    let mut decoys: Vec<Decoy> = (0u8..10)
        .map(|i| {
            Decoy::new(
                format!("decoy{i}.example.com"),
                Some(Ipv4Addr::new(10, 0, 0, i + 1)),
                None,
            )
        })
        .collect();
    for i in 0u16..4 {
        decoys.push(Decoy::new(
            format!("v6decoy{i}.example.com"),
            None,
            Some(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, i + 1)),
        ));
    }
    AssetBundle::new([0x42u8; 32], decoys, 1153)
}
