//! TCP dialing seam.
//!
//! Registration fan-out, the reachability probe, and the phantom dial all go
//! through [`Connector`], so tests can substitute network behavior without
//! touching process-wide state.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Object-safe byte stream returned from a dial.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

impl std::fmt::Debug for dyn Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxedConn")
    }
}

/// Owned connection handed across the API boundary.
pub type BoxedConn = Box<dyn Conn>;

/// Dials TCP connections on behalf of the protocol core.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `addr`.
    async fn connect(&self, addr: SocketAddr) -> io::Result<BoxedConn>;
}

/// The production connector: plain `tokio` TCP.
#[derive(Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: SocketAddr) -> io::Result<BoxedConn> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
