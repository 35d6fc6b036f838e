// crates/scanner_tcp/src/scanner.rs
//! TCP connect prober

use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use honeysift_common::{PortProber, PortState};

/// Classifies a port with a single full TCP handshake.
///
/// Refused, reset, unreachable and timed-out attempts all classify the port
/// as closed. There are no retries: one attempt is authoritative.
pub struct TcpConnectProber {
    timeout: Duration,
}

impl TcpConnectProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connect timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for TcpConnectProber {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
        }
    }
}

#[async_trait]
impl PortProber for TcpConnectProber {
    async fn probe(&self, ip: IpAddr, port: u16) -> PortState {
        let addr = SocketAddr::new(ip, port);
        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => PortState::Open,
            Ok(Err(e)) => {
                match e.kind() {
                    ErrorKind::ConnectionRefused => trace!(%addr, "refused"),
                    kind => trace!(%addr, ?kind, "connect failed"),
                }
                PortState::Closed
            }
            Err(_) => {
                trace!(%addr, "connect timeout");
                PortState::Closed
            }
        }
    }

    fn name(&self) -> &str {
        "TCP Connect Prober"
    }
}
