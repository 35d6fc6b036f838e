//! Banner grabbing functionality

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument};

use honeysift_common::{ProbeError, ProbeResult};

pub struct BannerGrabber {
    timeout: Duration,
    max_bytes: usize,
}

impl BannerGrabber {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_bytes: 1024,
        }
    }

    /// Connect and read whatever the service volunteers first.
    ///
    /// The connect and the read each get the full timeout.
    #[instrument(skip(self))]
    pub async fn grab(&self, ip: IpAddr, port: u16) -> ProbeResult<Vec<u8>> {
        let addr = SocketAddr::new(ip, port);
        let mut stream = timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProbeError::timeout(format!("connect to {addr}")))??;
        self.read_banner(&mut stream).await
    }

    /// Read a passive banner from an already connected stream.
    pub async fn read_banner(&self, stream: &mut TcpStream) -> ProbeResult<Vec<u8>> {
        let mut buf = vec![0u8; self.max_bytes];
        match timeout(self.timeout, stream.read(&mut buf)).await {
            Ok(Ok(0)) => Err(ProbeError::ConnectionReset("closed before banner".into())),
            Ok(Ok(n)) => {
                debug!("Passive banner grab: {} bytes", n);
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(ProbeError::from(e)),
            Err(_) => Err(ProbeError::timeout("banner read")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_banner_grabber_creation() {
        let grabber = BannerGrabber::new(Duration::from_secs(2));
        assert_eq!(grabber.timeout, Duration::from_secs(2));
        assert_eq!(grabber.max_bytes, 1024);
    }

    #[tokio::test]
    async fn grabs_ssh_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"SSH-2.0-OpenSSH_6.0p1 Debian-4+deb7u2\r\n").await.unwrap();
        });

        let banner = BannerGrabber::new(Duration::from_secs(1))
            .grab(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
            .await
            .unwrap();
        assert!(banner.starts_with(b"SSH-2.0"));
    }

    #[tokio::test]
    async fn silent_service_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let err = BannerGrabber::new(Duration::from_millis(200))
            .grab(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)));
    }
}
