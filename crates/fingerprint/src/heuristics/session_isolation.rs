//! Session isolation probe
//!
//! Some shell honeypots give every login a private in-memory filesystem.
//! A file created in one session is then invisible from a second session
//! opened at the same time, which a real host never does.

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;
use tracing::{debug, info, instrument};

use honeysift_common::{HeuristicProbe, ProbeError, Protocol, SessionIsolationOptions};

use crate::shell::{ShellConnector, ShellSession};

pub const SESSION_ISOLATION: &str = "session_isolation";

pub struct SessionIsolationProbe {
    connector: Arc<dyn ShellConnector>,
    options: SessionIsolationOptions,
}

impl SessionIsolationProbe {
    pub fn new(connector: Arc<dyn ShellConnector>, options: SessionIsolationOptions) -> Self {
        Self { connector, options }
    }

    fn marker(&self) -> String {
        format!("{}-{}.honeypot", self.options.marker_prefix, Uuid::new_v4().simple())
    }

    async fn list(&self, session: &mut dyn ShellSession) -> Result<Vec<u8>, ProbeError> {
        session.send(b"ls\n").await?;
        session.read_settled(self.options.settle()).await
    }

    async fn compare_views(
        &self,
        a: &mut dyn ShellSession,
        b: &mut dyn ShellSession,
        marker: &str,
    ) -> Result<(bool, bool), ProbeError> {
        a.send(format!("touch {marker}\n").as_bytes()).await?;
        a.read_settled(self.options.settle()).await?;

        let (listing_a, listing_b) = tokio::try_join!(self.list(a), self.list(b))?;
        let needle = marker.as_bytes();
        let seen = |listing: &[u8]| listing.windows(needle.len()).any(|w| w == needle);
        let visible = (seen(&listing_a), seen(&listing_b));

        let _ = a.send(format!("rm -f {marker}\n").as_bytes()).await;
        Ok(visible)
    }
}

#[async_trait]
impl HeuristicProbe for SessionIsolationProbe {
    #[instrument(skip(self))]
    async fn run(&self, host: IpAddr, port: u16, _protocol: Protocol) -> Result<Vec<f64>, ProbeError> {
        let (mut a, mut b) = tokio::try_join!(
            self.connector.connect(host, port),
            self.connector.connect(host, port)
        )?;

        let marker = self.marker();
        let result = self.compare_views(a.as_mut(), b.as_mut(), &marker).await;
        a.close().await;
        b.close().await;

        let (in_a, in_b) = result?;
        debug!("Marker {} visible: creator={}, second={}", marker, in_a, in_b);
        if in_a && !in_b {
            info!("Sessions on {}:{} do not share a filesystem", host, port);
            Ok(vec![self.options.score])
        } else {
            Ok(Vec::new())
        }
    }

    fn id(&self) -> &str {
        SESSION_ISOLATION
    }

    /// The connector opens SSH shells only.
    fn supports(&self, protocol: Protocol) -> bool {
        protocol == Protocol::Ssh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::fake::FakeConnector;
    use async_trait::async_trait;
    use honeysift_common::ProbeResult;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn options() -> SessionIsolationOptions {
        SessionIsolationOptions {
            settle_ms: 0,
            ..SessionIsolationOptions::default()
        }
    }

    #[tokio::test]
    async fn isolated_sessions_contribute_score() {
        let probe = SessionIsolationProbe::new(Arc::new(FakeConnector::isolated()), options());
        assert_eq!(probe.run(HOST, 22, Protocol::Ssh).await.unwrap(), vec![0.85]);
    }

    #[tokio::test]
    async fn shared_filesystem_contributes_nothing() {
        let probe = SessionIsolationProbe::new(Arc::new(FakeConnector::shared()), options());
        assert!(probe.run(HOST, 22, Protocol::Ssh).await.unwrap().is_empty());
    }

    #[test]
    fn only_ssh_is_supported() {
        let probe = SessionIsolationProbe::new(Arc::new(FakeConnector::shared()), options());
        assert!(probe.supports(Protocol::Ssh));
        assert!(!probe.supports(Protocol::Telnet));
        assert!(!probe.supports(Protocol::Http));
    }

    #[tokio::test]
    async fn markers_are_unique() {
        let probe = SessionIsolationProbe::new(Arc::new(FakeConnector::shared()), options());
        let first = probe.marker();
        assert!(first.starts_with("IsThisAHoneypot-"));
        assert!(first.ends_with(".honeypot"));
        assert_ne!(first, probe.marker());
    }

    struct Unreachable;

    #[async_trait]
    impl ShellConnector for Unreachable {
        async fn connect(&self, _host: IpAddr, _port: u16) -> ProbeResult<Box<dyn ShellSession>> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(ProbeError::ConnectionRefused("nothing listening".into()))
        }
    }

    #[tokio::test]
    async fn connection_failure_is_an_error() {
        let probe = SessionIsolationProbe::new(Arc::new(Unreachable), options());
        assert!(matches!(
            probe.run(HOST, 22, Protocol::Ssh).await,
            Err(ProbeError::ConnectionRefused(_))
        ));
    }
}
