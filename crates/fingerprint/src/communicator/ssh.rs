//! SSH shell communicator

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, instrument};

use honeysift_common::{
    CommunicatorOptions, Credentials, ProbeError, ProbeResult, Protocol, ProtocolCommunicator,
    SignatureStep, StepRun,
};
use honeysift_scanner_tcp::BannerGrabber;

use crate::shell::{run_shell_steps, ShellConnector, ShellSession};

/// Host keys are never verified: honeypots regenerate them freely.
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

fn map_ssh_error(err: russh::Error) -> ProbeError {
    match err {
        russh::Error::IO(e) => ProbeError::from(e),
        russh::Error::Disconnect => ProbeError::ConnectionReset("ssh peer disconnected".into()),
        other => ProbeError::protocol(other.to_string()),
    }
}

/// Protocol version and software of an SSH identification line.
pub fn parse_identification(banner: &[u8]) -> Option<(String, String)> {
    static IDENT_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"SSH-(\d+\.\d+)-([^\s\r\n]+)").unwrap());

    IDENT_RE.captures(banner).map(|caps| {
        let version = String::from_utf8_lossy(&caps[1]).into_owned();
        let software = String::from_utf8_lossy(&caps[2]).into_owned();
        (version, software)
    })
}

/// Interactive PTY shell over an authenticated SSH connection.
pub struct SshShell {
    handle: Handle<AcceptAnyHostKey>,
    channel: Channel<Msg>,
    io_timeout: Duration,
    read_limit: usize,
    closed: bool,
}

impl SshShell {
    pub async fn open(
        addr: SocketAddr,
        credentials: &Credentials,
        auth_timeout: Duration,
        io_timeout: Duration,
        read_limit: usize,
    ) -> ProbeResult<Self> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        });

        let mut handle = timeout(auth_timeout, client::connect(config, addr, AcceptAnyHostKey))
            .await
            .map_err(|_| ProbeError::timeout(format!("ssh handshake with {addr}")))?
            .map_err(map_ssh_error)?;

        let authenticated = timeout(
            auth_timeout,
            handle.authenticate_password(credentials.username.clone(), credentials.password.clone()),
        )
        .await
        .map_err(|_| ProbeError::timeout("ssh authentication"))?
        .map_err(map_ssh_error)?;

        if !authenticated {
            return Err(ProbeError::protocol(format!(
                "password rejected for user '{}'",
                credentials.username
            )));
        }

        let channel = timeout(io_timeout, handle.channel_open_session())
            .await
            .map_err(|_| ProbeError::timeout("ssh session channel open"))?
            .map_err(map_ssh_error)?;
        timeout(io_timeout, channel.request_pty(false, "xterm", 80, 24, 0, 0, &[]))
            .await
            .map_err(|_| ProbeError::timeout("ssh pty request"))?
            .map_err(map_ssh_error)?;
        timeout(io_timeout, channel.request_shell(false))
            .await
            .map_err(|_| ProbeError::timeout("ssh shell request"))?
            .map_err(map_ssh_error)?;

        Ok(Self {
            handle,
            channel,
            io_timeout,
            read_limit,
            closed: false,
        })
    }
}

#[async_trait]
impl ShellSession for SshShell {
    async fn send(&mut self, data: &[u8]) -> ProbeResult<()> {
        if self.closed {
            return Err(ProbeError::ConnectionReset("ssh channel closed".into()));
        }
        timeout(self.io_timeout, self.channel.data(data))
            .await
            .map_err(|_| ProbeError::timeout("ssh channel write"))?
            .map_err(map_ssh_error)
    }

    async fn read_settled(&mut self, settle: Duration) -> ProbeResult<Vec<u8>> {
        let deadline = Instant::now() + settle;
        let mut output = Vec::new();

        while !self.closed {
            match timeout_at(deadline, self.channel.wait()).await {
                Err(_) => break,
                Ok(None) | Ok(Some(ChannelMsg::Eof)) | Ok(Some(ChannelMsg::Close)) => {
                    self.closed = true;
                }
                Ok(Some(ChannelMsg::Data { ref data }))
                | Ok(Some(ChannelMsg::ExtendedData { ref data, .. })) => {
                    // Past the limit the rest of the window is drained and dropped
                    // so it cannot leak into the next step's response.
                    let room = self.read_limit.saturating_sub(output.len());
                    output.extend_from_slice(&data[..data.len().min(room)]);
                }
                Ok(Some(_)) => {}
            }
        }

        if self.closed && output.is_empty() {
            return Err(ProbeError::ConnectionReset("ssh channel closed".into()));
        }
        Ok(output)
    }

    async fn close(self: Box<Self>) {
        let _ = timeout(self.io_timeout, self.channel.eof()).await;
        let _ = timeout(
            self.io_timeout,
            self.handle.disconnect(Disconnect::ByApplication, "", "English"),
        )
        .await;
    }
}

/// Opens password-authenticated SSH shells.
#[derive(Debug, Clone)]
pub struct SshConnector {
    credentials: Credentials,
    auth_timeout: Duration,
    io_timeout: Duration,
    read_limit: usize,
}

impl SshConnector {
    pub fn new(options: &CommunicatorOptions) -> Self {
        Self {
            credentials: options.default_credentials.clone(),
            auth_timeout: options.ssh_auth_timeout(),
            io_timeout: options.read_timeout(),
            read_limit: options.shell_read_limit,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }
}

#[async_trait]
impl ShellConnector for SshConnector {
    async fn connect(&self, host: IpAddr, port: u16) -> ProbeResult<Box<dyn ShellSession>> {
        let shell = SshShell::open(
            SocketAddr::new(host, port),
            &self.credentials,
            self.auth_timeout,
            self.io_timeout,
            self.read_limit,
        )
        .await?;
        Ok(Box::new(shell))
    }
}

/// Runs signature steps as command lines in an SSH shell.
pub struct SshCommunicator {
    banner: BannerGrabber,
    connector: SshConnector,
    settle: Duration,
}

impl SshCommunicator {
    pub fn new(options: &CommunicatorOptions) -> Self {
        Self {
            banner: BannerGrabber::new(options.ssh_banner_timeout()),
            connector: SshConnector::new(options),
            settle: options.shell_settle(),
        }
    }
}

#[async_trait]
impl ProtocolCommunicator for SshCommunicator {
    #[instrument(skip(self, steps), fields(steps = steps.len()))]
    async fn execute(&self, host: IpAddr, port: u16, steps: &[SignatureStep]) -> StepRun {
        if let Err(e) = self.prevalidate(host, port).await {
            return StepRun::failed(e);
        }

        let mut session = match self.connector.connect(host, port).await {
            Ok(session) => session,
            Err(e) => return StepRun::failed(e),
        };
        info!("SSH shell open on {}:{}", host, port);

        let run = run_shell_steps(session.as_mut(), steps, self.settle, true).await;
        session.close().await;
        run
    }

    /// Cheap check that the port speaks SSH before paying for a handshake.
    async fn prevalidate(&self, host: IpAddr, port: u16) -> ProbeResult<()> {
        let banner = self.banner.grab(host, port).await.map_err(|e| match e {
            ProbeError::ConnectionRefused(_) | ProbeError::Unreachable(_) => e,
            other => ProbeError::ServiceMismatch(format!("no ssh banner: {other}")),
        })?;

        match parse_identification(&banner) {
            Some((version, software)) => {
                debug!("SSH-{} server on port {}: {}", version, port, software);
                Ok(())
            }
            None => Err(ProbeError::ServiceMismatch(format!(
                "port {port} does not present an ssh identification string"
            ))),
        }
    }

    fn protocol(&self) -> Protocol {
        Protocol::Ssh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use honeysift_common::MatchType;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn identification_parsing() {
        let (version, software) =
            parse_identification(b"SSH-2.0-OpenSSH_6.0p1 Debian-4+deb7u2\r\n").unwrap();
        assert_eq!(version, "2.0");
        assert_eq!(software, "OpenSSH_6.0p1");

        assert!(parse_identification(b"SSH-1.99-Cisco-1.25\r\n").is_some());
        assert!(parse_identification(b"HTTP/1.1 400 Bad Request\r\n").is_none());
        assert!(parse_identification(b"").is_none());
    }

    #[tokio::test]
    async fn non_ssh_service_is_a_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"220 ProFTPD 1.3.5 Server ready\r\n").await.unwrap();
        });

        let communicator = SshCommunicator::new(&CommunicatorOptions::default());
        let steps = vec![SignatureStep::new("uname -a", "Linux", MatchType::Fuzzy, 0.5)];
        let run = communicator
            .execute(IpAddr::V4(Ipv4Addr::LOCALHOST), port, &steps)
            .await;

        assert!(run.outcomes.is_empty());
        assert!(matches!(run.termination, Some(ProbeError::ServiceMismatch(_))));
    }

    /// Minimal shell server: accepts any password and answers a few commands.
    mod server {
        use async_trait::async_trait;
        use russh::server::{self, Auth, Msg, Session};
        use russh::{Channel, ChannelId, CryptoVec};
        use std::net::SocketAddr;
        use std::sync::Arc;
        use tokio::net::TcpListener;

        #[derive(Clone)]
        pub struct ShellServer;

        impl server::Server for ShellServer {
            type Handler = Self;

            fn new_client(&mut self, _peer_addr: Option<SocketAddr>) -> Self {
                self.clone()
            }
        }

        #[async_trait]
        impl server::Handler for ShellServer {
            type Error = russh::Error;

            async fn auth_password(&mut self, _user: &str, _password: &str) -> Result<Auth, Self::Error> {
                Ok(Auth::Accept)
            }

            async fn channel_open_session(
                &mut self,
                _channel: Channel<Msg>,
                _session: &mut Session,
            ) -> Result<bool, Self::Error> {
                Ok(true)
            }

            async fn data(
                &mut self,
                channel: ChannelId,
                data: &[u8],
                session: &mut Session,
            ) -> Result<(), Self::Error> {
                let line = String::from_utf8_lossy(data).trim().to_string();
                match line.as_str() {
                    "uname -a" => {
                        let _ = session.data(
                            channel,
                            CryptoVec::from_slice(b"Linux svr04 3.2.0-4-amd64 #1 SMP Debian\r\nroot@svr04:~# "),
                        );
                    }
                    "flood" => {
                        let _ = session.data(channel, CryptoVec::from_slice(&[b'A'; 8192]));
                    }
                    "exit" => {
                        let _ = session.close(channel);
                    }
                    _ => {
                        let _ = session.data(channel, CryptoVec::from_slice(data));
                    }
                }
                Ok(())
            }
        }

        pub async fn spawn() -> u16 {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let config = Arc::new(server::Config {
                keys: vec![russh_keys::key::KeyPair::generate_ed25519().unwrap()],
                ..Default::default()
            });
            tokio::spawn(async move {
                let mut server = ShellServer;
                let _ = server::Server::run_on_socket(&mut server, config, &listener).await;
            });
            port
        }
    }

    fn fast_options() -> CommunicatorOptions {
        CommunicatorOptions {
            shell_settle_ms: 300,
            ..CommunicatorOptions::default()
        }
    }

    #[tokio::test]
    async fn shell_steps_run_over_real_ssh() {
        let port = server::spawn().await;
        let steps = vec![
            SignatureStep::new("uname -a", "svr04 3.2.0-4-amd64", MatchType::Fuzzy, 0.5),
            SignatureStep::new("echo hello", "echo hello", MatchType::Fuzzy, 0.5),
            SignatureStep::new("id", "uid=0(root)", MatchType::Fuzzy, 0.3),
        ];

        let run = SshCommunicator::new(&fast_options())
            .execute(IpAddr::V4(Ipv4Addr::LOCALHOST), port, &steps)
            .await;

        assert!(run.is_complete(), "{:?}", run.termination);
        assert_eq!(run.outcomes.len(), 3);
        assert_eq!(run.outcomes[0].index, 0);
        assert!(run.outcomes[0].matched);
        assert!(run.outcomes[0].raw_response.starts_with(b"Linux svr04"));
        assert!(run.outcomes[1].matched);
        assert!(!run.outcomes[2].matched);
        assert_eq!(run.matched_indices(), vec![0, 1]);
    }

    #[tokio::test]
    async fn output_past_the_read_limit_is_discarded() {
        let port = server::spawn().await;
        let options = CommunicatorOptions {
            shell_read_limit: 64,
            ..fast_options()
        };
        let steps = vec![
            SignatureStep::new("flood", "A", MatchType::Fuzzy, 0.5),
            SignatureStep::new("echo tail", "echo tail", MatchType::Precise, 0.5),
        ];

        let run = SshCommunicator::new(&options)
            .execute(IpAddr::V4(Ipv4Addr::LOCALHOST), port, &steps)
            .await;

        assert!(run.is_complete(), "{:?}", run.termination);
        assert_eq!(run.outcomes[0].raw_response.len(), 64);
        assert_eq!(run.outcomes[1].raw_response, b"echo tail\n".to_vec());
    }

    #[tokio::test]
    async fn closed_channel_aborts_remaining_steps() {
        let port = server::spawn().await;
        let steps = vec![
            SignatureStep::new("echo one", "one", MatchType::Fuzzy, 0.5),
            SignatureStep::new("exit", "logout", MatchType::Fuzzy, 0.5),
            SignatureStep::new("echo two", "two", MatchType::Fuzzy, 0.5),
        ];

        let run = SshCommunicator::new(&fast_options())
            .execute(IpAddr::V4(Ipv4Addr::LOCALHOST), port, &steps)
            .await;

        assert_eq!(run.outcomes.len(), 1);
        assert!(run.outcomes[0].matched);
        assert!(matches!(run.termination, Some(ProbeError::ConnectionReset(_))));
    }

    #[tokio::test]
    async fn silent_service_is_a_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let options = CommunicatorOptions {
            ssh_banner_timeout_ms: 200,
            ..CommunicatorOptions::default()
        };
        let run = SshCommunicator::new(&options)
            .execute(IpAddr::V4(Ipv4Addr::LOCALHOST), port, &[])
            .await;

        assert!(matches!(run.termination, Some(ProbeError::ServiceMismatch(_))));
    }
}
