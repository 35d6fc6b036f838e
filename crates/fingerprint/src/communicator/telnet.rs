//! Telnet communicator
//!
//! Option negotiation is refused outright: every DO/DONT gets a WONT and
//! every WILL/WONT gets a DONT, leaving the server in plain NVT mode.

use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, instrument};

use honeysift_common::{
    CommunicatorOptions, ProbeError, ProbeResult, Protocol, ProtocolCommunicator, SignatureStep,
    StepRun,
};

use crate::shell::{run_shell_steps, ShellSession};

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    Iac,
    Option(u8),
    Sub,
    SubIac,
}

/// Strips telnet commands from the stream and produces refusal replies.
///
/// Keeps state between reads so a command split across segments is handled.
#[derive(Debug)]
pub struct TelnetDecoder {
    state: State,
}

impl TelnetDecoder {
    pub fn new() -> Self {
        Self { state: State::Data }
    }

    /// Append payload bytes to `data` and negotiation answers to `replies`.
    pub fn feed(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            self.state = match (self.state, byte) {
                (State::Data, IAC) => State::Iac,
                (State::Data, b) => {
                    data.push(b);
                    State::Data
                }
                (State::Iac, IAC) => {
                    data.push(IAC);
                    State::Data
                }
                (State::Iac, verb @ (DO | DONT | WILL | WONT)) => State::Option(verb),
                (State::Iac, SB) => State::Sub,
                (State::Iac, _) => State::Data,
                (State::Option(verb), option) => {
                    let answer = if verb == DO || verb == DONT { WONT } else { DONT };
                    replies.extend_from_slice(&[IAC, answer, option]);
                    State::Data
                }
                (State::Sub, IAC) => State::SubIac,
                (State::Sub, _) => State::Sub,
                (State::SubIac, SE) => State::Data,
                (State::SubIac, _) => State::Sub,
            };
        }
    }
}

impl Default for TelnetDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw telnet connection acting as a shell.
pub struct TelnetSession {
    stream: TcpStream,
    decoder: TelnetDecoder,
    io_timeout: Duration,
    read_limit: usize,
    closed: bool,
}

impl TelnetSession {
    pub async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        io_timeout: Duration,
        read_limit: usize,
    ) -> ProbeResult<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProbeError::timeout(format!("connect to {addr}")))??;
        Ok(Self {
            stream,
            decoder: TelnetDecoder::new(),
            io_timeout,
            read_limit,
            closed: false,
        })
    }
}

#[async_trait]
impl ShellSession for TelnetSession {
    async fn send(&mut self, data: &[u8]) -> ProbeResult<()> {
        if self.closed {
            return Err(ProbeError::ConnectionReset("telnet peer closed".into()));
        }
        timeout(self.io_timeout, self.stream.write_all(data))
            .await
            .map_err(|_| ProbeError::timeout("telnet write"))??;
        Ok(())
    }

    async fn read_settled(&mut self, settle: Duration) -> ProbeResult<Vec<u8>> {
        let deadline = Instant::now() + settle;
        let mut output = Vec::new();
        let mut buf = [0u8; 4096];

        while !self.closed && output.len() < self.read_limit {
            let n = match timeout_at(deadline, self.stream.read(&mut buf)).await {
                Err(_) => break,
                Ok(Ok(0)) => {
                    self.closed = true;
                    break;
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(ProbeError::from(e)),
            };

            let mut replies = Vec::new();
            self.decoder.feed(&buf[..n], &mut output, &mut replies);
            if !replies.is_empty() {
                debug!("Refusing {} telnet option(s)", replies.len() / 3);
                timeout(self.io_timeout, self.stream.write_all(&replies))
                    .await
                    .map_err(|_| ProbeError::timeout("telnet option reply"))??;
            }
        }

        if self.closed && output.is_empty() {
            return Err(ProbeError::ConnectionReset("telnet peer closed".into()));
        }
        output.truncate(self.read_limit);
        Ok(output)
    }

    async fn close(self: Box<Self>) {
        let mut session = self;
        let _ = timeout(session.io_timeout, session.stream.shutdown()).await;
    }
}

/// Sends each step's bytes verbatim and collects what the shell prints back.
pub struct TelnetCommunicator {
    connect_timeout: Duration,
    io_timeout: Duration,
    settle: Duration,
    read_limit: usize,
}

impl TelnetCommunicator {
    pub fn new(options: &CommunicatorOptions) -> Self {
        Self {
            connect_timeout: options.connect_timeout(),
            io_timeout: options.read_timeout(),
            settle: options.shell_settle(),
            read_limit: options.shell_read_limit,
        }
    }
}

#[async_trait]
impl ProtocolCommunicator for TelnetCommunicator {
    #[instrument(skip(self, steps), fields(steps = steps.len()))]
    async fn execute(&self, host: IpAddr, port: u16, steps: &[SignatureStep]) -> StepRun {
        let mut session = match TelnetSession::connect(
            SocketAddr::new(host, port),
            self.connect_timeout,
            self.io_timeout,
            self.read_limit,
        )
        .await
        {
            Ok(session) => session,
            Err(e) => return StepRun::failed(e),
        };

        let run = run_shell_steps(&mut session, steps, self.settle, false).await;
        Box::new(session).close().await;
        run
    }

    fn protocol(&self) -> Protocol {
        Protocol::Telnet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use honeysift_common::MatchType;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    #[test]
    fn decoder_strips_and_refuses_options() {
        let mut decoder = TelnetDecoder::new();
        let mut data = Vec::new();
        let mut replies = Vec::new();
        decoder.feed(
            &[IAC, DO, 24, b'l', b'o', IAC, WILL, 1, b'g', b'i', b'n', b':'],
            &mut data,
            &mut replies,
        );
        assert_eq!(data, b"login:");
        assert_eq!(replies, vec![IAC, WONT, 24, IAC, DONT, 1]);
    }

    #[test]
    fn decoder_handles_split_commands_and_subnegotiation() {
        let mut decoder = TelnetDecoder::new();
        let mut data = Vec::new();
        let mut replies = Vec::new();
        decoder.feed(&[b'a', IAC], &mut data, &mut replies);
        decoder.feed(&[DONT], &mut data, &mut replies);
        decoder.feed(&[31, b'b', IAC, SB, 24, 1, IAC, SE, b'c', IAC, IAC], &mut data, &mut replies);
        assert_eq!(data, vec![b'a', b'b', b'c', IAC]);
        assert_eq!(replies, vec![IAC, WONT, 31]);
    }

    #[tokio::test]
    async fn sends_input_verbatim_and_matches_output() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&[IAC, DO, 1]).await.unwrap();
            let mut received = Vec::new();
            let mut prompted = false;
            let mut buf = [0u8; 64];
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                if !prompted && received.windows(4).any(|w| w == b"root") {
                    prompted = true;
                    sock.write_all(b"Password: ").await.unwrap();
                }
            }
            received
        });

        let options = CommunicatorOptions {
            shell_settle_ms: 200,
            ..CommunicatorOptions::default()
        };
        let steps = vec![SignatureStep::new("root", "Password:", MatchType::Fuzzy, 0.4)];
        let run = TelnetCommunicator::new(&options)
            .execute(IpAddr::V4(Ipv4Addr::LOCALHOST), port, &steps)
            .await;

        assert!(run.is_complete());
        assert_eq!(run.matched_indices(), vec![0]);

        let received = server.await.unwrap();
        assert!(received.starts_with(b"root"));
        assert!(received.windows(3).any(|w| w == [IAC, WONT, 1]));
        assert!(!received.contains(&b'\n'));
    }

    #[tokio::test]
    async fn closed_port_fails_without_outcomes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let steps = vec![SignatureStep::new("root", "Password:", MatchType::Fuzzy, 0.4)];
        let run = TelnetCommunicator::new(&CommunicatorOptions::default())
            .execute(IpAddr::V4(Ipv4Addr::LOCALHOST), port, &steps)
            .await;

        assert!(run.outcomes.is_empty());
        assert!(matches!(run.termination, Some(ProbeError::ConnectionRefused(_))));
    }
}
