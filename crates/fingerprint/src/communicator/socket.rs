//! Raw TCP payload communicator

use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument};

use honeysift_common::{
    CommunicatorOptions, ProbeError, ProbeResult, Protocol, ProtocolCommunicator, SignatureStep,
    StepOutcome, StepRun,
};

use crate::matcher::matches_step;

/// One connection per signature set; each step is a write followed by a
/// single bounded read.
pub struct SocketCommunicator {
    connect_timeout: Duration,
    read_timeout: Duration,
    buffer_size: usize,
}

impl SocketCommunicator {
    pub fn new(options: &CommunicatorOptions) -> Self {
        Self {
            connect_timeout: options.connect_timeout(),
            read_timeout: options.read_timeout(),
            buffer_size: options.socket_read_buffer.max(1),
        }
    }

    async fn exchange(&self, stream: &mut TcpStream, payload: &[u8]) -> ProbeResult<Vec<u8>> {
        timeout(self.read_timeout, stream.write_all(payload))
            .await
            .map_err(|_| ProbeError::timeout("socket write"))??;

        let mut buf = vec![0u8; self.buffer_size];
        let n = timeout(self.read_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| ProbeError::timeout("socket read"))??;
        if n == 0 {
            return Err(ProbeError::ConnectionReset("peer closed the connection".into()));
        }
        buf.truncate(n);
        Ok(buf)
    }
}

#[async_trait]
impl ProtocolCommunicator for SocketCommunicator {
    #[instrument(skip(self, steps), fields(steps = steps.len()))]
    async fn execute(&self, host: IpAddr, port: u16, steps: &[SignatureStep]) -> StepRun {
        let addr = SocketAddr::new(host, port);
        let mut stream = match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return StepRun::failed(ProbeError::from(e)),
            Err(_) => return StepRun::failed(ProbeError::timeout(format!("connect to {addr}"))),
        };

        let mut outcomes = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            match self.exchange(&mut stream, step.input.as_bytes()).await {
                Ok(response) => {
                    let matched = matches_step(step, &response);
                    debug!("Socket step {}: {} bytes, matched={}", index, response.len(), matched);
                    outcomes.push(StepOutcome::new(index, matched, response));
                }
                Err(e) => return StepRun::aborted(outcomes, e),
            }
        }

        let _ = stream.shutdown().await;
        StepRun::completed(outcomes)
    }

    fn protocol(&self) -> Protocol {
        Protocol::Socket
    }
}
