//! Seams between engine components
//!
//! Every network-facing component sits behind one of these traits so the
//! orchestrator can be driven by real sockets or by in-process fakes.

use anyhow::Result;
use async_trait::async_trait;
use std::net::IpAddr;

use crate::error::{ProbeError, ProbeResult};
use crate::types::{
    CommunicationRecord, DetectionLogEntry, PortScanOutcome, PortState, Protocol, SignatureStep,
    StepRun,
};

/// Single-port reachability check.
#[async_trait]
pub trait PortProber: Send + Sync {
    /// One connection attempt; the answer is final, no retries.
    async fn probe(&self, ip: IpAddr, port: u16) -> PortState;

    /// Prober name/identifier
    fn name(&self) -> &str;
}

/// Runs an ordered signature sequence over one connection.
#[async_trait]
pub trait ProtocolCommunicator: Send + Sync {
    /// Execute `steps` in order against `host:port`.
    ///
    /// Never fails as a whole: a session that breaks mid-sequence returns the
    /// outcomes gathered so far together with the error that stopped it.
    async fn execute(&self, host: IpAddr, port: u16, steps: &[SignatureStep]) -> StepRun;

    /// Check that `host:port` speaks this protocol at all. Used on its own
    /// for signature sets that carry only custom probes.
    async fn prevalidate(&self, _host: IpAddr, _port: u16) -> ProbeResult<()> {
        Ok(())
    }

    fn protocol(&self) -> Protocol;
}

/// Picks the communicator for a protocol. Implementations must cover every variant.
pub trait CommunicatorSource: Send + Sync {
    fn communicator_for(&self, protocol: Protocol) -> &dyn ProtocolCommunicator;
}

/// Check that does not fit the request/response step format.
#[async_trait]
pub trait HeuristicProbe: Send + Sync {
    /// Score contributions, each in [0, 1]. An empty list means no signal.
    /// `protocol` is the protocol of the signature set that asked for the probe.
    async fn run(&self, host: IpAddr, port: u16, protocol: Protocol) -> Result<Vec<f64>, ProbeError>;

    /// Registry identifier
    fn id(&self) -> &str;

    /// Whether the probe can run against a service speaking `protocol`.
    fn supports(&self, _protocol: Protocol) -> bool {
        true
    }
}

/// Sink for detection and raw communication records.
#[async_trait]
pub trait DetectionLog: Send + Sync {
    async fn record_port_scan(&self, host: IpAddr, outcome: &PortScanOutcome) -> Result<()>;

    async fn record_exchange(&self, record: &CommunicationRecord) -> Result<()>;

    async fn record_detection(&self, entry: &DetectionLogEntry) -> Result<()>;

    /// Flush and release underlying resources at the end of a scan.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
