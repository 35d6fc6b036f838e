//! Error types for the honeysift engine
//!
//! `ProbeError` separates the ways a single network probe can end so callers
//! can tell a closed port from a protocol error from a misconfiguration.
//! `ConfigError` covers signature and option validation.

use std::io::{self, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// Pre-validation showed the port does not run the expected service.
    #[error("service mismatch: {0}")]
    ServiceMismatch(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ProbeError {
    /// Map an I/O error onto the probe taxonomy.
    pub fn from_io(err: &io::Error) -> Self {
        let msg = err.to_string();
        match err.kind() {
            ErrorKind::ConnectionRefused => Self::ConnectionRefused(msg),
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::Timeout(msg),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Self::ConnectionReset(msg),
            ErrorKind::AddrNotAvailable | ErrorKind::NotConnected => Self::Unreachable(msg),
            ErrorKind::InvalidData => Self::ProtocolViolation(msg),
            _ => Self::Io(msg),
        }
    }

    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout(what.into())
    }

    pub fn protocol(what: impl Into<String>) -> Self {
        Self::ProtocolViolation(what.into())
    }

    /// Errors that carry no evidence and are not worth reporting as failures:
    /// the port was closed or filtered, or the service is simply not the one
    /// the signature targets.
    #[must_use]
    pub fn is_evidence_neutral(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused(_) | Self::Unreachable(_) | Self::ServiceMismatch(_)
        )
    }

    /// Short label used in structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionRefused(_) => "connection_refused",
            Self::Unreachable(_) => "unreachable",
            Self::Timeout(_) => "timeout",
            Self::ConnectionReset(_) => "connection_reset",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Configuration(_) => "configuration",
            Self::ServiceMismatch(_) => "service_mismatch",
            Self::Io(_) => "io",
        }
    }
}

impl From<io::Error> for ProbeError {
    fn from(err: io::Error) -> Self {
        Self::from_io(&err)
    }
}

/// Validation failures for signatures and engine options.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("honeypot name must not be empty")]
    EmptyName,

    #[error("honeypot '{honeypot}' has no steps and no custom probes")]
    NoEvidenceSources { honeypot: String },

    #[error("honeypot '{honeypot}' step {step}: weight {weight} outside [0, 1]")]
    WeightOutOfRange {
        honeypot: String,
        step: usize,
        weight: f64,
    },

    #[error("honeypot '{honeypot}': unknown custom probe '{probe}'")]
    UnknownProbe { honeypot: String, probe: String },

    #[error("honeypot '{honeypot}': probe '{probe}' does not apply to {protocol}")]
    ProbeProtocolMismatch {
        honeypot: String,
        probe: String,
        protocol: &'static str,
    },

    #[error("honeypot '{honeypot}' step {step}: {reason}")]
    InvalidHttpStep {
        honeypot: String,
        step: usize,
        reason: &'static str,
    },

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("invalid port range {start}-{end}")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("{name} {value} outside [0, 1]")]
    OutOfUnitRange { name: &'static str, value: f64 },
}

/// Result type alias for probe operations
pub type ProbeResult<T> = Result<T, ProbeError>;
