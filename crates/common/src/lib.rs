//! Honeysift Common - Shared types and traits
//!
//! This crate provides the data model, error taxonomy, configuration and
//! component traits used across the honeysift workspace.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{
    CommunicatorOptions, EngineConfig, ScanOptions, ScoringMode, ScoringOptions,
    SessionIsolationOptions, TimingProbeOptions,
};
pub use error::{ConfigError, ProbeError, ProbeResult};
pub use traits::{CommunicatorSource, DetectionLog, HeuristicProbe, PortProber, ProtocolCommunicator};
pub use types::{
    CommunicationRecord, Credentials, DetectionLogEntry, DetectionResult, HoneypotMatch, MatchType,
    Payload, PortScanOutcome, PortState, Protocol, ScanReport, SignatureSet, SignatureStep,
    StepOutcome, StepRun,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
