//! Engine configuration
//!
//! Every group deserializes with defaults so a config file only needs the
//! values it overrides. Durations are stored in milliseconds.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::Credentials;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scan: ScanOptions,
    pub communicator: CommunicatorOptions,
    pub scoring: ScoringOptions,
    pub session_isolation: SessionIsolationOptions,
    pub timing: TimingProbeOptions,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scan.validate()?;
        self.scoring.validate()?;
        for (name, value) in [
            ("session isolation score", self.session_isolation.score),
            ("timing probe score", self.timing.score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { name, value });
            }
        }
        Ok(())
    }
}

/// Port sweep tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub connect_timeout_ms: u64,
    /// Number of concurrent connect workers.
    pub concurrency: usize,
    /// Connection attempts per second across all workers.
    pub rate_limit: Option<u32>,
    pub first_port: u16,
    pub last_port: u16,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            concurrency: 500,
            rate_limit: None,
            first_port: 1,
            last_port: 65_535,
        }
    }
}

impl ScanOptions {
    /// Fast preset: short timeout, wide pool. Suited to LAN targets.
    #[inline]
    #[must_use]
    pub fn fast() -> Self {
        Self {
            connect_timeout_ms: 800,
            concurrency: 2_000,
            ..Self::default()
        }
    }

    /// Thorough preset: generous timeout, narrow pool, paced.
    #[inline]
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            concurrency: 100,
            rate_limit: Some(500),
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn ports(&self) -> RangeInclusive<u16> {
        self.first_port..=self.last_port
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.first_port == 0 || self.first_port > self.last_port {
            return Err(ConfigError::InvalidPortRange {
                start: self.first_port,
                end: self.last_port,
            });
        }
        Ok(())
    }
}

/// Timeouts and identities used by the protocol communicators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicatorOptions {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub socket_read_buffer: usize,
    pub ssh_banner_timeout_ms: u64,
    pub ssh_auth_timeout_ms: u64,
    /// Wait after each shell command before collecting output.
    pub shell_settle_ms: u64,
    pub shell_read_limit: usize,
    pub http_timeout_ms: u64,
    pub http_body_limit: usize,
    pub default_credentials: Credentials,
    pub dicom_calling_ae: String,
    pub dicom_called_ae: String,
    pub dicom_acse_timeout_ms: u64,
    pub dicom_dimse_timeout_ms: u64,
}

impl Default for CommunicatorOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            read_timeout_ms: 3_000,
            socket_read_buffer: 4_096,
            ssh_banner_timeout_ms: 2_000,
            ssh_auth_timeout_ms: 4_000,
            shell_settle_ms: 2_000,
            shell_read_limit: 9_999,
            http_timeout_ms: 5_000,
            http_body_limit: 1024 * 1024,
            default_credentials: Credentials::default(),
            dicom_calling_ae: "ANY-SCU".to_string(),
            dicom_called_ae: "ANY-SCP".to_string(),
            dicom_acse_timeout_ms: 2_000,
            dicom_dimse_timeout_ms: 5_000,
        }
    }
}

impl CommunicatorOptions {
    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[inline]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    #[inline]
    pub fn ssh_banner_timeout(&self) -> Duration {
        Duration::from_millis(self.ssh_banner_timeout_ms)
    }

    #[inline]
    pub fn ssh_auth_timeout(&self) -> Duration {
        Duration::from_millis(self.ssh_auth_timeout_ms)
    }

    #[inline]
    pub fn shell_settle(&self) -> Duration {
        Duration::from_millis(self.shell_settle_ms)
    }

    #[inline]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    #[inline]
    pub fn dicom_acse_timeout(&self) -> Duration {
        Duration::from_millis(self.dicom_acse_timeout_ms)
    }

    #[inline]
    pub fn dicom_dimse_timeout(&self) -> Duration {
        Duration::from_millis(self.dicom_dimse_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoringMode {
    /// Noisy-OR passed through a logistic curve.
    Logistic,
    /// Plain noisy-OR.
    NoisyOr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringOptions {
    pub mode: ScoringMode,
    pub steepness: f64,
    pub midpoint: f64,
    /// Minimum confidence for a result to become a match.
    pub threshold: f64,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self {
            mode: ScoringMode::Logistic,
            steepness: 10.0,
            midpoint: 0.5,
            threshold: 0.5,
        }
    }
}

impl ScoringOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::OutOfUnitRange {
                name: "threshold",
                value: self.threshold,
            });
        }
        if !(0.0..=1.0).contains(&self.midpoint) {
            return Err(ConfigError::OutOfUnitRange {
                name: "midpoint",
                value: self.midpoint,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionIsolationOptions {
    pub settle_ms: u64,
    pub score: f64,
    pub marker_prefix: String,
}

impl Default for SessionIsolationOptions {
    fn default() -> Self {
        Self {
            settle_ms: 2_000,
            score: 0.85,
            marker_prefix: "IsThisAHoneypot".to_string(),
        }
    }
}

impl SessionIsolationOptions {
    #[inline]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Latency fingerprint of an HTTP service that answers missing resources
/// on a characteristic delay schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingProbeOptions {
    pub path_prefix: String,
    /// Expected latency of each successive request.
    pub reference_ms: Vec<u64>,
    pub tolerance_ms: u64,
    pub request_timeout_ms: u64,
    pub max_consecutive_timeouts: usize,
    pub score: f64,
}

impl Default for TimingProbeOptions {
    fn default() -> Self {
        Self {
            path_prefix: "/hs-missing-".to_string(),
            reference_ms: vec![1_000, 1_000, 1_000, 1_000, 1_000],
            tolerance_ms: 250,
            request_timeout_ms: 5_000,
            max_consecutive_timeouts: 2,
            score: 0.6,
        }
    }
}

impl TimingProbeOptions {
    #[inline]
    pub fn reference(&self) -> Vec<Duration> {
        self.reference_ms.iter().map(|ms| Duration::from_millis(*ms)).collect()
    }

    #[inline]
    pub fn tolerance(&self) -> Duration {
        Duration::from_millis(self.tolerance_ms)
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
