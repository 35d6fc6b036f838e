//! Core data types for the honeysift engine
//!
//! Signature definitions are read-only inputs owned by whoever loaded them;
//! everything else here is produced by a scan:
//! - `StepOutcome` / `StepRun` per executed signature sequence
//! - `DetectionResult` per (port, signature set) pair with evidence
//! - `HoneypotMatch` as the single terminal artifact of a scan

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::{ConfigError, ProbeError};

/// Protocol a signature set speaks. Each variant maps to exactly one communicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Http,
    Https,
    Telnet,
    Socket,
    Dicom,
}

impl Protocol {
    pub const ALL: [Protocol; 6] = [
        Protocol::Ssh,
        Protocol::Http,
        Protocol::Https,
        Protocol::Telnet,
        Protocol::Socket,
        Protocol::Dicom,
    ];

    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ssh => "ssh",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Telnet => "telnet",
            Protocol::Socket => "socket",
            Protocol::Dicom => "dicom",
        }
    }

    /// Interactive shell protocols, where a detected honeypot is handed over
    /// together with login credentials.
    #[inline]
    #[must_use]
    pub const fn is_session_oriented(&self) -> bool {
        matches!(self, Protocol::Ssh | Protocol::Telnet)
    }

    #[inline]
    #[must_use]
    pub const fn is_http(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a step's expected output is compared with the observed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Expected output occurs anywhere in the response.
    Fuzzy,
    /// Response equals the expected output byte for byte.
    Precise,
}

/// Step payload: text for line protocols, raw bytes for binary ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Binary(b) => b,
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Text(String::new())
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Binary(b)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(s) => f.write_str(s),
            Payload::Binary(b) => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

/// One request/response probe pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureStep {
    pub input: Payload,
    #[serde(rename = "output", alias = "expected_output")]
    pub expected_output: Payload,
    pub match_type: MatchType,
    #[serde(rename = "score", alias = "weight")]
    pub weight: f64,
    #[serde(default)]
    pub comment: String,
    /// HTTP only: `get` or `post`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// HTTP only: status code the response must carry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
}

impl SignatureStep {
    #[must_use]
    pub fn new(
        input: impl Into<Payload>,
        expected_output: impl Into<Payload>,
        match_type: MatchType,
        weight: f64,
    ) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            match_type,
            weight,
            comment: String::new(),
            method: None,
            response_code: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_http(mut self, method: impl Into<String>, response_code: u16) -> Self {
        self.method = Some(method.into());
        self.response_code = Some(response_code);
        self
    }

    /// Why this step cannot be issued as an HTTP request, if it cannot.
    pub fn http_request_problem(&self) -> Option<&'static str> {
        let method = self.method.as_deref().map(str::to_ascii_lowercase);
        if !matches!(method.as_deref(), Some("get" | "post")) {
            return Some("method must be get or post");
        }
        if self.response_code.is_none() {
            return Some("missing response code");
        }
        if !self.input.as_bytes().starts_with(b"/") {
            return Some("path must start with '/'");
        }
        None
    }
}

/// Ordered probe sequence identifying one honeypot product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureSet {
    #[serde(default)]
    pub name: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub steps: Vec<SignatureStep>,
    #[serde(default, alias = "custom_functions")]
    pub custom_probes: Vec<String>,
}

impl SignatureSet {
    #[must_use]
    pub fn new(name: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            protocol,
            steps: Vec::new(),
            custom_probes: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_step(mut self, step: SignatureStep) -> Self {
        self.steps.push(step);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_custom_probe(mut self, id: impl Into<String>) -> Self {
        self.custom_probes.push(id.into());
        self
    }

    /// Structural checks. Probe identifiers are checked against a registry
    /// separately since the common crate does not know which probes exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.steps.is_empty() && self.custom_probes.is_empty() {
            return Err(ConfigError::NoEvidenceSources {
                honeypot: self.name.clone(),
            });
        }
        for (step, s) in self.steps.iter().enumerate() {
            if !(0.0..=1.0).contains(&s.weight) {
                return Err(ConfigError::WeightOutOfRange {
                    honeypot: self.name.clone(),
                    step,
                    weight: s.weight,
                });
            }
        }
        Ok(())
    }

    /// Steps of an HTTP(S) set that can never be sent. The set stays usable;
    /// these steps are skipped at evaluation time.
    pub fn http_step_errors(&self) -> Vec<ConfigError> {
        if !self.protocol.is_http() {
            return Vec::new();
        }
        self.steps
            .iter()
            .enumerate()
            .filter_map(|(step, s)| {
                s.http_request_problem().map(|reason| ConfigError::InvalidHttpStep {
                    honeypot: self.name.clone(),
                    step,
                    reason,
                })
            })
            .collect()
    }
}

/// Open/closed classification of a probed port. Filtered and refused both count as closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortState {
    Open,
    Closed,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Result of sending one signature step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub matched: bool,
    pub raw_response: Vec<u8>,
    /// HTTP status code, when the step was an HTTP request.
    pub status_code: Option<u16>,
    /// The step was not sent because it was misconfigured.
    pub skipped: bool,
}

impl StepOutcome {
    #[inline]
    #[must_use]
    pub fn new(index: usize, matched: bool, raw_response: Vec<u8>) -> Self {
        Self {
            index,
            matched,
            raw_response,
            status_code: None,
            skipped: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Placeholder for a step that could not be sent; keeps outcome indices contiguous.
    #[inline]
    #[must_use]
    pub fn skipped(index: usize) -> Self {
        Self {
            index,
            matched: false,
            raw_response: Vec::new(),
            status_code: None,
            skipped: true,
        }
    }
}

/// Outcomes of one signature sequence plus the reason it stopped early, if it did.
///
/// `outcomes` is always a prefix of the signature's steps starting at index 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepRun {
    pub outcomes: Vec<StepOutcome>,
    pub termination: Option<ProbeError>,
}

impl StepRun {
    #[must_use]
    pub fn completed(outcomes: Vec<StepOutcome>) -> Self {
        Self {
            outcomes,
            termination: None,
        }
    }

    #[must_use]
    pub fn aborted(outcomes: Vec<StepOutcome>, error: ProbeError) -> Self {
        Self {
            outcomes,
            termination: Some(error),
        }
    }

    /// Nothing was sent: the session could not be established.
    #[must_use]
    pub fn failed(error: ProbeError) -> Self {
        Self::aborted(Vec::new(), error)
    }

    #[must_use]
    pub fn matched_indices(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| o.matched)
            .map(|o| o.index)
            .collect()
    }

    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.termination.is_none()
    }
}

/// Evidence gathered for one (port, signature set) evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub port: u16,
    pub honeypot: String,
    pub protocol: Protocol,
    pub matched_steps: Vec<usize>,
    pub matched_weights: Vec<f64>,
    pub matched_comments: Vec<String>,
    pub total_steps: usize,
    pub custom_contributions: Vec<f64>,
    pub confidence: f64,
}

impl DetectionResult {
    /// All evidence fed to the aggregator: matched step weights, then probe scores.
    #[must_use]
    pub fn evidence(&self) -> Vec<f64> {
        self.matched_weights
            .iter()
            .chain(self.custom_contributions.iter())
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("root", "1234")
    }
}

/// Identified honeypot handed to downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoneypotMatch {
    pub name: String,
    pub version: String,
    pub host: IpAddr,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

/// Result of a full port sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortScanOutcome {
    pub open: BTreeSet<u16>,
    pub probed: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// Everything a detection run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub host: IpAddr,
    pub open_ports: BTreeSet<u16>,
    pub results: Vec<DetectionResult>,
    pub best: Option<HoneypotMatch>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Raw exchange record for the communication log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationRecord {
    pub timestamp: DateTime<Utc>,
    pub host: IpAddr,
    pub port: u16,
    pub honeypot: String,
    pub step: usize,
    pub status_code: Option<u16>,
    pub response: String,
}

impl CommunicationRecord {
    #[must_use]
    pub fn from_outcome(host: IpAddr, port: u16, honeypot: &str, outcome: &StepOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            host,
            port,
            honeypot: honeypot.to_string(),
            step: outcome.index,
            status_code: outcome.status_code,
            response: String::from_utf8_lossy(&outcome.raw_response).into_owned(),
        }
    }
}

impl fmt::Display for CommunicationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(
                f,
                "Input index {} resulting output: status_code={}, body={:?}",
                self.step, code, self.response
            ),
            None => write!(f, "Input index {} resulting output: {:?}", self.step, self.response),
        }
    }
}

/// Per-scan entry for the detection log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub host: IpAddr,
    pub open_ports: BTreeSet<u16>,
    pub results: Vec<DetectionResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_serde_is_lowercase() {
        let p: Protocol = serde_json::from_str("\"dicom\"").unwrap();
        assert_eq!(p, Protocol::Dicom);
        assert_eq!(serde_json::to_string(&Protocol::Https).unwrap(), "\"https\"");
        assert!(serde_json::from_str::<Protocol>("\"ftp\"").is_err());
    }

    #[test]
    fn session_oriented_protocols() {
        assert!(Protocol::Ssh.is_session_oriented());
        assert!(Protocol::Telnet.is_session_oriented());
        assert!(!Protocol::Http.is_session_oriented());
        assert!(!Protocol::Dicom.is_session_oriented());
    }

    #[test]
    fn step_deserializes_signature_file_fields() {
        let json = r#"{
            "input": "/login",
            "output": "Welcome",
            "match_type": "fuzzy",
            "score": 0.4,
            "method": "get",
            "response_code": 200
        }"#;
        let step: SignatureStep = serde_json::from_str(json).unwrap();
        assert_eq!(step.input, Payload::Text("/login".into()));
        assert_eq!(step.weight, 0.4);
        assert_eq!(step.method.as_deref(), Some("get"));
        assert_eq!(step.response_code, Some(200));
        assert!(step.comment.is_empty());
    }

    #[test]
    fn binary_payloads_deserialize_from_byte_arrays() {
        let json = r#"{"input": [1, 2, 255], "output": "x", "match_type": "precise", "score": 1.0}"#;
        let step: SignatureStep = serde_json::from_str(json).unwrap();
        assert_eq!(step.input.as_bytes(), &[1u8, 2, 255]);
    }

    #[test]
    fn validate_rejects_out_of_range_weight() {
        let set = SignatureSet::new("cowrie", Protocol::Ssh)
            .with_step(SignatureStep::new("uname", "Linux", MatchType::Fuzzy, 1.5));
        assert!(matches!(
            set.validate(),
            Err(ConfigError::WeightOutOfRange { step: 0, .. })
        ));
    }

    #[test]
    fn validate_requires_evidence_source() {
        let set = SignatureSet::new("empty", Protocol::Socket);
        assert!(set.validate().is_err());

        let probe_only = SignatureSet::new("cowrie", Protocol::Ssh).with_custom_probe("session_isolation");
        assert!(probe_only.validate().is_ok());
    }

    #[test]
    fn unusable_http_steps_are_reported() {
        let set = SignatureSet::new("snare", Protocol::Http)
            .with_step(SignatureStep::new("/", "ok", MatchType::Fuzzy, 0.5).with_http("GET", 200))
            .with_step(SignatureStep::new("index.html", "ok", MatchType::Fuzzy, 0.5).with_http("get", 200))
            .with_step(SignatureStep::new("/", "ok", MatchType::Fuzzy, 0.5).with_http("delete", 200))
            .with_step(SignatureStep::new("/", "ok", MatchType::Fuzzy, 0.5));

        assert!(set.validate().is_ok());
        let steps: Vec<usize> = set
            .http_step_errors()
            .into_iter()
            .map(|e| match e {
                ConfigError::InvalidHttpStep { step, .. } => step,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(steps, vec![1, 2, 3]);

        let mut ssh = set.clone();
        ssh.protocol = Protocol::Ssh;
        assert!(ssh.http_step_errors().is_empty());
    }

    #[test]
    fn step_run_matched_indices() {
        let run = StepRun::aborted(
            vec![
                StepOutcome::new(0, true, b"a".to_vec()),
                StepOutcome::new(1, false, b"b".to_vec()),
                StepOutcome::new(2, true, b"c".to_vec()),
            ],
            ProbeError::timeout("read"),
        );
        assert_eq!(run.matched_indices(), vec![0, 2]);
        assert!(!run.is_complete());
    }

    #[test]
    fn communication_record_formats_http_status() {
        let outcome = StepOutcome::new(3, false, b"not found".to_vec()).with_status(404);
        let record = CommunicationRecord::from_outcome(
            IpAddr::from([127, 0, 0, 1]),
            80,
            "snare",
            &outcome,
        );
        let line = record.to_string();
        assert!(line.starts_with("Input index 3"));
        assert!(line.contains("status_code=404"));
    }
}
