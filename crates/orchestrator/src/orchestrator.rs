// crates/orchestrator/src/orchestrator.rs
//! Detection orchestrator - port scan, signature evaluation and match selection

use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use honeysift_common::{
    CommunicationRecord, CommunicatorSource, ConfigError, Credentials, DetectionLog,
    DetectionLogEntry, DetectionResult, EngineConfig, HoneypotMatch, ProbeError, ScanReport,
    SignatureSet, StepRun,
};
use honeysift_fingerprint::{Communicators, ProbeRegistry, ScoreAggregator};

use crate::port_scanner::PortScanner;

/// Version reported when a honeypot has no entry in the version table.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Runs a complete detection against one host.
///
/// Signature sets are evaluated in the order given, on every open port in
/// ascending order. That order also decides ties between equally confident
/// results.
pub struct DetectionOrchestrator {
    signatures: Vec<SignatureSet>,
    versions: HashMap<String, String>,
    scanner: PortScanner,
    ports: RangeInclusive<u16>,
    communicators: Arc<dyn CommunicatorSource>,
    probes: ProbeRegistry,
    aggregator: ScoreAggregator,
    threshold: f64,
    credentials: Credentials,
    log: Arc<dyn DetectionLog>,
    config_errors: Vec<ConfigError>,
}

impl DetectionOrchestrator {
    /// Orchestrator wired to real network communicators and the built-in probes.
    pub fn new(
        config: &EngineConfig,
        signatures: Vec<SignatureSet>,
        log: Arc<dyn DetectionLog>,
    ) -> Result<Self> {
        config.validate()?;
        let communicators = Arc::new(Communicators::new(&config.communicator)?);
        let probes = ProbeRegistry::with_defaults(config)?;
        let scanner = PortScanner::from_options(&config.scan, log.clone());
        Ok(Self::from_parts(config, signatures, scanner, communicators, probes, log))
    }

    /// Assemble from explicit components.
    ///
    /// Invalid signature sets are dropped. Unusable probe references and
    /// HTTP steps are recorded and skipped at evaluation. All of these are
    /// reported here, once.
    pub fn from_parts(
        config: &EngineConfig,
        signatures: Vec<SignatureSet>,
        scanner: PortScanner,
        communicators: Arc<dyn CommunicatorSource>,
        probes: ProbeRegistry,
        log: Arc<dyn DetectionLog>,
    ) -> Self {
        let mut config_errors = Vec::new();
        let signatures: Vec<SignatureSet> = signatures
            .into_iter()
            .filter(|set| match set.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("Ignoring signature set: {}", e);
                    config_errors.push(e);
                    false
                }
            })
            .collect();

        for error in probes.validate(&signatures) {
            warn!("{}; probe will be skipped", error);
            config_errors.push(error);
        }
        for error in signatures.iter().flat_map(SignatureSet::http_step_errors) {
            warn!("{}; step will be skipped", error);
            config_errors.push(error);
        }

        info!(
            "Loaded {} signature sets, probes: {:?}",
            signatures.len(),
            probes.ids()
        );

        Self {
            signatures,
            versions: HashMap::new(),
            scanner,
            ports: config.scan.ports(),
            communicators,
            probes,
            aggregator: ScoreAggregator::new(&config.scoring),
            threshold: config.scoring.threshold,
            credentials: config.communicator.default_credentials.clone(),
            log,
            config_errors,
        }
    }

    /// Static honeypot name to product version table.
    #[inline]
    #[must_use]
    pub fn with_versions(mut self, versions: HashMap<String, String>) -> Self {
        self.versions = versions;
        self
    }

    /// Credentials handed over with session-oriented matches.
    #[inline]
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn signatures(&self) -> &[SignatureSet] {
        &self.signatures
    }

    /// Configuration problems found at construction.
    pub fn configuration_errors(&self) -> &[ConfigError] {
        &self.config_errors
    }

    /// Scan `host` and return the best match, if any clears the threshold.
    pub async fn detect(&self, host: IpAddr, cancel: &CancellationToken) -> Result<Option<HoneypotMatch>> {
        Ok(self.scan(host, cancel).await?.best)
    }

    /// Full detection run. Cancellation stops further evaluation and returns
    /// what was collected so far, flagged as cancelled.
    #[instrument(skip(self, cancel))]
    pub async fn scan(&self, host: IpAddr, cancel: &CancellationToken) -> Result<ScanReport> {
        let started_at = Utc::now();
        let port_scan = self.scanner.scan(host, self.ports.clone(), cancel).await?;
        let mut cancelled = port_scan.cancelled;
        info!("Open ports on {}: {:?}", host, port_scan.open);

        let mut results = Vec::new();
        'ports: for &port in &port_scan.open {
            debug!("Matching signatures for port {}", port);
            for set in &self.signatures {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'ports;
                }
                let evaluation = tokio::select! {
                    () = cancel.cancelled() => {
                        cancelled = true;
                        break 'ports;
                    }
                    evaluation = self.evaluate(host, port, set) => evaluation,
                };
                if let Some(result) = evaluation {
                    results.push(result);
                }
            }
        }

        let entry = DetectionLogEntry {
            timestamp: Utc::now(),
            host,
            open_ports: port_scan.open.clone(),
            results: results.clone(),
        };
        if let Err(e) = self.log.record_detection(&entry).await {
            warn!("Failed to record detection: {:#}", e);
        }

        let best = self.select_best(host, &results);
        match &best {
            Some(m) => info!("Identified {} {} on {}:{}", m.name, m.version, host, m.port),
            None => info!("No honeypot identified on {}", host),
        }

        Ok(ScanReport {
            host,
            open_ports: port_scan.open,
            results,
            best,
            cancelled,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Evaluate one signature set against one port.
    ///
    /// Returns `None` when nothing matched and no probe contributed.
    async fn evaluate(&self, host: IpAddr, port: u16, set: &SignatureSet) -> Option<DetectionResult> {
        let communicator = self.communicators.communicator_for(set.protocol);
        let run = if set.steps.is_empty() {
            match communicator.prevalidate(host, port).await {
                Ok(()) => StepRun::default(),
                Err(e) => StepRun::failed(e),
            }
        } else {
            communicator.execute(host, port, &set.steps).await
        };

        for outcome in run.outcomes.iter().filter(|o| !o.skipped) {
            let record = CommunicationRecord::from_outcome(host, port, &set.name, outcome);
            if let Err(e) = self.log.record_exchange(&record).await {
                warn!("Failed to record exchange: {:#}", e);
            }
        }

        match &run.termination {
            Some(e) if e.is_evidence_neutral() => {
                debug!("{} on port {}: {}", set.name, port, e);
            }
            Some(e) => warn!("{} on port {} stopped early ({}): {}", set.name, port, e.kind(), e),
            None => {}
        }

        let mut matched_steps = Vec::new();
        let mut matched_weights = Vec::new();
        let mut matched_comments = Vec::new();
        for outcome in run.outcomes.iter().filter(|o| o.matched) {
            if let Some(step) = set.steps.get(outcome.index) {
                matched_steps.push(outcome.index);
                matched_weights.push(step.weight);
                matched_comments.push(step.comment.clone());
            }
        }

        let custom_contributions = if matches!(run.termination, Some(ProbeError::ServiceMismatch(_))) {
            Vec::new()
        } else {
            self.run_probes(host, port, set).await
        };

        if matched_weights.is_empty() && custom_contributions.is_empty() {
            return None;
        }

        let mut result = DetectionResult {
            port,
            honeypot: set.name.clone(),
            protocol: set.protocol,
            matched_steps,
            matched_weights,
            matched_comments,
            total_steps: set.steps.len(),
            custom_contributions,
            confidence: 0.0,
        };
        result.confidence = self.aggregator.confidence(&result.evidence());
        info!(
            "Found {}/{} {} signatures on port {}, confidence {:.3}",
            result.matched_steps.len(),
            result.total_steps,
            result.honeypot,
            port,
            result.confidence
        );
        Some(result)
    }

    async fn run_probes(&self, host: IpAddr, port: u16, set: &SignatureSet) -> Vec<f64> {
        let mut scores = Vec::new();
        for id in &set.custom_probes {
            let Some(probe) = self.probes.get(id).filter(|p| p.supports(set.protocol)) else {
                continue;
            };
            match probe.run(host, port, set.protocol).await {
                Ok(contributions) => {
                    debug!("Probe {} on port {}: {:?}", id, port, contributions);
                    scores.extend(contributions.into_iter().map(unit_score));
                }
                Err(e) if e.is_evidence_neutral() => debug!("Probe {} on port {}: {}", id, port, e),
                Err(e) => warn!("Probe {} on port {} failed: {}", id, port, e),
            }
        }
        scores
    }

    /// Highest confidence at or above the threshold; the first evaluated wins ties.
    fn select_best(&self, host: IpAddr, results: &[DetectionResult]) -> Option<HoneypotMatch> {
        let mut best: Option<&DetectionResult> = None;
        for result in results.iter().filter(|r| r.confidence >= self.threshold) {
            if best.map_or(true, |b| result.confidence > b.confidence) {
                best = Some(result);
            }
        }

        best.map(|result| HoneypotMatch {
            name: result.honeypot.clone(),
            version: self
                .versions
                .get(&result.honeypot)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
            host,
            port: result.port,
            credentials: result
                .protocol
                .is_session_oriented()
                .then(|| self.credentials.clone()),
        })
    }
}

/// Clamp a probe contribution into [0, 1]; NaN and infinities carry no evidence.
fn unit_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
