//! Detection and communication log sinks
//!
//! Three `DetectionLog` implementations: structured tracing events, an
//! append-only JSON-lines file, and an in-memory collector.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info};

use honeysift_common::{CommunicationRecord, DetectionLog, DetectionLogEntry, PortScanOutcome};

/// Emits every record as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

#[async_trait]
impl DetectionLog for TracingLog {
    async fn record_port_scan(&self, host: IpAddr, outcome: &PortScanOutcome) -> Result<()> {
        info!(
            %host,
            open = ?outcome.open,
            probed = outcome.probed,
            cancelled = outcome.cancelled,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "port scan complete"
        );
        Ok(())
    }

    async fn record_exchange(&self, record: &CommunicationRecord) -> Result<()> {
        debug!(
            host = %record.host,
            port = record.port,
            honeypot = %record.honeypot,
            "{}",
            record
        );
        Ok(())
    }

    async fn record_detection(&self, entry: &DetectionLogEntry) -> Result<()> {
        info!(host = %entry.host, open = ?entry.open_ports, "detection finished");
        for result in &entry.results {
            info!(
                port = result.port,
                honeypot = %result.honeypot,
                confidence = result.confidence,
                matched = ?result.matched_steps,
                found = result.matched_steps.len(),
                total = result.total_steps,
                "candidate"
            );
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogLine<'a> {
    PortScan {
        timestamp: DateTime<Utc>,
        host: IpAddr,
        open_ports: &'a BTreeSet<u16>,
        probed: usize,
        cancelled: bool,
        elapsed_ms: u64,
    },
    Exchange(&'a CommunicationRecord),
    Detection(&'a DetectionLogEntry),
}

/// Append-only JSON-lines log file.
///
/// Records from concurrent writers are serialized through one buffered
/// writer; `close` flushes it and rejects later writes.
pub struct JsonLinesLog {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<tokio::fs::File>>>,
}

impl JsonLinesLog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening log file {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, line: &LogLine<'_>) -> Result<()> {
        let mut encoded = serde_json::to_vec(line)?;
        encoded.push(b'\n');

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| anyhow!("log {} already closed", self.path.display()))?;
        writer.write_all(&encoded).await?;
        Ok(())
    }
}

#[async_trait]
impl DetectionLog for JsonLinesLog {
    async fn record_port_scan(&self, host: IpAddr, outcome: &PortScanOutcome) -> Result<()> {
        self.append(&LogLine::PortScan {
            timestamp: Utc::now(),
            host,
            open_ports: &outcome.open,
            probed: outcome.probed,
            cancelled: outcome.cancelled,
            elapsed_ms: outcome.elapsed.as_millis() as u64,
        })
        .await
    }

    async fn record_exchange(&self, record: &CommunicationRecord) -> Result<()> {
        self.append(&LogLine::Exchange(record)).await
    }

    async fn record_detection(&self, entry: &DetectionLogEntry) -> Result<()> {
        self.append(&LogLine::Detection(entry)).await
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.flush().await?;
            writer.into_inner().sync_all().await?;
        }
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Default)]
pub struct MemoryLog {
    port_scans: Mutex<Vec<(IpAddr, PortScanOutcome)>>,
    exchanges: Mutex<Vec<CommunicationRecord>>,
    detections: Mutex<Vec<DetectionLogEntry>>,
    closed: Mutex<bool>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn port_scans(&self) -> Vec<(IpAddr, PortScanOutcome)> {
        self.port_scans.lock().await.clone()
    }

    pub async fn exchanges(&self) -> Vec<CommunicationRecord> {
        self.exchanges.lock().await.clone()
    }

    pub async fn detections(&self) -> Vec<DetectionLogEntry> {
        self.detections.lock().await.clone()
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.lock().await
    }
}

#[async_trait]
impl DetectionLog for MemoryLog {
    async fn record_port_scan(&self, host: IpAddr, outcome: &PortScanOutcome) -> Result<()> {
        self.port_scans.lock().await.push((host, outcome.clone()));
        Ok(())
    }

    async fn record_exchange(&self, record: &CommunicationRecord) -> Result<()> {
        self.exchanges.lock().await.push(record.clone());
        Ok(())
    }

    async fn record_detection(&self, entry: &DetectionLogEntry) -> Result<()> {
        self.detections.lock().await.push(entry.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.closed.lock().await = true;
        Ok(())
    }
}
