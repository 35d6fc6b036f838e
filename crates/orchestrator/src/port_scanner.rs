//! Concurrent TCP port sweep

use anyhow::Result;
use std::collections::{BTreeSet, VecDeque};
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, trace, warn};

use honeysift_common::{DetectionLog, PortProber, PortScanOutcome, PortState, ScanOptions};
use honeysift_scanner_tcp::TcpConnectProber;

use crate::progress::ProgressTracker;
use crate::rate_limiter::RateLimiter;

/// Sweeps a port range with a fixed pool of workers draining a shared queue.
///
/// Every port in the range is probed exactly once unless the scan is
/// cancelled, in which case the ports found so far are returned.
pub struct PortScanner {
    prober: Arc<dyn PortProber>,
    concurrency: usize,
    rate_limiter: Option<Arc<RateLimiter>>,
    log: Arc<dyn DetectionLog>,
}

impl PortScanner {
    pub fn new(prober: Arc<dyn PortProber>, concurrency: usize, log: Arc<dyn DetectionLog>) -> Self {
        Self {
            prober,
            concurrency: concurrency.max(1),
            rate_limiter: None,
            log,
        }
    }

    /// Scanner using TCP connect probes configured from `options`.
    pub fn from_options(options: &ScanOptions, log: Arc<dyn DetectionLog>) -> Self {
        let prober = Arc::new(connect_prober(options));
        let scanner = Self::new(prober, options.concurrency, log);
        match options.rate_limit {
            Some(rate) => scanner.with_rate_limit(rate),
            None => scanner,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.rate_limiter = Some(Arc::new(RateLimiter::new(per_second)));
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[instrument(skip(self, cancel), fields(prober = self.prober.name()))]
    pub async fn scan(
        &self,
        host: IpAddr,
        ports: RangeInclusive<u16>,
        cancel: &CancellationToken,
    ) -> Result<PortScanOutcome> {
        let started = Instant::now();
        let queue: VecDeque<u16> = ports.filter(|p| *p != 0).collect();
        let total = queue.len();
        let workers = self.concurrency.min(total.max(1));
        info!("Scanning {} ports on {} with {} workers", total, host, workers);

        let queue = Arc::new(Mutex::new(queue));
        let open = Arc::new(Mutex::new(BTreeSet::new()));
        let progress = Arc::new(ProgressTracker::new(total));

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = queue.clone();
            let open = open.clone();
            let progress = progress.clone();
            let prober = self.prober.clone();
            let rate_limiter = self.rate_limiter.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let port = match queue.lock().await.pop_front() {
                        Some(port) => port,
                        None => break,
                    };

                    if let Some(limiter) = &rate_limiter {
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = limiter.acquire() => {}
                        }
                    }

                    let state = tokio::select! {
                        () = cancel.cancelled() => break,
                        state = prober.probe(host, port) => state,
                    };

                    let is_open = state == PortState::Open;
                    progress.record(is_open);
                    if is_open {
                        trace!("{}:{} open", host, port);
                        open.lock().await.insert(port);
                    }
                }
            }));
        }

        for handle in handles {
            handle.await?;
        }

        let elapsed = started.elapsed();
        progress.print_summary(elapsed);

        let outcome = PortScanOutcome {
            open: std::mem::take(&mut *open.lock().await),
            probed: progress.probed(),
            cancelled: cancel.is_cancelled() && progress.probed() < total,
            elapsed,
        };

        if let Err(e) = self.log.record_port_scan(host, &outcome).await {
            warn!("Failed to record port scan: {:#}", e);
        }
        Ok(outcome)
    }
}

fn connect_prober(options: &ScanOptions) -> TcpConnectProber {
    TcpConnectProber::new().with_timeout(options.connect_timeout())
}
