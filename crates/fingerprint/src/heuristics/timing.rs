//! Timing side-channel probe
//!
//! Some HTTP honeypots answer requests for missing resources on a fixed,
//! artificial delay schedule. Requests for random paths are timed and the
//! observed latencies compared against a reference schedule.

use async_trait::async_trait;
use reqwest::Client;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use honeysift_common::{HeuristicProbe, ProbeError, ProbeResult, Protocol, TimingProbeOptions};

use crate::communicator::http::{base_url, build_client, map_reqwest_error};

pub const TIMING_SIDE_CHANNEL: &str = "timing_side_channel";

/// Upper bound on requests per run regardless of the reference length.
const MAX_REQUESTS: usize = 32;

/// True if every observation is within `tolerance` of its reference.
pub fn schedule_matches(observed: &[Duration], reference: &[Duration], tolerance: Duration) -> bool {
    !reference.is_empty()
        && observed.len() == reference.len()
        && observed
            .iter()
            .zip(reference)
            .all(|(o, r)| {
                let delta = if o > r { *o - *r } else { *r - *o };
                delta <= tolerance
            })
}

pub struct TimingSideChannelProbe {
    client: Client,
    options: TimingProbeOptions,
}

impl TimingSideChannelProbe {
    pub fn new(options: TimingProbeOptions) -> ProbeResult<Self> {
        let timeout = options.request_timeout();
        Ok(Self {
            client: build_client(timeout, timeout)?,
            options,
        })
    }
}

#[async_trait]
impl HeuristicProbe for TimingSideChannelProbe {
    #[instrument(skip(self))]
    async fn run(&self, host: IpAddr, port: u16, protocol: Protocol) -> Result<Vec<f64>, ProbeError> {
        let base = base_url(protocol == Protocol::Https, host, port);
        let mut reference = self.options.reference();
        reference.truncate(MAX_REQUESTS);

        let mut observed = Vec::with_capacity(reference.len());
        let mut consecutive_timeouts = 0;

        for _ in 0..reference.len() {
            let url = format!(
                "{}{}{}",
                base,
                self.options.path_prefix,
                Uuid::new_v4().simple()
            );
            let start = Instant::now();
            match self.client.get(&url).send().await {
                Ok(response) => {
                    observed.push(start.elapsed());
                    consecutive_timeouts = 0;
                    let _ = response.bytes().await;
                }
                Err(e) if e.is_timeout() => {
                    consecutive_timeouts += 1;
                    if consecutive_timeouts >= self.options.max_consecutive_timeouts {
                        debug!("Giving up after {} consecutive timeouts", consecutive_timeouts);
                        return Ok(Vec::new());
                    }
                }
                Err(e) => return Err(map_reqwest_error(e)),
            }
        }

        debug!("Observed latencies: {:?}", observed);
        if schedule_matches(&observed, &reference, self.options.tolerance()) {
            info!("Latency schedule on {}:{} matches reference", host, port);
            Ok(vec![self.options.score])
        } else {
            Ok(Vec::new())
        }
    }

    fn id(&self) -> &str {
        TIMING_SIDE_CHANNEL
    }

    fn supports(&self, protocol: Protocol) -> bool {
        protocol.is_http()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::http::fixture;
    use std::net::Ipv4Addr;
    use std::sync::atomic::Ordering;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|v| Duration::from_millis(*v)).collect()
    }

    #[test]
    fn schedule_within_tolerance() {
        let reference = ms(&[1000, 1000, 2000]);
        let tolerance = Duration::from_millis(100);
        assert!(schedule_matches(&ms(&[950, 1090, 2000]), &reference, tolerance));
        assert!(!schedule_matches(&ms(&[950, 1200, 2000]), &reference, tolerance));
        assert!(!schedule_matches(&ms(&[1000, 1000]), &reference, tolerance));
        assert!(!schedule_matches(&[], &[], tolerance));
    }

    #[tokio::test]
    async fn matching_schedule_contributes_score() {
        let (port, hits) = fixture::serve(vec![], Duration::from_millis(150)).await;
        let probe = TimingSideChannelProbe::new(TimingProbeOptions {
            reference_ms: vec![150, 150, 150],
            tolerance_ms: 120,
            request_timeout_ms: 2_000,
            ..TimingProbeOptions::default()
        })
        .unwrap();

        assert_eq!(probe.run(LOCALHOST, port, Protocol::Http).await.unwrap(), vec![0.6]);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn https_sets_are_timed_over_tls() {
        let (port, hits) = fixture::serve(vec![], Duration::ZERO).await;
        let probe = TimingSideChannelProbe::new(TimingProbeOptions {
            reference_ms: vec![100, 100],
            request_timeout_ms: 2_000,
            ..TimingProbeOptions::default()
        })
        .unwrap();

        // The fixture speaks plain HTTP, so a TLS handshake cannot complete.
        assert!(probe.run(LOCALHOST, port, Protocol::Https).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(probe.supports(Protocol::Https));
        assert!(!probe.supports(Protocol::Ssh));
    }

    #[tokio::test]
    async fn fast_server_does_not_match() {
        let (port, _) = fixture::serve(vec![], Duration::ZERO).await;
        let probe = TimingSideChannelProbe::new(TimingProbeOptions {
            reference_ms: vec![800, 800],
            tolerance_ms: 100,
            ..TimingProbeOptions::default()
        })
        .unwrap();

        assert!(probe.run(LOCALHOST, port, Protocol::Http).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn consecutive_timeouts_abort_early() {
        let (port, hits) = fixture::serve(vec![], Duration::from_secs(5)).await;
        let probe = TimingSideChannelProbe::new(TimingProbeOptions {
            reference_ms: vec![100; 5],
            request_timeout_ms: 150,
            max_consecutive_timeouts: 2,
            ..TimingProbeOptions::default()
        })
        .unwrap();

        assert!(probe.run(LOCALHOST, port, Protocol::Http).await.unwrap().is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
