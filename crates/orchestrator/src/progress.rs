//! Progress tracking

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

/// Counters shared by the port scan workers.
pub struct ProgressTracker {
    total: AtomicUsize,
    probed: AtomicUsize,
    open: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total: AtomicUsize::new(total),
            probed: AtomicUsize::new(0),
            open: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn record(&self, open: bool) {
        self.probed.fetch_add(1, Ordering::Relaxed);
        if open {
            self.open.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub fn probed(&self) -> usize {
        self.probed.load(Ordering::Relaxed)
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }

    pub fn print_summary(&self, elapsed: Duration) {
        let total = self.total();
        let probed = self.probed();

        info!("Port scan summary:");
        info!("  Ports requested: {}", total);
        info!("  Ports probed: {}", probed);
        info!("  Open: {}", self.open());
        if total > 0 {
            info!("  Coverage: {:.1}%", (probed as f64 / total as f64) * 100.0);
        }
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            info!("  Rate: {:.0} ports/s", probed as f64 / secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_probes_and_open_ports() {
        let progress = ProgressTracker::new(3);
        progress.record(false);
        progress.record(true);
        progress.record(false);
        assert_eq!(progress.total(), 3);
        assert_eq!(progress.probed(), 3);
        assert_eq!(progress.open(), 1);
    }
}
