//! Token bucket pacing for connection attempts

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Limits connection attempts per second across all scan workers.
///
/// The bucket starts full, so up to one second's worth of attempts may
/// burst before pacing kicks in.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    capacity: f64,
    refill_rate: f64,
}

impl RateLimiter {
    pub fn new(per_second: u32) -> Self {
        let capacity = f64::from(per_second.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_rate: capacity,
        }
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_rate)
            };
            tokio::time::sleep(wait).await;
        }
    }

    pub fn per_second(&self) -> u32 {
        self.capacity as u32
    }
}
