//! Token-bucket bandwidth limiter
//!
//! The bucket holds at most one second of budget. A request larger than the
//! remaining budget goes into debt and waits until the debt is paid back.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Bucket {
    available: f64,
    last_refill: Instant,
}

/// Bytes-per-second limiter shared by every call in one direction
#[derive(Debug)]
pub struct Throttle {
    rate: f64,
    bucket: Mutex<Bucket>,
}

impl Throttle {
    pub fn new(bytes_per_sec: u64) -> Self {
        let rate = bytes_per_sec.max(1) as f64;
        Self {
            rate,
            bucket: Mutex::new(Bucket {
                available: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Limiter for `mb` MiB/s; `None` when `mb` is 0
    pub fn from_mb(mb: u64) -> Option<Self> {
        (mb > 0).then(|| Self::new(mb * 1024 * 1024))
    }

    pub fn rate(&self) -> u64 {
        self.rate as u64
    }

    /// Debit `bytes` and return how long the caller must wait
    pub fn reserve(&self, bytes: usize) -> Duration {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.available = (bucket.available + elapsed * self.rate).min(self.rate);
        bucket.last_refill = now;

        bucket.available -= bytes as f64;
        if bucket.available >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.available / self.rate)
        }
    }

    pub async fn acquire(&self, bytes: usize) {
        let wait = self.reserve(bytes);
        if !wait.is_zero() {
            tracing::trace!(bytes, wait_ms = wait.as_millis() as u64, "Throttled");
            tokio::time::sleep(wait).await;
        }
    }
}
