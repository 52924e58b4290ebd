use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Byte-rate limiter for downloads.
///
/// A token bucket refilled continuously at `bytes_per_sec`, holding at most
/// `burst` tokens. A chunk larger than the current balance drives the bucket
/// into debt and the caller sleeps until the debt is repaid, so chunks of any
/// size are accepted and average throughput stays at the configured rate.
#[derive(Debug, Clone)]
pub struct Throttle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    bytes_per_sec: f64,
    burst: f64,
    // (current tokens, time of last refill)
    bucket: Mutex<(f64, Instant)>,
}

impl Throttle {
    pub fn new(bytes_per_sec: u64, burst: u64) -> Self {
        let rate = bytes_per_sec.max(1) as f64;
        let burst = burst.max(1) as f64;
        Self {
            inner: Arc::new(Inner {
                bytes_per_sec: rate,
                burst,
                bucket: Mutex::new((burst, Instant::now())),
            }),
        }
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.inner.bytes_per_sec as u64
    }

    /// Account for `bytes` just transferred, sleeping as needed.
    pub async fn acquire(&self, bytes: u64) {
        let wait = {
            let mut guard = self.inner.bucket.lock().await;
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *tokens = (*tokens + elapsed * self.inner.bytes_per_sec).min(self.inner.burst);
            *last = now;
            *tokens -= bytes as f64;
            if *tokens < 0.0 {
                Some(Duration::from_secs_f64(-*tokens / self.inner.bytes_per_sec))
            } else {
                None
            }
        };
        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }
    }
}
