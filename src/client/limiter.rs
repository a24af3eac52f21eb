//! Token-bucket rate limiter shared by every caller of one client.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Shared request rate limiter.
///
/// The bucket is internally synchronized and the lock is never held while
/// a caller waits for a token.
#[derive(Debug)]
pub struct RateLimiter {
    /// Bucket state.
    bucket: Mutex<Bucket>,
    /// Tokens added per second.
    rate: f64,
    /// Maximum number of stored tokens.
    burst: f64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a limiter allowing `requests_per_second` with bursts of `burst`.
    #[must_use]
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            rate: f64::from(requests_per_second.max(1)),
            burst,
        }
    }

    /// Waits until a request may be sent.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let refill = now.duration_since(bucket.last_refill).as_secs_f64() * self.rate;
                bucket.tokens = (bucket.tokens + refill).min(self.burst);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }

                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };

            trace!("Rate limiter waiting {wait:?}");
            tokio::time::sleep(wait).await;
        }
    }
}
