//! Per-host token bucket shared by the fetcher tasks of one crawl.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct HostBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket per host: steady refill at `rate` tokens/second, burst up to
/// `burst`. `acquire` suspends until a token is available.
pub struct HostRateLimiter {
    rate: f64,
    burst: f64,
    buckets: Mutex<HashMap<String, HostBucket>>,
}

impl HostRateLimiter {
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            rate,
            burst,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, host: &str) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let now = Instant::now();
                let bucket = buckets.entry(host.to_string()).or_insert(HostBucket {
                    tokens: self.burst,
                    last_refill: now,
                });

                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate))
                }
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_immediate() {
        let limiter = HostRateLimiter::new(2.0, 4.0);
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire("example.com").await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn refills_at_steady_rate() {
        let limiter = HostRateLimiter::new(2.0, 4.0);
        for _ in 0..4 {
            limiter.acquire("example.com").await;
        }
        // Bucket is empty; the fifth token needs ~500ms at 2 tokens/sec.
        let start = Instant::now();
        limiter.acquire("example.com").await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(400), "waited {waited:?}");
    }

    #[tokio::test]
    async fn hosts_are_independent() {
        let limiter = HostRateLimiter::new(2.0, 2.0);
        let start = Instant::now();
        limiter.acquire("a.example.com").await;
        limiter.acquire("a.example.com").await;
        limiter.acquire("b.example.com").await;
        limiter.acquire("b.example.com").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
