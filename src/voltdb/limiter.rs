use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};

/// Token bucket rate limiter for outbound invocations.
///
/// The bucket holds at most one second worth of tokens and starts full.
/// Callers that find it empty wait, in arrival order, for the next token.
pub struct RateLimiter {
    per_second: u32,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Zero disables the cap.
    pub fn new(per_second: u32) -> Self {
        Self {
            per_second,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(per_second),
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn acquire(&self) {
        if self.per_second == 0 {
            return;
        }
        let rate = f64::from(self.per_second);
        let mut bucket = self.bucket.lock().await;
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill);
            bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * rate).min(rate);
            bucket.last_refill = now;

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                return;
            }
            let wait = Duration::from_secs_f64((1.0 - bucket.tokens) / rate);
            time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bursts_one_second_then_waits_for_refill() {
        let limiter = RateLimiter::new(100);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        // each extra token takes 10ms to refill
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn zero_disables_the_cap() {
        let limiter = RateLimiter::new(0);
        let start = Instant::now();
        for _ in 0..10_000 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
