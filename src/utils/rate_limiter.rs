/// Token bucket rate limiter shared by every worker of a run
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_second: f64,
    poll_interval: Duration,
    // refill and consume happen under this single lock
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Bucket starts full
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        let capacity = capacity as f64;
        RateLimiter {
            capacity,
            refill_per_second: refill_per_second.max(0.0),
            poll_interval: DEFAULT_POLL_INTERVAL,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// `n` requests per minute, bursting up to `n`
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(requests_per_minute, requests_per_minute as f64 / 60.0)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Try to acquire a token, returns true if successful
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available, then acquire it
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire().await {
                return;
            }
            debug!("Rate limit reached, waiting {:?}", self.poll_interval);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Get current available tokens
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
            bucket.last_refill = now;
        }
    }
}
