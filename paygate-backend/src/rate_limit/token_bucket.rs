//! Per-key token bucket limiter
//!
//! Each key owns a bucket of at most `burst` tokens refilled continuously at
//! `rpm / 60` tokens per second. Buckets are created lazily on first use and
//! dropped by [`TokenBucketLimiter::sweep_idle`] once idle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(burst: f64, now: Instant) -> Self {
        Self {
            tokens: burst,
            last_refill: now,
        }
    }

    /// Tokens the bucket would hold at `now`, without mutating it.
    fn projected(&self, rate: f64, burst: f64, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * rate).min(burst)
    }
}

pub struct TokenBucketLimiter {
    rpm: u32,
    burst: u32,
    rate_per_sec: f64,
    buckets: DashMap<String, Arc<Mutex<Bucket>>>,
}

impl TokenBucketLimiter {
    /// Zero `rpm` or `burst` is clamped to 1.
    pub fn new(rpm: u32, burst: u32) -> Self {
        let rpm = rpm.max(1);
        let burst = burst.max(1);
        Self {
            rpm,
            burst,
            rate_per_sec: rpm as f64 / 60.0,
            buckets: DashMap::new(),
        }
    }

    pub fn rpm(&self) -> u32 {
        self.rpm
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    pub fn allow(&self, key: &str) -> bool {
        self.allow_n(key, 1)
    }

    pub fn allow_n(&self, key: &str, n: u32) -> bool {
        self.allow_n_at(key, n, Instant::now())
    }

    pub fn remaining(&self, key: &str) -> u32 {
        self.remaining_at(key, Instant::now())
    }

    /// Unix time (seconds) at which the bucket will be full again.
    pub fn reset_at(&self, key: &str) -> i64 {
        let secs = self.seconds_until_full_at(key, Instant::now());
        chrono::Utc::now().timestamp() + secs.ceil() as i64
    }

    /// Whole seconds until one token is available; 0 when one already is.
    pub fn retry_after(&self, key: &str) -> u64 {
        self.retry_after_at(key, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    fn bucket(&self, key: &str, now: Instant) -> Arc<Mutex<Bucket>> {
        // first accessor creates the bucket; the map ref is released before locking
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Bucket::full(self.burst as f64, now))))
            .clone()
    }

    fn peek(&self, key: &str, now: Instant) -> f64 {
        let Some(bucket) = self.buckets.get(key).map(|b| b.clone()) else {
            return self.burst as f64;
        };
        let bucket = bucket.lock();
        bucket.projected(self.rate_per_sec, self.burst as f64, now)
    }

    pub(crate) fn allow_n_at(&self, key: &str, n: u32, now: Instant) -> bool {
        let bucket = self.bucket(key, now);
        let mut bucket = bucket.lock();

        bucket.tokens = bucket.projected(self.rate_per_sec, self.burst as f64, now);
        bucket.last_refill = bucket.last_refill.max(now);

        let cost = n as f64;
        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            true
        } else {
            false
        }
    }

    pub(crate) fn remaining_at(&self, key: &str, now: Instant) -> u32 {
        self.peek(key, now).floor().max(0.0) as u32
    }

    pub(crate) fn seconds_until_full_at(&self, key: &str, now: Instant) -> f64 {
        let tokens = self.peek(key, now);
        ((self.burst as f64 - tokens) / self.rate_per_sec).max(0.0)
    }

    pub(crate) fn retry_after_at(&self, key: &str, now: Instant) -> u64 {
        let tokens = self.peek(key, now);
        if tokens >= 1.0 {
            return 0;
        }
        (((1.0 - tokens) / self.rate_per_sec).ceil() as u64).max(1)
    }

    /// Drop buckets untouched for longer than `idle`. Returns how many were removed.
    pub fn sweep_idle(&self, idle: Duration) -> usize {
        self.sweep_idle_at(idle, Instant::now())
    }

    pub(crate) fn sweep_idle_at(&self, idle: Duration, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.lock().last_refill) <= idle);
        before.saturating_sub(self.buckets.len())
    }
}
