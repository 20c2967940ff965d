//! Tiered rate limiting for the metered endpoint.
//!
//! Callers are classified into anonymous (keyed by IP), standard (keyed by
//! wallet) and verified (allow-listed wallets). Each tier has its own
//! [`TokenBucketLimiter`] and its own limits.

mod token_bucket;

pub use token_bucket::TokenBucketLimiter;

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::RateLimitConfig;
use crate::tasks::PeriodicTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub rpm: u32,
    pub burst: u32,
}

impl TierLimits {
    pub fn new(rpm: u32, burst: u32) -> Self {
        Self { rpm, burst }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Anonymous,
    Standard,
    Verified,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Anonymous => "anonymous",
            Tier::Standard => "standard",
            Tier::Verified => "verified",
        }
    }
}

/// Outcome of one rate-limit check, with everything needed for the
/// `X-RateLimit-*` and `Retry-After` headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub tier: Tier,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: i64,
    pub retry_after: u64,
}

pub struct RateLimiter {
    anonymous: TokenBucketLimiter,
    standard: TokenBucketLimiter,
    verified: TokenBucketLimiter,
    verified_wallets: HashSet<String>,
    trust_proxy_headers: bool,
    idle_ttl: Duration,
    sweeper: Mutex<Option<PeriodicTask>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            anonymous: TokenBucketLimiter::new(config.anonymous.rpm, config.anonymous.burst),
            standard: TokenBucketLimiter::new(config.standard.rpm, config.standard.burst),
            verified: TokenBucketLimiter::new(config.verified.rpm, config.verified.burst),
            verified_wallets: config.verified_wallets.iter().map(|w| w.to_lowercase()).collect(),
            trust_proxy_headers: config.trust_proxy_headers,
            idle_ttl: config.cleanup_interval,
            sweeper: Mutex::new(None),
        }
    }

    pub fn trust_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }

    fn limiter(&self, tier: Tier) -> &TokenBucketLimiter {
        match tier {
            Tier::Anonymous => &self.anonymous,
            Tier::Standard => &self.standard,
            Tier::Verified => &self.verified,
        }
    }

    /// Pick the tier and bucket key for a caller.
    pub fn classify(&self, wallet: Option<&str>, peer_ip: Option<&str>) -> (Tier, String) {
        let wallet = wallet.map(|w| w.trim().to_lowercase()).filter(|w| !w.is_empty());
        match wallet {
            Some(w) if self.verified_wallets.contains(&w) => (Tier::Verified, format!("wallet:{}", w)),
            Some(w) => (Tier::Standard, format!("wallet:{}", w)),
            None => (
                Tier::Anonymous,
                format!("ip:{}", peer_ip.unwrap_or("unknown")),
            ),
        }
    }

    /// Take one token for `key` in `tier`.
    pub fn check(&self, tier: Tier, key: &str) -> RateDecision {
        let limiter = self.limiter(tier);
        let allowed = limiter.allow(key);
        let decision = RateDecision {
            allowed,
            tier,
            limit: limiter.rpm(),
            remaining: limiter.remaining(key),
            reset_at: limiter.reset_at(key),
            retry_after: if allowed { 0 } else { limiter.retry_after(key).max(1) },
        };
        if !allowed {
            log::info!(
                "[RATE_LIMIT] {} tier limit hit for {} (retry in {}s)",
                tier.as_str(),
                key,
                decision.retry_after
            );
        }
        decision
    }

    /// Drop buckets idle past the cleanup TTL in every tier.
    pub fn sweep(&self) -> usize {
        self.anonymous.sweep_idle(self.idle_ttl)
            + self.standard.sweep_idle(self.idle_ttl)
            + self.verified.sweep_idle(self.idle_ttl)
    }

    pub fn start_sweeper(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn("rate-limit-sweeper", self.idle_ttl, move || match weak.upgrade() {
            Some(limiter) => {
                let removed = limiter.sweep();
                if removed > 0 {
                    log::debug!("[RATE_LIMIT] Removed {} idle buckets", removed);
                }
                true
            }
            None => false,
        });
        if let Some(previous) = self.sweeper.lock().replace(task) {
            tokio::spawn(previous.shutdown());
        }
    }

    pub async fn shutdown(&self) {
        let task = self.sweeper.lock().take();
        if let Some(task) = task {
            task.shutdown().await;
        }
    }
}
