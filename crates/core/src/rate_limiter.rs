use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use governor::{Quota, RateLimiter as GovernorRateLimiter};
use nonzero_ext::nonzero;

type HostLimiter = GovernorRateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

const MAX_WIDEN_MULTIPLIER: u32 = 60;

/// Per-host token bucket. One bucket is created lazily per upstream host the
/// first time it's acquired, and widened (its quota's replenish interval
/// grown) when the host signals `UpstreamRateLimited`. Acquisition may
/// suspend the caller until a token is available.
pub struct RateLimiter {
    default_quota: Quota,
    hosts: RwLock<HashMap<String, Arc<HostEntry>>>,
}

struct HostEntry {
    /// Swapped out for a limiter built against a wider quota whenever
    /// `widen` runs, so an in-progress widening takes effect on the very
    /// next `acquire` rather than only on newly-created host entries.
    limiter: RwLock<Arc<HostLimiter>>,
    widened_multiplier: std::sync::atomic::AtomicU32,
}

impl RateLimiter {
    /// `requests_per_second` configures the steady-state rate per host;
    /// burst is fixed at 1 so acquisition always waits for a fresh token
    /// rather than draining a large burst allowance upfront.
    pub fn new(requests_per_second: NonZeroU32) -> Self {
        Self {
            default_quota: Quota::per_second(requests_per_second),
            hosts: RwLock::new(HashMap::new()),
        }
    }

    fn entry_for(&self, host: &str) -> Arc<HostEntry> {
        if let Some(existing) = self.hosts.read().expect("lock poisoned").get(host) {
            return existing.clone();
        }
        let mut hosts = self.hosts.write().expect("lock poisoned");
        hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(HostEntry {
                    limiter: RwLock::new(Arc::new(GovernorRateLimiter::direct(self.default_quota))),
                    widened_multiplier: std::sync::atomic::AtomicU32::new(1),
                })
            })
            .clone()
    }

    fn widened_quota(&self, multiplier: u32) -> Quota {
        Quota::with_period(self.default_quota.replenish_interval() * multiplier)
            .unwrap_or(self.default_quota)
            .allow_burst(self.default_quota.burst_size())
    }

    /// Suspends until a token for `host` is available.
    pub async fn acquire(&self, host: &str) {
        let entry = self.entry_for(host);
        let limiter = entry.limiter.read().expect("lock poisoned").clone();
        limiter.until_ready().await;
    }

    /// Signals that `host` returned 429 / equivalent: widens the effective
    /// interval between permits by doubling, capped at `MAX_WIDEN_MULTIPLIER`.
    /// Rebuilds the host's governor limiter against the wider quota so the
    /// widening actually throttles the next `acquire`, not just a
    /// diagnostic counter.
    pub fn widen(&self, host: &str) {
        let entry = self.entry_for(host);
        let previous = entry
            .widened_multiplier
            .fetch_update(
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
                |current| Some((current * 2).min(MAX_WIDEN_MULTIPLIER)),
            )
            .unwrap_or(1);
        let next_multiplier = (previous * 2).min(MAX_WIDEN_MULTIPLIER);
        let widened = GovernorRateLimiter::direct(self.widened_quota(next_multiplier));
        *entry.limiter.write().expect("lock poisoned") = Arc::new(widened);
        tracing::warn!(host, previous_multiplier = previous, next_multiplier, "widening rate limiter after 429");
    }

    /// Returns the current widened replenish interval for diagnostics/tests.
    pub fn widened_interval(&self, host: &str) -> Duration {
        let entry = self.entry_for(host);
        let multiplier = entry.widened_multiplier.load(std::sync::atomic::Ordering::SeqCst);
        self.default_quota.replenish_interval() * multiplier
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(nonzero!(2u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_does_not_panic_for_fresh_host() {
        let limiter = RateLimiter::new(nonzero!(100u32));
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;
    }

    #[test]
    fn widen_doubles_and_caps() {
        let limiter = RateLimiter::default();
        let base = limiter.widened_interval("example.com");
        limiter.widen("example.com");
        let after_one = limiter.widened_interval("example.com");
        assert_eq!(after_one, base * 2);
        for _ in 0..20 {
            limiter.widen("example.com");
        }
        assert_eq!(limiter.widened_interval("example.com"), base * MAX_WIDEN_MULTIPLIER);
    }

    #[tokio::test]
    async fn widen_actually_slows_subsequent_acquires() {
        let limiter = RateLimiter::new(nonzero!(1000u32));
        // Drain the initial burst token so the next acquire must wait a full
        // replenish interval, then widen and confirm the interval grew.
        limiter.acquire("example.com").await;
        let before = limiter.widened_interval("example.com");
        limiter.widen("example.com");
        let after = limiter.widened_interval("example.com");
        assert!(after > before, "widen() must grow the interval `acquire` waits on");
    }
}
