//! Per-origin request rate limiting.
//!
//! Two independent gates per origin IP: a continuous keyed rate limiter
//! with a short acquisition wait, and a hard burst counter over a fixed
//! one-minute window. Burst overflow denies immediately without touching
//! the continuous limiter.

use crate::config::OriginRateLimitConfig;
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tracing::debug;

type KeyedRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

#[derive(Debug)]
struct BurstWindow {
    count: u32,
    window_start: Instant,
    last_seen: Instant,
}

/// Per-origin admission gate.
pub struct OriginRateLimiter {
    limiter: KeyedRateLimiter,
    bursts: DashMap<IpAddr, BurstWindow>,
    burst_limit: u32,
    window: Duration,
    acquire_timeout: Duration,
    idle_ttl: Duration,
}

impl OriginRateLimiter {
    /// Create a limiter from configuration.
    pub fn new(config: &OriginRateLimitConfig) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        );

        Self {
            limiter: RateLimiter::keyed(quota),
            bursts: DashMap::new(),
            burst_limit: config.burst_per_minute,
            window: Duration::from_secs(60),
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            idle_ttl: Duration::from_secs(config.idle_ttl_seconds),
        }
    }

    /// Admit or deny one request from an origin.
    ///
    /// Increments the burst counter first; over the cap the request is
    /// denied without consulting the continuous limiter. Otherwise waits up
    /// to the configured timeout for a continuous permit.
    pub async fn check(&self, ip: IpAddr) -> bool {
        if !self.bump_burst(ip) {
            debug!(ip = %ip, "Burst cap exceeded");
            return false;
        }

        tokio::time::timeout(self.acquire_timeout, self.limiter.until_key_ready(&ip))
            .await
            .is_ok()
    }

    /// Increment the origin's burst counter; false when the cap is hit.
    fn bump_burst(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut entry = self.bursts.entry(ip).or_insert_with(|| BurstWindow {
            count: 0,
            window_start: now,
            last_seen: now,
        });

        let window = entry.value_mut();
        if now.duration_since(window.window_start) >= self.window {
            window.count = 0;
            window.window_start = now;
        }
        window.last_seen = now;

        if window.count >= self.burst_limit {
            return false;
        }
        window.count += 1;
        true
    }

    /// Drop idle burst counters and shrink the keyed limiter. Called by the
    /// maintenance sweep.
    pub fn sweep(&self) {
        let before = self.bursts.len();
        self.bursts
            .retain(|_, window| window.last_seen.elapsed() < self.idle_ttl);
        let dropped = before - self.bursts.len();
        if dropped > 0 {
            debug!(dropped, "Swept idle burst counters");
        }

        self.limiter.retain_recent();
    }

    /// Number of tracked origins.
    pub fn tracked_origins(&self) -> usize {
        self.bursts.len()
    }
}
