//! Sliding-window admission decorator over a shared counter store.
//!
//! Counts lookups per origin and time bucket in a [`CounterStore`]. The
//! bundled store is in-memory; deployments sharing admission state across
//! replicas implement the trait against their key-value store and accept
//! eventual consistency of the counters.

use super::{Asn, AsnResolver, Sweep};
use crate::config::SlidingWindowConfig;
use crate::error::ResolveError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Shared counter store boundary.
///
/// `increment` applies read-modify-write semantics and returns the new
/// count. `ttl` bounds how long the keyed counter must be retained.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key`, returning the post-increment value.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, ResolveError>;
}

/// In-memory counter store.
pub struct MemoryCounterStore {
    counters: DashMap<String, (u64, SystemTime)>,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Drop counters whose retention has passed. Every window rotation
    /// mints a fresh bucket key, so without this the store grows without
    /// bound.
    pub fn cleanup(&self) {
        let now = SystemTime::now();
        self.counters.retain(|_, (_, expires)| *expires > now);
    }

    /// Number of live counters, expired included until cleanup runs.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl Sweep for MemoryCounterStore {
    fn sweep(&self) {
        self.cleanup();
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, ResolveError> {
        let now = SystemTime::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert((0, now + ttl));

        let (count, expires) = entry.value_mut();
        if *expires <= now {
            *count = 0;
            *expires = now + ttl;
        }
        *count += 1;
        Ok(*count)
    }
}

/// Sliding-window admission decorator.
pub struct SlidingWindowResolver {
    inner: Arc<dyn AsnResolver>,
    store: Arc<dyn CounterStore>,
    window: Duration,
    max_requests: u64,
}

impl SlidingWindowResolver {
    /// Create a new decorator bound to a counter store.
    pub fn new(
        inner: Arc<dyn AsnResolver>,
        store: Arc<dyn CounterStore>,
        config: SlidingWindowConfig,
    ) -> Self {
        Self {
            inner,
            store,
            window: Duration::from_secs(config.window_seconds.max(1)),
            max_requests: config.max_requests,
        }
    }

    fn bucket_key(&self, ip: IpAddr) -> String {
        let bucket = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            / self.window.as_secs();
        format!("asn-resolve:{}:{}", ip, bucket)
    }
}

#[async_trait]
impl AsnResolver for SlidingWindowResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<Asn, ResolveError> {
        let key = self.bucket_key(ip);
        // Counters are retained past their bucket so adjacent windows can
        // still observe them.
        let count = self.store.increment(&key, self.window * 2).await?;

        if count > self.max_requests {
            debug!(ip = %ip, count, "Window limit exceeded");
            return Err(ResolveError::RateLimited);
        }

        self.inner.resolve(ip).await
    }

    fn name(&self) -> &str {
        "sliding-window"
    }
}
