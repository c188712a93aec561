//! Bounded TTL cache for ASN resolution with single-flight load-on-miss.

use super::{Asn, AsnResolver, Sweep};
use crate::config::ResolutionCacheConfig;
use crate::error::ResolveError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

/// Cached resolution record. Immutable once stored; a changed upstream
/// answer requires eviction plus re-resolve.
#[derive(Debug, Clone)]
struct CacheEntry {
    asn: Asn,
    cached_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Thread-safe bounded TTL store, shared by the plain and bloom-gated
/// caching strategies.
pub(crate) struct AsnCache {
    entries: RwLock<HashMap<IpAddr, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl AsnCache {
    pub(crate) fn new(config: &ResolutionCacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(config.ttl_seconds),
            max_entries: config.max_entries,
        }
    }

    /// Get a cached ASN if present and not expired.
    pub(crate) fn get(&self, ip: &IpAddr) -> Option<Asn> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(ip)?;

        if entry.is_expired() {
            // Don't remove here to avoid a write lock; cleanup handles it.
            None
        } else {
            Some(entry.asn.clone())
        }
    }

    /// Store a resolved ASN, evicting at capacity.
    pub(crate) fn insert(&self, ip: IpAddr, asn: Asn) {
        let entry = CacheEntry {
            asn,
            cached_at: Instant::now(),
            ttl: self.ttl,
        };

        if let Ok(mut entries) = self.entries.write() {
            if entries.len() >= self.max_entries && !entries.contains_key(&ip) {
                entries.retain(|_, e| !e.is_expired());

                // If still at capacity, remove the oldest entry.
                if entries.len() >= self.max_entries {
                    if let Some(oldest_ip) = entries
                        .iter()
                        .min_by_key(|(_, e)| e.cached_at)
                        .map(|(k, _)| *k)
                    {
                        entries.remove(&oldest_ip);
                    }
                }
            }

            entries.insert(ip, entry);
        }
    }

    /// Remove expired entries.
    pub(crate) fn cleanup(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|_, e| !e.is_expired());
        }
    }

    /// Number of entries, expired included.
    pub(crate) fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

type InflightCell = Arc<OnceCell<Result<Asn, ResolveError>>>;

/// Plain bounded cache decorator.
///
/// A miss computes through the inner resolver exactly once per key even
/// under concurrent callers: all callers for a missing key await the same
/// in-flight load and observe the same result, including timeout failures.
/// Errors are never cached, so the next caller retries upstream.
pub struct CachingResolver {
    inner: Arc<dyn AsnResolver>,
    cache: AsnCache,
    inflight: Mutex<HashMap<IpAddr, InflightCell>>,
}

impl CachingResolver {
    /// Create a new caching decorator.
    pub fn new(inner: Arc<dyn AsnResolver>, config: ResolutionCacheConfig) -> Self {
        Self {
            inner,
            cache: AsnCache::new(&config),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Drop expired entries. Called by the maintenance sweep.
    pub fn cleanup(&self) {
        self.cache.cleanup();
    }

    /// Number of cached entries, expired included.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.len() == 0
    }
}

impl Sweep for CachingResolver {
    fn sweep(&self) {
        self.cleanup();
    }
}

#[async_trait]
impl AsnResolver for CachingResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<Asn, ResolveError> {
        if let Some(asn) = self.cache.get(&ip) {
            debug!(ip = %ip, asn = %asn, "ASN cache hit");
            return Ok(asn);
        }

        let cell: InflightCell = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(ip).or_default().clone()
        };

        let result = cell
            .get_or_init(|| async { self.inner.resolve(ip).await })
            .await
            .clone();

        if let Ok(ref asn) = result {
            self.cache.insert(ip, asn.clone());
        }

        // Retire the flight so a later miss (TTL expiry, or a failed load)
        // starts a fresh upstream call.
        self.inflight.lock().await.remove(&ip);

        result
    }

    fn name(&self) -> &str {
        "cache"
    }
}
