//! Probabilistic-gate cache decorator.
//!
//! A Bloom filter in front of the cache storage answers "was this key ever
//! cached". Definitely-absent keys skip the cache lookup entirely and go
//! straight upstream; possibly-present keys check the real cache. A filter
//! false positive costs one wasted cache lookup, never a wrong answer. The
//! filter supports no removal, so it grows monotonically even as cache
//! entries expire.

use super::cache::AsnCache;
use super::{Asn, AsnResolver, Sweep};
use crate::bloom::BloomFilter;
use crate::config::BloomGateConfig;
use crate::error::ResolveError;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// Bloom-gated caching decorator.
pub struct BloomGateResolver {
    inner: Arc<dyn AsnResolver>,
    filter: BloomFilter,
    cache: AsnCache,
}

impl BloomGateResolver {
    /// Create a new gate with a filter sized from configuration.
    pub fn new(inner: Arc<dyn AsnResolver>, config: BloomGateConfig) -> Self {
        Self {
            inner,
            filter: BloomFilter::with_capacity(config.expected_entries, config.false_positive_rate),
            cache: AsnCache::new(&config.cache),
        }
    }

    /// Whether the filter considers this key possibly cached.
    pub fn possibly_cached(&self, ip: &IpAddr) -> bool {
        self.filter.contains(ip)
    }

    /// Drop expired cache entries. The filter keeps its bits; stale filter
    /// hits fall through to a cache miss.
    pub fn cleanup(&self) {
        self.cache.cleanup();
    }

    async fn resolve_and_store(&self, ip: IpAddr) -> Result<Asn, ResolveError> {
        let asn = self.inner.resolve(ip).await?;
        self.cache.insert(ip, asn.clone());
        self.filter.insert(&ip);
        Ok(asn)
    }
}

impl Sweep for BloomGateResolver {
    fn sweep(&self) {
        self.cleanup();
    }
}

#[async_trait]
impl AsnResolver for BloomGateResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<Asn, ResolveError> {
        if !self.filter.contains(&ip) {
            debug!(ip = %ip, "Cold key, bypassing cache lookup");
            return self.resolve_and_store(ip).await;
        }

        if let Some(asn) = self.cache.get(&ip) {
            debug!(ip = %ip, asn = %asn, "Gated cache hit");
            return Ok(asn);
        }

        // Filter false positive or expired entry.
        self.resolve_and_store(ip).await
    }

    fn name(&self) -> &str {
        "bloom-gate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolutionCacheConfig;
    use crate::resolver::test_support::CountingResolver;
    use std::time::Duration;

    fn config(ttl_seconds: u64) -> BloomGateConfig {
        BloomGateConfig {
            expected_entries: 1000,
            false_positive_rate: 0.01,
            cache: ResolutionCacheConfig {
                max_entries: 100,
                ttl_seconds,
            },
        }
    }

    #[tokio::test]
    async fn test_cold_key_resolves_then_hits_cache() {
        let upstream = Arc::new(CountingResolver::returning(Asn::new(64512)));
        let resolver = BloomGateResolver::new(upstream.clone(), config(3600));
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        assert!(!resolver.possibly_cached(&ip));
        assert_eq!(resolver.resolve(ip).await.unwrap().number, 64512);
        assert!(resolver.possibly_cached(&ip));

        assert_eq!(resolver.resolve(ip).await.unwrap().number, 64512);
        assert_eq!(upstream.call_count(), 1);
    }

    #[tokio::test]
    async fn test_no_false_negatives_after_insert() {
        let upstream = Arc::new(CountingResolver::returning(Asn::new(64512)));
        let resolver = BloomGateResolver::new(upstream, config(3600));

        let mut ips = Vec::new();
        for i in 0..200u32 {
            let ip: IpAddr = format!("10.1.{}.{}", i / 256, i % 256).parse().unwrap();
            resolver.resolve(ip).await.unwrap();
            ips.push(ip);
        }

        for ip in &ips {
            assert!(resolver.possibly_cached(ip));
        }
    }

    #[tokio::test]
    async fn test_expired_entry_re_resolves() {
        let upstream = Arc::new(CountingResolver::returning(Asn::new(64512)));
        let resolver = BloomGateResolver::new(upstream.clone(), config(0));
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        resolver.resolve(ip).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Filter still says possibly present, cache misses, upstream again.
        assert!(resolver.possibly_cached(&ip));
        resolver.resolve(ip).await.unwrap();
        assert_eq!(upstream.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_leaves_key_cold() {
        let upstream = Arc::new(CountingResolver::failing());
        let resolver = BloomGateResolver::new(upstream, config(3600));
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        assert!(resolver.resolve(ip).await.is_err());
        assert!(!resolver.possibly_cached(&ip));
    }
}
