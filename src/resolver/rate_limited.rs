//! Fixed-rate admission decorator for ASN resolution.
//!
//! Protects the upstream resolver even on cache misses: a permit must be
//! acquired before delegating, and an exhausted quota surfaces as a
//! rate-limit error rather than a call.

use super::{Asn, AsnResolver};
use crate::config::FixedRateConfig;
use crate::error::ResolveError;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Fixed-rate admission decorator.
pub struct RateLimitedResolver {
    inner: Arc<dyn AsnResolver>,
    limiter: DirectRateLimiter,
}

impl RateLimitedResolver {
    /// Create a new decorator with the configured permit rate.
    pub fn new(inner: Arc<dyn AsnResolver>, config: FixedRateConfig) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.permits_per_second).unwrap_or(NonZeroU32::MIN),
        );

        Self {
            inner,
            limiter: RateLimiter::direct(quota),
        }
    }
}

#[async_trait]
impl AsnResolver for RateLimitedResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<Asn, ResolveError> {
        if self.limiter.check().is_err() {
            debug!(ip = %ip, "Resolution permit denied");
            return Err(ResolveError::RateLimited);
        }

        self.inner.resolve(ip).await
    }

    fn name(&self) -> &str {
        "rate-limited"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::test_support::CountingResolver;

    #[tokio::test]
    async fn test_denies_over_quota_without_delegating() {
        let upstream = Arc::new(CountingResolver::returning(Asn::new(64512)));
        let resolver = RateLimitedResolver::new(
            upstream.clone(),
            FixedRateConfig {
                permits_per_second: 2,
            },
        );
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        // governor's per-second quota admits a burst of `permits_per_second`.
        assert!(resolver.resolve(ip).await.is_ok());
        assert!(resolver.resolve(ip).await.is_ok());

        let err = resolver.resolve(ip).await.unwrap_err();
        assert_eq!(err, ResolveError::RateLimited);
        assert_eq!(upstream.call_count(), 2);
    }

    #[tokio::test]
    async fn test_permits_refill() {
        let upstream = Arc::new(CountingResolver::returning(Asn::new(64512)));
        let resolver = RateLimitedResolver::new(
            upstream,
            FixedRateConfig {
                permits_per_second: 10,
            },
        );
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        for _ in 0..10 {
            assert!(resolver.resolve(ip).await.is_ok());
        }
        assert!(resolver.resolve(ip).await.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        // ~2 permits refilled at 10/sec.
        assert!(resolver.resolve(ip).await.is_ok());
    }
}
