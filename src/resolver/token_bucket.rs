//! Token-bucket admission decorator.
//!
//! Alternative to the fixed-rate wrapper with an explicit bucket: capacity
//! and refill rate are configurable, and accounting is lock-free via
//! compare-and-swap on atomic counters.

use super::{Asn, AsnResolver};
use crate::config::TokenBucketConfig;
use crate::error::ResolveError;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Micro-tokens per token, so refill amounts stay integral.
const TOKEN_SCALE: u64 = 1_000_000;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Lock-free token bucket.
///
/// Tokens are tracked in micro-token units. Refill is folded in lazily on
/// each acquisition attempt by whichever caller wins the timestamp CAS.
pub struct TokenBucket {
    capacity: u64,
    refill_per_sec: u64,
    tokens: AtomicU64,
    last_refill_ns: AtomicU64,
    origin: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_per_second: u32) -> Self {
        let capacity = u64::from(capacity) * TOKEN_SCALE;
        Self {
            capacity,
            refill_per_sec: u64::from(refill_per_second) * TOKEN_SCALE,
            tokens: AtomicU64::new(capacity),
            last_refill_ns: AtomicU64::new(0),
            origin: Instant::now(),
        }
    }

    /// Try to consume one token. Never blocks.
    pub fn try_acquire(&self) -> bool {
        self.refill();

        loop {
            let current = self.tokens.load(Ordering::Acquire);
            if current < TOKEN_SCALE {
                return false;
            }
            if self
                .tokens
                .compare_exchange(
                    current,
                    current - TOKEN_SCALE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Tokens currently available, rounded down.
    pub fn available(&self) -> u64 {
        self.refill();
        self.tokens.load(Ordering::Acquire) / TOKEN_SCALE
    }

    fn refill(&self) {
        let now_ns = self.origin.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
        let last = self.last_refill_ns.load(Ordering::Acquire);
        if now_ns <= last {
            return;
        }

        let elapsed = u128::from(now_ns - last);
        let earned = (elapsed * u128::from(self.refill_per_sec) / NANOS_PER_SEC) as u64;
        if earned == 0 {
            // Leave the timestamp untouched so the sub-token remainder
            // keeps accruing; advancing it here would discard the interval.
            return;
        }

        // Advance the timestamp only by the interval actually converted to
        // tokens (rounded up, never past now_ns) so remainders carry over.
        let consumed_ns = (u128::from(earned) * NANOS_PER_SEC)
            .div_ceil(u128::from(self.refill_per_sec))
            .min(elapsed) as u64;

        // Only the CAS winner credits the elapsed interval; losers see the
        // updated timestamp and add nothing.
        if self
            .last_refill_ns
            .compare_exchange(last, last + consumed_ns, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        loop {
            let current = self.tokens.load(Ordering::Acquire);
            let next = current.saturating_add(earned).min(self.capacity);
            if self
                .tokens
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }
}

/// Token-bucket admission decorator.
pub struct TokenBucketResolver {
    inner: Arc<dyn AsnResolver>,
    bucket: TokenBucket,
}

impl TokenBucketResolver {
    /// Create a new decorator with the configured bucket.
    pub fn new(inner: Arc<dyn AsnResolver>, config: TokenBucketConfig) -> Self {
        Self {
            inner,
            bucket: TokenBucket::new(config.capacity, config.refill_per_second),
        }
    }
}

#[async_trait]
impl AsnResolver for TokenBucketResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<Asn, ResolveError> {
        if !self.bucket.try_acquire() {
            debug!(ip = %ip, "Token bucket empty");
            return Err(ResolveError::RateLimited);
        }

        self.inner.resolve(ip).await
    }

    fn name(&self) -> &str {
        "token-bucket"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::test_support::CountingResolver;
    use std::time::Duration;

    #[test]
    fn test_bucket_capacity_then_refill() {
        let bucket = TokenBucket::new(100, 10);

        for i in 0..100 {
            assert!(bucket.try_acquire(), "acquisition {} should succeed", i);
        }
        assert!(!bucket.try_acquire(), "101st acquisition should fail");

        std::thread::sleep(Duration::from_secs(1));

        let mut refilled = 0;
        while bucket.try_acquire() {
            refilled += 1;
        }
        assert!(refilled >= 10, "expected at least 10 refilled, got {}", refilled);
        assert!(refilled <= 13, "refill overshot capacity math: {}", refilled);
    }

    #[test]
    fn test_rapid_polling_does_not_stall_refill() {
        // Tight polling produces many refill calls whose individual elapsed
        // interval earns zero tokens. Those intervals must still accumulate
        // rather than being discarded by each poll.
        let bucket = TokenBucket::new(1, 10);
        assert!(bucket.try_acquire());

        let deadline = Instant::now() + Duration::from_millis(350);
        let mut acquired = 0;
        while Instant::now() < deadline {
            if bucket.try_acquire() {
                acquired += 1;
            }
        }

        // 10 tokens/sec over 350ms earns 3 full tokens.
        assert!(acquired >= 2, "refill stalled under polling: {}", acquired);
        assert!(acquired <= 4, "refill overshot: {}", acquired);
    }

    #[test]
    fn test_bucket_never_exceeds_capacity() {
        let bucket = TokenBucket::new(5, 1000);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(bucket.available(), 5);
    }

    #[test]
    fn test_bucket_concurrent_acquisitions_bounded() {
        let bucket = Arc::new(TokenBucket::new(50, 1));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let bucket = bucket.clone();
            handles.push(std::thread::spawn(move || {
                (0..20).filter(|_| bucket.try_acquire()).count()
            }));
        }

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(granted <= 51, "granted more than capacity: {}", granted);
        assert!(granted >= 50, "lost tokens under contention: {}", granted);
    }

    #[tokio::test]
    async fn test_resolver_denies_when_empty() {
        let upstream = Arc::new(CountingResolver::returning(Asn::new(64512)));
        let resolver = TokenBucketResolver::new(
            upstream.clone(),
            TokenBucketConfig {
                capacity: 2,
                refill_per_second: 1,
            },
        );
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        assert!(resolver.resolve(ip).await.is_ok());
        assert!(resolver.resolve(ip).await.is_ok());
        assert_eq!(
            resolver.resolve(ip).await.unwrap_err(),
            ResolveError::RateLimited
        );
        assert_eq!(upstream.call_count(), 2);
    }
}
