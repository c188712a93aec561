//! Login attempt throttling with exponential backoff.
//!
//! Per-principal failure state, independent from the IP limiter. The
//! required wait after `n` failures is `2^(n-1)` seconds since the last
//! failure; growth is uncapped but state expires after the configured TTL,
//! which acts as an implicit amnesty.

use crate::config::LoginConfig;
use crate::error::RiskError;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct AttemptRecord {
    failures: u32,
    last_failure: Instant,
}

/// Per-principal login throttle.
pub struct LoginThrottle {
    attempts: DashMap<String, AttemptRecord>,
    max_attempts: u32,
    ttl: Duration,
}

impl LoginThrottle {
    /// Create a throttle from configuration.
    pub fn new(config: &LoginConfig) -> Self {
        Self {
            attempts: DashMap::new(),
            max_attempts: config.max_attempts,
            ttl: Duration::from_secs(config.ttl_seconds),
        }
    }

    /// Required backoff after `failures` failed attempts.
    fn required_wait(failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(63);
        Duration::from_secs(1u64 << exponent)
    }

    /// Gate an authentication attempt.
    ///
    /// Fails with [`RiskError::TooManyAttempts`] carrying the remaining
    /// wait when the principal's backoff period has not yet elapsed.
    pub fn wait_if_required(&self, principal: &str) -> Result<(), RiskError> {
        let record = match self.attempts.get(principal) {
            Some(record) => record.clone(),
            None => return Ok(()),
        };

        if record.last_failure.elapsed() >= self.ttl {
            drop(record);
            self.attempts.remove(principal);
            return Ok(());
        }

        if record.failures == 0 {
            return Ok(());
        }

        let wait = Self::required_wait(record.failures);
        let elapsed = record.last_failure.elapsed();
        if elapsed < wait {
            let retry_after = wait - elapsed;
            debug!(
                principal = %principal,
                failures = record.failures,
                retry_after_secs = retry_after.as_secs_f64(),
                "Login attempt throttled"
            );
            return Err(RiskError::TooManyAttempts { retry_after });
        }

        Ok(())
    }

    /// Record a failed attempt, starting or extending the backoff.
    pub fn record_failure(&self, principal: &str) {
        let mut entry = self
            .attempts
            .entry(principal.to_string())
            .or_insert(AttemptRecord {
                failures: 0,
                last_failure: Instant::now(),
            });

        let record = entry.value_mut();
        if record.last_failure.elapsed() >= self.ttl {
            record.failures = 0;
        }
        record.failures += 1;
        record.last_failure = Instant::now();
    }

    /// Clear the principal's failure state. Called on successful
    /// authentication by the caller.
    pub fn record_success(&self, principal: &str) {
        self.attempts.remove(principal);
    }

    /// Whether the principal has reached the failure ceiling.
    pub fn is_blocked(&self, principal: &str) -> bool {
        self.attempts
            .get(principal)
            .map(|record| {
                record.failures >= self.max_attempts && record.last_failure.elapsed() < self.ttl
            })
            .unwrap_or(false)
    }

    /// Drop expired attempt state. Called by the maintenance sweep.
    pub fn sweep(&self) {
        self.attempts
            .retain(|_, record| record.last_failure.elapsed() < self.ttl);
    }

    /// Number of principals with live failure state.
    pub fn tracked_principals(&self) -> usize {
        self.attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(max_attempts: u32) -> LoginThrottle {
        LoginThrottle::new(&LoginConfig {
            max_attempts,
            ttl_seconds: 3600,
            sweep_interval_seconds: 300,
        })
    }

    fn backdate(throttle: &LoginThrottle, principal: &str, seconds: u64) {
        if let Some(mut record) = throttle.attempts.get_mut(principal) {
            record.last_failure = Instant::now() - Duration::from_secs(seconds);
        }
    }

    #[test]
    fn test_unknown_principal_passes() {
        let throttle = throttle(10);
        assert!(throttle.wait_if_required("alice").is_ok());
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(LoginThrottle::required_wait(1), Duration::from_secs(1));
        assert_eq!(LoginThrottle::required_wait(2), Duration::from_secs(2));
        assert_eq!(LoginThrottle::required_wait(3), Duration::from_secs(4));
        assert_eq!(LoginThrottle::required_wait(4), Duration::from_secs(8));
    }

    #[test]
    fn test_first_failure_requires_one_second() {
        let throttle = throttle(10);
        throttle.record_failure("alice");

        let err = throttle.wait_if_required("alice").unwrap_err();
        match err {
            RiskError::TooManyAttempts { retry_after } => {
                assert!(retry_after <= Duration::from_secs(1));
                assert!(retry_after > Duration::from_millis(900));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_wait_elapses() {
        let throttle = throttle(10);
        throttle.record_failure("alice");
        backdate(&throttle, "alice", 2);

        assert!(throttle.wait_if_required("alice").is_ok());
    }

    #[test]
    fn test_four_failures_require_eight_seconds() {
        let throttle = throttle(10);
        for _ in 0..4 {
            throttle.record_failure("alice");
        }
        backdate(&throttle, "alice", 7);
        assert!(throttle.wait_if_required("alice").is_err());

        backdate(&throttle, "alice", 8);
        assert!(throttle.wait_if_required("alice").is_ok());
    }

    #[test]
    fn test_blocked_only_at_max_attempts() {
        let throttle = throttle(3);
        throttle.record_failure("alice");
        throttle.record_failure("alice");
        assert!(!throttle.is_blocked("alice"));

        throttle.record_failure("alice");
        assert!(throttle.is_blocked("alice"));
    }

    #[test]
    fn test_success_resets_state() {
        let throttle = throttle(3);
        for _ in 0..3 {
            throttle.record_failure("alice");
        }
        assert!(throttle.is_blocked("alice"));

        throttle.record_success("alice");
        assert!(!throttle.is_blocked("alice"));
        assert!(throttle.wait_if_required("alice").is_ok());
    }

    #[test]
    fn test_ttl_expiry_is_amnesty() {
        let throttle = throttle(3);
        for _ in 0..5 {
            throttle.record_failure("alice");
        }
        backdate(&throttle, "alice", 3601);

        assert!(throttle.wait_if_required("alice").is_ok());
        assert!(!throttle.is_blocked("alice"));
    }

    #[test]
    fn test_sweep_drops_expired() {
        let throttle = throttle(3);
        throttle.record_failure("alice");
        throttle.record_failure("bob");
        backdate(&throttle, "alice", 3601);

        throttle.sweep();
        assert_eq!(throttle.tracked_principals(), 1);
    }

    #[test]
    fn test_principals_are_independent() {
        let throttle = throttle(10);
        throttle.record_failure("alice");

        assert!(throttle.wait_if_required("alice").is_err());
        assert!(throttle.wait_if_required("bob").is_ok());
    }
}
