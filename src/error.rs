//! Error taxonomy for the risk pipeline.
//!
//! All errors here are per-request, recoverable conditions. Nothing in this
//! module is fatal to the process.

use std::time::Duration;

/// Error from an ASN resolution attempt.
///
/// Cloneable so a single-flighted failure can be fanned out to every caller
/// waiting on the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Upstream lookup failed (network, DNS, parse).
    Lookup(String),
    /// Upstream lookup timed out.
    Timeout,
    /// An admission decorator denied the lookup.
    RateLimited,
    /// Upstream answered with something we could not interpret.
    InvalidResponse(String),
    /// A backing store (cache, shared counter store) was unavailable.
    StoreUnavailable(String),
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::Lookup(msg) => write!(f, "lookup failed: {}", msg),
            ResolveError::Timeout => write!(f, "lookup timed out"),
            ResolveError::RateLimited => write!(f, "resolution rate limit exceeded"),
            ResolveError::InvalidResponse(msg) => write!(f, "invalid response: {}", msg),
            ResolveError::StoreUnavailable(msg) => write!(f, "store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ResolveError {}

impl From<reqwest::Error> for ResolveError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ResolveError::Timeout
        } else {
            ResolveError::Lookup(e.to_string())
        }
    }
}

/// Error surfaced by the risk engine and its admission components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskError {
    /// ASN resolution failed. Callers treat this as "reputation unknown".
    Resolution(ResolveError),
    /// Per-origin admission denied.
    RateLimitExceeded,
    /// Login throttled; `retry_after` is the remaining wait.
    TooManyAttempts { retry_after: Duration },
    /// Challenge expired, already consumed, or never issued. One
    /// undifferentiated kind at the API boundary.
    ChallengeInvalid,
}

impl std::fmt::Display for RiskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskError::Resolution(e) => write!(f, "resolution failed: {}", e),
            RiskError::RateLimitExceeded => write!(f, "rate limit exceeded"),
            RiskError::TooManyAttempts { retry_after } => {
                write!(f, "too many attempts, retry in {:.1}s", retry_after.as_secs_f64())
            }
            RiskError::ChallengeInvalid => write!(f, "challenge expired or invalid"),
        }
    }
}

impl std::error::Error for RiskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RiskError::Resolution(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ResolveError> for RiskError {
    fn from(e: ResolveError) -> Self {
        RiskError::Resolution(e)
    }
}
