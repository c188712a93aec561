//! Single-use verification challenges.
//!
//! Flagged connections can be asked to complete an out-of-band challenge
//! before proceeding. Tokens are random, bound to a principal, single-use,
//! and expire after a configurable timeout.

use crate::config::ChallengeConfig;
use crate::error::RiskError;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::debug;

const TOKEN_LENGTH: usize = 32;

#[derive(Debug)]
struct Challenge {
    principal: String,
    created_at: Instant,
}

/// Issues and validates single-use challenge tokens.
pub struct ChallengeManager {
    pending: DashMap<String, Challenge>,
    timeout: Duration,
}

impl ChallengeManager {
    /// Create a manager from configuration.
    pub fn new(config: &ChallengeConfig) -> Self {
        Self {
            pending: DashMap::new(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    /// Issue a fresh challenge token bound to a principal.
    pub fn generate(&self, principal: &str) -> String {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();

        self.pending.insert(
            token.clone(),
            Challenge {
                principal: principal.to_string(),
                created_at: Instant::now(),
            },
        );
        debug!(principal = %principal, "Challenge issued");
        token
    }

    /// Consume a challenge token, returning the bound principal.
    ///
    /// The token is removed whether or not it is still valid, so a second
    /// attempt with the same token always fails.
    pub fn validate(&self, token: &str) -> Result<String, RiskError> {
        let (_, challenge) = self
            .pending
            .remove(token)
            .ok_or(RiskError::ChallengeInvalid)?;

        if challenge.created_at.elapsed() > self.timeout {
            debug!(principal = %challenge.principal, "Challenge expired");
            return Err(RiskError::ChallengeInvalid);
        }

        debug!(principal = %challenge.principal, "Challenge completed");
        Ok(challenge.principal)
    }

    /// Drop expired challenges. Called by the maintenance sweep.
    pub fn sweep(&self) {
        self.pending
            .retain(|_, challenge| challenge.created_at.elapsed() <= self.timeout);
    }

    /// Number of outstanding challenges.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
