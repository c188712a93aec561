//! Per-ASN reputation tracking with time decay.
//!
//! Suspicious and legitimate activity counters accumulate per ASN; the
//! score is the legitimate fraction of all observed activity. A periodic
//! decay pass shrinks counters that have not been touched recently so
//! dormant ASNs drift back toward neutral instead of being judged forever
//! by old evidence.

use crate::config::ReputationConfig;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Score reported for an ASN with no recorded activity.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Per-ASN trust state. Counters are non-negative by construction and only
/// shrink through decay.
#[derive(Debug, Default)]
struct ReputationEntry {
    suspicious: AtomicU64,
    legitimate: AtomicU64,
    /// Unix seconds of the last activity record or decay pass.
    last_updated: AtomicU64,
}

/// Thread-safe ASN reputation tracker.
pub struct ReputationTracker {
    entries: DashMap<u32, ReputationEntry>,
    decay_factor: f64,
    staleness_seconds: u64,
    decaying: AtomicBool,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl ReputationTracker {
    /// Create a tracker from configuration.
    pub fn new(config: &ReputationConfig) -> Self {
        Self {
            entries: DashMap::new(),
            decay_factor: config.decay_factor,
            staleness_seconds: config.staleness_seconds,
            decaying: AtomicBool::new(false),
        }
    }

    /// Record one activity observation for an ASN, creating a neutral entry
    /// on first sight.
    pub fn record_activity(&self, asn: u32, suspicious: bool) {
        let entry = self.entries.entry(asn).or_default();
        if suspicious {
            entry.suspicious.fetch_add(1, Ordering::Relaxed);
        } else {
            entry.legitimate.fetch_add(1, Ordering::Relaxed);
        }
        entry.last_updated.store(unix_now(), Ordering::Relaxed);
    }

    /// Reputation score in [0, 1]: legitimate / (legitimate + suspicious),
    /// or [`NEUTRAL_SCORE`] for unknown ASNs and zero totals.
    pub fn score(&self, asn: u32) -> f64 {
        match self.entries.get(&asn) {
            Some(entry) => {
                let legitimate = entry.legitimate.load(Ordering::Relaxed);
                let suspicious = entry.suspicious.load(Ordering::Relaxed);
                let total = legitimate + suspicious;
                if total == 0 {
                    NEUTRAL_SCORE
                } else {
                    legitimate as f64 / total as f64
                }
            }
            None => NEUTRAL_SCORE,
        }
    }

    /// Decay all stale entries, multiplying both counters by the decay
    /// factor and truncating toward zero.
    ///
    /// Refuses to run concurrently with itself; activity recorded while a
    /// pass is in flight lands before or after the per-entry update, either
    /// order being acceptable.
    pub fn apply_decay(&self) {
        if self.decaying.swap(true, Ordering::Acquire) {
            debug!("Reputation decay already running, skipping");
            return;
        }

        let now = unix_now();
        let mut decayed = 0usize;

        for entry in self.entries.iter() {
            let last = entry.last_updated.load(Ordering::Relaxed);
            if now.saturating_sub(last) <= self.staleness_seconds {
                continue;
            }

            let suspicious = entry.suspicious.load(Ordering::Relaxed);
            let legitimate = entry.legitimate.load(Ordering::Relaxed);
            entry
                .suspicious
                .store((suspicious as f64 * self.decay_factor) as u64, Ordering::Relaxed);
            entry
                .legitimate
                .store((legitimate as f64 * self.decay_factor) as u64, Ordering::Relaxed);
            entry.last_updated.store(now, Ordering::Relaxed);
            decayed += 1;
        }

        if decayed > 0 {
            debug!(entries = decayed, "Reputation decay applied");
        }

        self.decaying.store(false, Ordering::Release);
    }

    /// Number of tracked ASNs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any ASN is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn backdate(&self, asn: u32, seconds: u64) {
        if let Some(entry) = self.entries.get(&asn) {
            entry
                .last_updated
                .store(unix_now().saturating_sub(seconds), Ordering::Relaxed);
        }
    }
}
