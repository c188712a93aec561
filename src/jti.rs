//! Token replay prevention keyed by JWT ID.
//!
//! Seen token IDs are held until their expiry so a replayed token is
//! rejected even within its validity window. A Bloom filter fronts the
//! exact index: a filter miss proves the ID was never stored and skips the
//! lock entirely, which covers the overwhelmingly common case of forged or
//! foreign IDs.

use crate::bloom::BloomFilter;
use crate::config::JtiConfig;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct JtiIndex {
    /// Expiry in unix milliseconds to the IDs expiring at that instant.
    by_expiry: BTreeMap<u64, Vec<String>>,
    /// ID to its expiry in unix milliseconds.
    ids: HashMap<String, u64>,
}

impl JtiIndex {
    /// Remove every ID whose expiry is at or before `now_millis`.
    fn purge(&mut self, now_millis: u64) -> usize {
        let live = self.by_expiry.split_off(&(now_millis + 1));
        let expired = std::mem::replace(&mut self.by_expiry, live);

        let mut removed = 0;
        for ids in expired.values() {
            for id in ids {
                self.ids.remove(id);
                removed += 1;
            }
        }
        removed
    }
}

/// Replay-prevention store for token IDs.
pub struct JtiStore {
    filter: BloomFilter,
    index: Mutex<JtiIndex>,
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl JtiStore {
    /// Create a store sized for the configured token volume.
    pub fn new(config: &JtiConfig) -> Self {
        Self {
            filter: BloomFilter::with_capacity(config.expected_tokens, config.false_positive_rate),
            index: Mutex::new(JtiIndex::default()),
        }
    }

    /// Record a token ID as seen until `ttl` from now.
    pub fn store(&self, id: &str, ttl: Duration) {
        let expires = unix_millis().saturating_add(ttl.as_millis() as u64);
        self.filter.insert(id.as_bytes());

        match self.index.lock() {
            Ok(mut index) => {
                index.ids.insert(id.to_string(), expires);
                index
                    .by_expiry
                    .entry(expires)
                    .or_default()
                    .push(id.to_string());
            }
            Err(_) => warn!(jti = %id, "JTI index lock poisoned, token not recorded"),
        }
    }

    /// Whether a token ID was stored and has not yet expired.
    ///
    /// A filter miss short-circuits to false without taking the lock. On a
    /// poisoned lock the store fails closed and reports the ID as unseen,
    /// which callers treat as a replay.
    pub fn is_valid(&self, id: &str) -> bool {
        if !self.filter.contains(id.as_bytes()) {
            return false;
        }

        match self.index.lock() {
            Ok(mut index) => {
                index.purge(unix_millis());
                index.ids.contains_key(id)
            }
            Err(_) => {
                warn!(jti = %id, "JTI index lock poisoned, treating token as unseen");
                false
            }
        }
    }

    /// Drop expired IDs from the exact index. Called by the maintenance
    /// sweep; the Bloom filter keeps its bits until process restart.
    pub fn purge_expired(&self) {
        if let Ok(mut index) = self.index.lock() {
            let removed = index.purge(unix_millis());
            if removed > 0 {
                debug!(removed, "Purged expired token IDs");
            }
        }
    }

    /// Number of unexpired IDs in the exact index.
    pub fn len(&self) -> usize {
        self.index.lock().map(|index| index.ids.len()).unwrap_or(0)
    }

    /// Whether the exact index is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
