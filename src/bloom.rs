//! Lock-free Bloom filter.
//!
//! Shared by the probabilistic-gate resolver cache and the JTI replay store.
//! No false negatives: any inserted item is always reported as possibly
//! present. False-positive rate is tunable at construction; there is no
//! removal, so the approximate set only grows.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Seed mixed into the second hash so the two index streams are independent.
const SECOND_HASH_SEED: u64 = 0x51_7c_c1_b7_27_22_0a_95;

/// Thread-safe Bloom filter over an atomic bit array.
pub struct BloomFilter {
    bits: Vec<AtomicU64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Size the filter for an expected item count and target false-positive
    /// rate. `false_positive_rate` must be in (0, 1).
    pub fn with_capacity(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);

        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;

        let words = num_bits.div_ceil(64) as usize;
        let mut bits = Vec::with_capacity(words);
        bits.resize_with(words, || AtomicU64::new(0));

        Self {
            bits,
            num_bits,
            num_hashes,
        }
    }

    /// Insert an item. Never fails, never evicts.
    pub fn insert<T: Hash + ?Sized>(&self, item: &T) {
        let (h1, h2) = self.hash_pair(item);
        for i in 0..self.num_hashes {
            let bit = self.bit_index(h1, h2, i);
            let (word, mask) = (bit / 64, 1u64 << (bit % 64));
            self.bits[word as usize].fetch_or(mask, Ordering::Relaxed);
        }
    }

    /// Check membership. `false` means definitely absent; `true` means
    /// possibly present.
    pub fn contains<T: Hash + ?Sized>(&self, item: &T) -> bool {
        let (h1, h2) = self.hash_pair(item);
        for i in 0..self.num_hashes {
            let bit = self.bit_index(h1, h2, i);
            let (word, mask) = (bit / 64, 1u64 << (bit % 64));
            if self.bits[word as usize].load(Ordering::Relaxed) & mask == 0 {
                return false;
            }
        }
        true
    }

    /// Number of bits in the filter.
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of hash functions applied per item.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn hash_pair<T: Hash + ?Sized>(&self, item: &T) -> (u64, u64) {
        let mut hasher = DefaultHasher::new();
        item.hash(&mut hasher);
        let h1 = hasher.finish();

        let mut hasher = DefaultHasher::new();
        hasher.write_u64(SECOND_HASH_SEED);
        item.hash(&mut hasher);
        // Force h2 odd so the probe sequence covers the full bit range.
        let h2 = hasher.finish() | 1;

        (h1, h2)
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .finish()
    }
}
