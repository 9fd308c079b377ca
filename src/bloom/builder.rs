use xxhash_rust::xxh3::xxh3_128;

use crate::bloom::BloomFilter;
use crate::error::Result;

/// Collects key hashes while a table is being written and sizes the filter
/// once the final key count is known.
///
/// Usage during table build:
/// 1. Create BloomFilterBuilder with the target false positive rate
/// 2. Call add_key() for every key written to the table
/// 3. Call build() to get the final BloomFilter for serialization
pub struct BloomFilterBuilder {
    hashes: Vec<u128>,
    false_positive_rate: f64,
}

impl BloomFilterBuilder {
    pub fn new(false_positive_rate: f64) -> Self {
        Self {
            hashes: Vec::new(),
            false_positive_rate,
        }
    }

    /// Consecutive duplicates (several versions of one user key) are stored
    /// once.
    pub fn add_key(&mut self, key: &[u8]) {
        let hash = xxh3_128(key);
        if self.hashes.last() != Some(&hash) {
            self.hashes.push(hash);
        }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn build(self) -> Result<BloomFilter> {
        let mut filter = BloomFilter::new(self.hashes.len(), self.false_positive_rate)?;
        for hash in self.hashes {
            filter.insert_hash(hash);
        }
        Ok(filter)
    }
}
