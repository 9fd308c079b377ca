pub mod builder;

pub use builder::BloomFilterBuilder;

use xxhash_rust::xxh3::xxh3_128;

use crate::coding::{decode_fixed32, decode_fixed64, put_fixed32, put_fixed64};
use crate::error::{Error, Result};

/// Probabilistic data structure: "is this key in the set?"
///
/// - If any bit is 0 → key is DEFINITELY NOT in the set
/// - If all bits are 1 → key is PROBABLY in the set (false positive possible)
///
/// Each table carries one filter over the user keys of all its entries, so a
/// point lookup that misses the filter skips the index and data blocks.
///
/// Sizing:
///   bits_per_key = -1.44 * log2(false_positive_rate)
///   num_hashes = bits_per_key * ln(2)
///
///   1% FPR  → ~10 bits/key, 7 hashes
///   0.1% FPR → ~14 bits/key, 10 hashes
///
/// Double hashing: h_i(key) = h1(key) + i * h2(key) (mod m), where h1 and h2
/// are the two halves of a 128-bit xxh3 hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: u32,
    num_bits: u32,
}

/// num_hashes (u32) + num_bits (u32)
const HEADER_LEN: usize = 8;

impl BloomFilter {
    /// Create an empty filter sized for `expected_items` at the given FPR.
    ///
    /// Returns `InvalidArgument` if the FPR is not in (0, 1).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Result<Self> {
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(Error::invalid_argument(format!(
                "bloom false positive rate {false_positive_rate} not in (0, 1)"
            )));
        }

        let bits_per_key = -1.44 * false_positive_rate.log2();
        let num_bits = ((expected_items.max(1) as f64) * bits_per_key).ceil() as u32;
        let num_bits = num_bits.max(64);

        let num_hashes = (bits_per_key * 2.0f64.ln()).ceil() as u32;
        let num_hashes = num_hashes.clamp(1, 30);

        let num_u64s = (num_bits as usize).div_ceil(64);
        Ok(Self {
            bits: vec![0u64; num_u64s],
            num_hashes,
            num_bits,
        })
    }

    /// Add a key to the bloom filter.
    pub fn insert(&mut self, key: &[u8]) {
        self.insert_hash(xxh3_128(key));
    }

    pub(crate) fn insert_hash(&mut self, hash: u128) {
        let (h1, h2) = split(hash);
        for i in 0..self.num_hashes {
            let pos = self.position(h1, h2, i);
            self.set_bit(pos);
        }
    }

    /// false → definitely not here. true → probably here.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = split(xxh3_128(key));
        (0..self.num_hashes).all(|i| self.check_bit(self.position(h1, h2, i)))
    }

    /// Encoding: num_hashes u32 LE, num_bits u32 LE, then the bit array as
    /// u64 LE words.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.bits.len() * 8);
        put_fixed32(&mut out, self.num_hashes);
        put_fixed32(&mut out, self.num_bits);
        for word in &self.bits {
            put_fixed64(&mut out, *word);
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::corruption("bloom filter too short"));
        }
        let num_hashes = decode_fixed32(&data[0..4]);
        let num_bits = decode_fixed32(&data[4..8]);
        if num_hashes == 0 || num_bits == 0 {
            return Err(Error::corruption("bloom filter with zero hashes or bits"));
        }
        let words = &data[HEADER_LEN..];
        let expected = (num_bits as usize).div_ceil(64);
        if words.len() != expected * 8 {
            return Err(Error::corruption(format!(
                "bloom filter has {} bytes of bits, expected {}",
                words.len(),
                expected * 8
            )));
        }
        let bits = words.chunks_exact(8).map(decode_fixed64).collect();
        Ok(Self {
            bits,
            num_hashes,
            num_bits,
        })
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    fn position(&self, h1: u64, h2: u64, i: u32) -> u32 {
        let i = i as u64;
        (h1.wrapping_add(i.wrapping_mul(h2)) % (self.num_bits as u64)) as u32
    }

    fn set_bit(&mut self, pos: u32) {
        self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
    }

    fn check_bit(&self, pos: u32) -> bool {
        (self.bits[(pos / 64) as usize] >> (pos % 64)) & 1 == 1
    }
}

fn split(hash: u128) -> (u64, u64) {
    (hash as u64, (hash >> 64) as u64)
}
