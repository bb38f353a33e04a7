//! Bloom filter for SSTable lookups.

use xxhash_rust::xxh64::xxh64;

const SEED_A: u64 = 0;
const SEED_B: u64 = 0x9E37_79B9_7F4A_7C15;

/// Probabilistic set membership: no false negatives, tunable false positives.
///
/// Sized from the expected key count `n` and target false-positive rate `p`:
/// `m = -n·ln(p) / ln(2)²` bits and `k = (m/n)·ln(2)` probes. Probe `i` sets
/// bit `(h1 + i·h2) mod m` (double hashing over two seeded xxh64 hashes).
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Filter for about `expected_keys` keys at `fp_rate`.
    pub fn new(expected_keys: usize, fp_rate: f64) -> Self {
        let n = expected_keys.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;

        let num_bits = ((-n * fp_rate.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().clamp(1.0, 30.0) as u32;

        Self {
            bits: vec![0; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
        }
    }

    /// Filter holding exactly `keys`.
    pub fn from_keys<'a>(keys: impl ExactSizeIterator<Item = &'a [u8]>, fp_rate: f64) -> Self {
        let mut filter = Self::new(keys.len(), fp_rate);
        for key in keys {
            filter.insert(key);
        }
        filter
    }

    pub fn insert(&mut self, key: &[u8]) {
        for bit in self.probes(key) {
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    /// `false` means definitely absent.
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.probes(key)
            .all(|bit| self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0)
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn probes(&self, key: &[u8]) -> impl Iterator<Item = u64> {
        let h1 = xxh64(key, SEED_A);
        let h2 = xxh64(key, SEED_B) | 1;
        let m = self.num_bits;
        (0..self.num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
    }
}
