//! Deterministic bucketing of subjects.
//!
//! The hash must stay bit-for-bit identical to the other Mixpanel SDKs: two libraries evaluating
//! the same flag for the same subject have to land in the same bucket.

// FNV-1a 64-bit constants.
// https://www.ietf.org/archive/id/draft-eastlake-fnv-21.html#section-6.1.2
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;
const FNV_OFFSET: u64 = 0xCBF2_9CE4_8422_2325;

/// Number of buckets the hash space is reduced to.
const TOTAL_BUCKETS: u64 = 100;

/// Assigns subjects to buckets.
pub trait Sharder {
    /// Map `key` mixed with `salt` into `[0, 1)`.
    fn bucket(&self, key: &str, salt: &str) -> f64;
}

/// The default (and only) sharder.
pub struct Fnv1aSharder;

impl Sharder for Fnv1aSharder {
    fn bucket(&self, key: &str, salt: &str) -> f64 {
        normalized_hash(key, salt)
    }
}

/// Compute the FNV-1a 64-bit hash of `data`.
pub fn fnv1a64(data: impl AsRef<[u8]>) -> u64 {
    data.as_ref().iter().fold(FNV_OFFSET, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Hash `key + salt` into a value in `[0, 1)` with a granularity of 1%.
pub fn normalized_hash(key: &str, salt: &str) -> f64 {
    let mut combined = String::with_capacity(key.len() + salt.len());
    combined.push_str(key);
    combined.push_str(salt);

    (fnv1a64(combined) % TOTAL_BUCKETS) as f64 / TOTAL_BUCKETS as f64
}

#[cfg(test)]
pub struct DeterministicSharder(pub std::collections::HashMap<String, f64>);

#[cfg(test)]
impl Sharder for DeterministicSharder {
    fn bucket(&self, key: &str, salt: &str) -> f64 {
        self.0
            .get(&format!("{key}{salt}"))
            .copied()
            .unwrap_or(0.0)
    }
}
