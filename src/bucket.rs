//! # Stage: Hashing / Assignment Function
//!
//! ## Responsibility
//! Maps a `(test_name, subject_id)` pair to a reproducible pseudo-random
//! bucket value in `[0, 1)`. The bucket is the only source of randomness in
//! variant assignment, so the same subject always lands on the same variant
//! for the lifetime of a test definition.
//!
//! ## Guarantees
//! - Deterministic across process restarts: pure function of its inputs
//! - No dependency on wall-clock time, insertion order, or global counters
//! - Total: any pair of strings (including empty ones) yields a valid bucket
//!
//! ## NOT Responsible For
//! - Choosing a variant from the bucket (see `registry`)
//! - Persisting assignments (external cookie store / KV concern)

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the raw bytes. Stable, allocation-free, well distributed
/// for short ASCII keys like `"pricing_page_layout:anon_4f3a..."`.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Map a 64-bit hash onto `[0, 1)`.
///
/// Only the top 53 bits are used: dividing the full u64 by 2^64 rounds
/// hashes within ~2^10 of `u64::MAX` up to exactly 1.0, breaking the
/// half-open contract. 53 bits fit an f64 mantissa exactly, so the result
/// is always strictly below 1.0.
fn normalize(hash: u64) -> f64 {
    (hash >> 11) as f64 / (1u64 << 53) as f64
}

/// Deterministic bucket in `[0, 1)` for a `(test, subject)` pair.
///
/// The test name is part of the key so a subject's bucket differs between
/// tests — otherwise every 50/50 test would split the population along the
/// same boundary and variants would be perfectly correlated across tests.
pub fn bucket(test_name: &str, subject_id: &str) -> f64 {
    let mut key = Vec::with_capacity(test_name.len() + subject_id.len() + 1);
    key.extend_from_slice(test_name.as_bytes());
    key.push(b':');
    key.extend_from_slice(subject_id.as_bytes());
    normalize(fnv1a(&key))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ===== determinism =====

    #[test]
    fn test_bucket_is_deterministic() {
        let a = bucket("landing_page_hero", "anon_abc123");
        for _ in 0..10 {
            assert_eq!(bucket("landing_page_hero", "anon_abc123"), a);
        }
    }

    #[test]
    fn test_bucket_differs_across_tests() {
        let a = bucket("landing_page_hero", "anon_abc123");
        let b = bucket("pricing_page_layout", "anon_abc123");
        assert_ne!(a, b);
    }

    #[test]
    fn test_bucket_differs_across_subjects() {
        let a = bucket("cta_button_text", "subject_1");
        let b = bucket("cta_button_text", "subject_2");
        assert_ne!(a, b);
    }

    // ===== range and edge cases =====

    #[test]
    fn test_bucket_empty_subject_is_valid() {
        let v = bucket("cta_button_text", "");
        assert!((0.0..1.0).contains(&v));
        assert_eq!(bucket("cta_button_text", ""), v);
    }

    #[test]
    fn test_bucket_empty_both_is_valid() {
        let v = bucket("", "");
        assert!((0.0..1.0).contains(&v));
    }

    #[test]
    fn test_normalize_extremes_stay_half_open() {
        // Hashes near u64::MAX would round up to exactly 1.0 if the full
        // 64 bits were divided by 2^64.
        assert!(normalize(u64::MAX) < 1.0);
        assert!(normalize(u64::MAX - 1023) < 1.0);
        assert_eq!(normalize(0), 0.0);
    }

    #[test]
    fn test_normalize_is_monotone_in_high_bits() {
        assert!(normalize(u64::MAX / 4) < normalize(u64::MAX / 2));
        assert!(normalize(u64::MAX / 2) < normalize(u64::MAX));
    }

    proptest! {
        #[test]
        fn prop_bucket_in_unit_interval(test in ".*", subject in ".*") {
            let v = bucket(&test, &subject);
            prop_assert!((0.0..1.0).contains(&v));
        }

        #[test]
        fn prop_bucket_deterministic(test in ".*", subject in ".*") {
            prop_assert_eq!(bucket(&test, &subject), bucket(&test, &subject));
        }
    }

    // ===== distribution sanity =====

    #[test]
    fn test_bucket_roughly_uniform() {
        let n = 20_000;
        let below_half = (0..n)
            .filter(|i| bucket("uniformity_check", &format!("subject_{i}")) < 0.5)
            .count();
        let frac = below_half as f64 / n as f64;
        assert!((frac - 0.5).abs() < 0.02, "fraction below 0.5 was {frac}");
    }
}
