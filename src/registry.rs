//! # Stage: Test Registry & Variant Resolver
//!
//! ## Responsibility
//! Holds the canonical set of test definitions and resolves `(test,
//! subject)` pairs to variants: forced overrides first, then the
//! deterministic cumulative-weight walk over the subject's hash bucket.
//! The unknown-test / inactive-test fallback lives here and only here, so
//! every call site shares one documented fail-open path.
//!
//! ## Guarantees
//! - Definitions are validated at load: resolution at request time is total
//!   and never returns an error for a well-formed subject id
//! - Deterministic: a fixed definition and subject id always resolve to the
//!   same variant, across calls and across process restarts
//! - The registry never mutates test definitions after construction
//!
//! ## NOT Responsible For
//! - Eligibility decisions (see `eligibility`; callers filter first)
//! - Durability of forced overrides (the injected [`OverrideStore`] owns
//!   consistency; a cookie jar, cache, or database behind the trait)

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::eligibility::TargetingRule;
use crate::error::{AbError, AbResult};
use crate::stats::{self, SignificanceResult, VariantCounts};

/// Variant name returned when a test is unknown and has no declared variants
/// to fall back on.
pub const DEFAULT_VARIANT: &str = "control";

/// Forced overrides are written with this TTL hint (30 days, matching the
/// assignment cookie lifetime).
const OVERRIDE_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 30);

// ---------------------------------------------------------------------------
// VariantDef / TestDefinition
// ---------------------------------------------------------------------------

/// One arm of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDef {
    pub name: String,
    /// Relative traffic weight as a fraction; weights of a test are intended
    /// to sum to 1.0.
    pub weight: f64,
    #[serde(default)]
    pub description: String,
}

impl VariantDef {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self { name: name.into(), weight, description: String::new() }
    }
}

/// Definition of a single A/B test. Read-only once loaded into a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    /// Unique test name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Variants in declared order; the first is the safe default.
    pub variants: Vec<VariantDef>,
    /// Inactive tests are never assigned and never reported.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Participation predicate evaluated by the eligibility filter.
    #[serde(default)]
    pub targeting: TargetingRule,
}

fn default_active() -> bool {
    true
}

impl TestDefinition {
    pub fn new(name: impl Into<String>, variants: Vec<VariantDef>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            variants,
            active: true,
            targeting: TargetingRule::default(),
        }
    }

    /// Load-time validation. Rejecting bad weights here keeps the
    /// request-time resolution path total.
    pub fn validate(&self) -> AbResult<()> {
        if self.name.is_empty() {
            return Err(AbError::Configuration("test name must not be empty".into()));
        }
        if self.variants.is_empty() {
            return Err(AbError::Configuration(format!(
                "test '{}' has no variants",
                self.name
            )));
        }
        for v in &self.variants {
            if v.name.is_empty() {
                return Err(AbError::Configuration(format!(
                    "test '{}' has a variant with an empty name",
                    self.name
                )));
            }
            if v.weight < 0.0 {
                return Err(AbError::Configuration(format!(
                    "test '{}' variant '{}' has negative weight {}",
                    self.name, v.name, v.weight
                )));
            }
        }
        let total: f64 = self.variants.iter().map(|v| v.weight).sum();
        if total > 0.0 && (total - 1.0).abs() > 1e-6 {
            warn!(test = %self.name, total, "variant weights do not sum to 1.0");
        }
        Ok(())
    }

    /// The safe default for this test: its first declared variant.
    pub fn default_variant(&self) -> &str {
        self.variants.first().map(|v| v.name.as_str()).unwrap_or(DEFAULT_VARIANT)
    }

    /// Walk the variants in declared order, accumulating weights, and return
    /// the first whose cumulative boundary exceeds `bucket`. The last
    /// variant absorbs any floating-point remainder so a bucket at or above
    /// the final boundary still maps to it.
    ///
    /// A test declared with all-zero weights splits traffic equally.
    pub fn variant_for_bucket(&self, bucket: f64) -> &str {
        let total: f64 = self.variants.iter().map(|v| v.weight).sum();
        let equal_share = 1.0 / self.variants.len() as f64;

        let mut cumulative = 0.0;
        for v in &self.variants {
            cumulative += if total > 0.0 { v.weight } else { equal_share };
            if bucket < cumulative {
                return &v.name;
            }
        }
        // Weights summing below 1.0 leave a gap; the last declared variant
        // absorbs it so every bucket maps to some variant.
        self.variants.last().map(|v| v.name.as_str()).unwrap_or(DEFAULT_VARIANT)
    }
}

// ---------------------------------------------------------------------------
// OverrideStore — injected key-value persistence for forced assignments
// ---------------------------------------------------------------------------

/// Key-value store holding forced variant overrides.
///
/// The registry only issues reads and writes; the implementation owns
/// consistency and durability (in-memory fake for tests, a cookie jar or
/// cache in production). Last write wins under concurrent forcing.
pub trait OverrideStore {
    fn get(&self, key: &str) -> Option<String>;
    /// `ttl` is a hint; implementations without expiry may ignore it.
    fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>);
    fn remove(&mut self, key: &str);
    fn keys(&self) -> Vec<String>;
}

/// In-memory [`OverrideStore`] for tests and single-process embedding.
/// Entries never expire.
#[derive(Debug, Default)]
pub struct MemoryOverrideStore {
    entries: HashMap<String, String>,
}

impl MemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl OverrideStore for MemoryOverrideStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str, _ttl: Option<Duration>) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Storage key for a `(test, subject)` override. An empty subject id is the
/// global anonymous default, used to pin a variant for unauthenticated
/// traffic as a whole.
fn override_key(test_name: &str, subject_id: &str) -> String {
    let subject = if subject_id.is_empty() { "anonymous" } else { subject_id };
    format!("{test_name}_{subject}")
}

// ---------------------------------------------------------------------------
// TestRegistry
// ---------------------------------------------------------------------------

/// The canonical list of test definitions.
///
/// Constructed once at process start and passed by reference to every
/// consumer (middleware, API handlers); there is no ambient global. A fresh
/// registry per test case is cheap.
#[derive(Debug, Clone)]
pub struct TestRegistry {
    tests: HashMap<String, TestDefinition>,
}

impl TestRegistry {
    /// Build a registry from definitions, validating each one. Duplicate
    /// test names and malformed weight sets are rejected here, never at
    /// assignment time.
    pub fn new(definitions: Vec<TestDefinition>) -> AbResult<Self> {
        let mut tests = HashMap::with_capacity(definitions.len());
        for def in definitions {
            def.validate()?;
            if tests.contains_key(&def.name) {
                return Err(AbError::Configuration(format!(
                    "duplicate test name '{}'",
                    def.name
                )));
            }
            tests.insert(def.name.clone(), def);
        }
        Ok(Self { tests })
    }

    /// Registry with no tests; every resolution falls back to the default.
    pub fn empty() -> Self {
        Self { tests: HashMap::new() }
    }

    pub fn get(&self, test_name: &str) -> Option<&TestDefinition> {
        self.tests.get(test_name)
    }

    /// All active test definitions. Order is unspecified.
    pub fn active_tests(&self) -> Vec<&TestDefinition> {
        self.tests.values().filter(|t| t.active).collect()
    }

    pub fn is_test_active(&self, test_name: &str) -> bool {
        self.tests.get(test_name).map(|t| t.active).unwrap_or(false)
    }

    /// Targeting rule for a test, if the registry knows it. `None` means
    /// the eligibility filter falls back to its fail-open default.
    pub fn targeting_rule(&self, test_name: &str) -> Option<&TargetingRule> {
        self.tests.get(test_name).map(|t| &t.targeting)
    }

    // -----------------------------------------------------------------------
    // Variant resolution
    // -----------------------------------------------------------------------

    /// Resolve the variant for `(test, subject)`.
    ///
    /// Precedence:
    /// 1. unknown or inactive test → the safe default variant (never an
    ///    error; assignment must not break the request path)
    /// 2. forced override for this subject (or the anonymous global when the
    ///    subject id is empty) → returned verbatim, hash never consulted
    /// 3. deterministic cumulative-weight walk over the hash bucket
    pub fn resolve_variant(
        &self,
        test_name: &str,
        subject_id: &str,
        overrides: &dyn OverrideStore,
    ) -> String {
        let Some(test) = self.tests.get(test_name) else {
            debug!(test = test_name, "unknown test, returning default variant");
            return DEFAULT_VARIANT.to_string();
        };
        if !test.active {
            debug!(test = test_name, "inactive test, returning default variant");
            return test.default_variant().to_string();
        }

        if let Some(forced) = overrides.get(&override_key(test_name, subject_id)) {
            debug!(test = test_name, subject = subject_id, variant = %forced, "forced override");
            return forced;
        }

        let bucket = crate::bucket::bucket(test_name, subject_id);
        test.variant_for_bucket(bucket).to_string()
    }

    // -----------------------------------------------------------------------
    // Administrative operations
    // -----------------------------------------------------------------------

    /// Pin `variant` for a subject (or for all anonymous traffic when the
    /// subject id is empty). Idempotent: re-forcing the same variant is a
    /// plain overwrite. The variant string is stored verbatim so operators
    /// can pin values outside the declared set for QA.
    pub fn force_variant(
        &self,
        test_name: &str,
        variant: &str,
        subject_id: &str,
        overrides: &mut dyn OverrideStore,
    ) {
        info!(test = test_name, variant, subject = subject_id, "forcing variant");
        overrides.set(&override_key(test_name, subject_id), variant, Some(OVERRIDE_TTL));
    }

    /// Clear every forced override for a subject across all tests. The
    /// deterministic hash path resumes on the next resolution. Resetting an
    /// already-unassigned subject is a no-op. Test definitions are untouched.
    ///
    /// Matching is by key suffix, so a subject id that itself ends with
    /// `_<other-subject>` is also cleared: resetting `"42"` removes an
    /// override stored for subject `"anon_42"`. Inherited behavior; see
    /// DESIGN.md before tightening.
    pub fn reset_subject_variants(&self, subject_id: &str, overrides: &mut dyn OverrideStore) {
        let suffix = format!("_{}", if subject_id.is_empty() { "anonymous" } else { subject_id });
        for key in overrides.keys() {
            if key.ends_with(&suffix) {
                overrides.remove(&key);
            }
        }
        info!(subject = subject_id, "reset subject variants");
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    /// Significance of a treatment arm against control, from externally
    /// supplied count snapshots. Inactive and unknown tests are never
    /// reported.
    pub fn test_results(
        &self,
        test_name: &str,
        control: VariantCounts,
        treatment: VariantCounts,
    ) -> AbResult<SignificanceResult> {
        if !self.is_test_active(test_name) {
            return Err(AbError::InvalidInput(format!(
                "test '{test_name}' is unknown or inactive"
            )));
        }
        stats::calculate_significance(control, treatment)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fifty_fifty(name: &str) -> TestDefinition {
        TestDefinition::new(
            name,
            vec![VariantDef::new("control", 0.5), VariantDef::new("treatment", 0.5)],
        )
    }

    fn registry_with(defs: Vec<TestDefinition>) -> TestRegistry {
        TestRegistry::new(defs).unwrap()
    }

    // ===== validation =====

    #[test]
    fn test_valid_definition_accepted() {
        assert!(fifty_fifty("t1").validate().is_ok());
    }

    #[test]
    fn test_empty_variant_set_rejected() {
        let def = TestDefinition::new("t1", vec![]);
        assert!(matches!(def.validate(), Err(AbError::Configuration(_))));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let def = TestDefinition::new(
            "t1",
            vec![VariantDef::new("control", -0.1), VariantDef::new("treatment", 1.1)],
        );
        assert!(matches!(def.validate(), Err(AbError::Configuration(_))));
    }

    #[test]
    fn test_empty_test_name_rejected() {
        let def = fifty_fifty("");
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_duplicate_test_name_rejected() {
        let err = TestRegistry::new(vec![fifty_fifty("t1"), fifty_fifty("t1")]).unwrap_err();
        assert!(matches!(err, AbError::Configuration(_)));
    }

    #[test]
    fn test_zero_weight_variant_allowed() {
        let def = TestDefinition::new(
            "t1",
            vec![VariantDef::new("control", 1.0), VariantDef::new("dark_launch", 0.0)],
        );
        assert!(def.validate().is_ok());
    }

    // ===== bucket walk =====

    #[test]
    fn test_bucket_walk_boundaries() {
        let def = TestDefinition::new(
            "t1",
            vec![
                VariantDef::new("control", 0.5),
                VariantDef::new("video", 0.3),
                VariantDef::new("testimonial", 0.2),
            ],
        );
        assert_eq!(def.variant_for_bucket(0.0), "control");
        assert_eq!(def.variant_for_bucket(0.49), "control");
        assert_eq!(def.variant_for_bucket(0.5), "video");
        assert_eq!(def.variant_for_bucket(0.79), "video");
        assert_eq!(def.variant_for_bucket(0.8), "testimonial");
        assert_eq!(def.variant_for_bucket(0.999), "testimonial");
    }

    #[test]
    fn test_last_variant_absorbs_float_remainder() {
        // Weights summing just below 1.0 must not fall through.
        let def = TestDefinition::new(
            "t1",
            vec![VariantDef::new("control", 0.3), VariantDef::new("treatment", 0.3)],
        );
        assert_eq!(def.variant_for_bucket(0.95), "treatment");
    }

    #[test]
    fn test_all_zero_weights_split_equally() {
        let def = TestDefinition::new(
            "t1",
            vec![VariantDef::new("a", 0.0), VariantDef::new("b", 0.0)],
        );
        assert_eq!(def.variant_for_bucket(0.25), "a");
        assert_eq!(def.variant_for_bucket(0.75), "b");
    }

    // ===== resolution =====

    #[test]
    fn test_resolution_is_deterministic() {
        let registry = registry_with(vec![fifty_fifty("t1")]);
        let overrides = MemoryOverrideStore::new();
        let first = registry.resolve_variant("t1", "subject_a", &overrides);
        for _ in 0..20 {
            assert_eq!(registry.resolve_variant("t1", "subject_a", &overrides), first);
        }
    }

    #[test]
    fn test_unknown_test_returns_control() {
        let registry = TestRegistry::empty();
        let overrides = MemoryOverrideStore::new();
        assert_eq!(registry.resolve_variant("nonexistent_test", "any", &overrides), "control");
    }

    #[test]
    fn test_inactive_test_returns_declared_default() {
        let mut def = TestDefinition::new(
            "t1",
            vec![VariantDef::new("original", 0.5), VariantDef::new("treatment", 0.5)],
        );
        def.active = false;
        let registry = registry_with(vec![def]);
        let overrides = MemoryOverrideStore::new();
        assert_eq!(registry.resolve_variant("t1", "subject_a", &overrides), "original");
    }

    #[test]
    fn test_empty_subject_resolves() {
        let registry = registry_with(vec![fifty_fifty("t1")]);
        let overrides = MemoryOverrideStore::new();
        let v = registry.resolve_variant("t1", "", &overrides);
        assert!(v == "control" || v == "treatment");
    }

    // ===== overrides =====

    #[test]
    fn test_forced_override_wins_over_hash() {
        let registry = registry_with(vec![fifty_fifty("t1")]);
        let mut overrides = MemoryOverrideStore::new();
        registry.force_variant("t1", "treatment", "subject_a", &mut overrides);
        for _ in 0..5 {
            assert_eq!(registry.resolve_variant("t1", "subject_a", &overrides), "treatment");
        }
    }

    #[test]
    fn test_override_scoped_to_subject() {
        let registry = registry_with(vec![fifty_fifty("t1")]);
        let mut overrides = MemoryOverrideStore::new();
        registry.force_variant("t1", "treatment", "subject_a", &mut overrides);
        let other = registry.resolve_variant("t1", "subject_b", &overrides);
        let organic = {
            let empty = MemoryOverrideStore::new();
            registry.resolve_variant("t1", "subject_b", &empty)
        };
        assert_eq!(other, organic);
    }

    #[test]
    fn test_forcing_twice_is_idempotent() {
        let registry = registry_with(vec![fifty_fifty("t1")]);
        let mut overrides = MemoryOverrideStore::new();
        registry.force_variant("t1", "treatment", "subject_a", &mut overrides);
        registry.force_variant("t1", "treatment", "subject_a", &mut overrides);
        assert_eq!(overrides.len(), 1);
        assert_eq!(registry.resolve_variant("t1", "subject_a", &overrides), "treatment");
    }

    #[test]
    fn test_global_anonymous_override() {
        let registry = registry_with(vec![fifty_fifty("t1")]);
        let mut overrides = MemoryOverrideStore::new();
        registry.force_variant("t1", "treatment", "", &mut overrides);
        assert_eq!(registry.resolve_variant("t1", "", &overrides), "treatment");
    }

    #[test]
    fn test_reset_restores_hash_path() {
        let registry = registry_with(vec![fifty_fifty("t1")]);
        let mut overrides = MemoryOverrideStore::new();
        let organic = registry.resolve_variant("t1", "subject_a", &overrides);

        registry.force_variant("t1", "control_qa", "subject_a", &mut overrides);
        assert_eq!(registry.resolve_variant("t1", "subject_a", &overrides), "control_qa");

        registry.reset_subject_variants("subject_a", &mut overrides);
        assert_eq!(registry.resolve_variant("t1", "subject_a", &overrides), organic);
    }

    #[test]
    fn test_reset_clears_all_tests_for_subject() {
        let registry = registry_with(vec![fifty_fifty("t1"), fifty_fifty("t2")]);
        let mut overrides = MemoryOverrideStore::new();
        registry.force_variant("t1", "treatment", "subject_a", &mut overrides);
        registry.force_variant("t2", "treatment", "subject_a", &mut overrides);
        registry.force_variant("t1", "treatment", "subject_b", &mut overrides);

        registry.reset_subject_variants("subject_a", &mut overrides);
        assert_eq!(overrides.len(), 1);
        assert_eq!(registry.resolve_variant("t1", "subject_b", &overrides), "treatment");
    }

    #[test]
    fn test_reset_suffix_also_clears_composite_subject_ids() {
        // Suffix semantics: resetting "42" also clears overrides stored
        // for "anon_42". Kept as-is from the inherited behavior.
        let registry = registry_with(vec![fifty_fifty("t1")]);
        let mut overrides = MemoryOverrideStore::new();
        registry.force_variant("t1", "treatment", "anon_42", &mut overrides);
        registry.reset_subject_variants("42", &mut overrides);
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_reset_unassigned_subject_is_noop() {
        let registry = registry_with(vec![fifty_fifty("t1")]);
        let mut overrides = MemoryOverrideStore::new();
        registry.reset_subject_variants("nobody", &mut overrides);
        assert!(overrides.is_empty());
    }

    // ===== lookups / reporting =====

    #[test]
    fn test_active_tests_excludes_inactive() {
        let mut off = fifty_fifty("off");
        off.active = false;
        let registry = registry_with(vec![fifty_fifty("on"), off]);
        let active: Vec<&str> = registry.active_tests().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(active, vec!["on"]);
    }

    #[test]
    fn test_is_test_active() {
        let registry = registry_with(vec![fifty_fifty("t1")]);
        assert!(registry.is_test_active("t1"));
        assert!(!registry.is_test_active("t2"));
    }

    #[test]
    fn test_results_for_unknown_test_rejected() {
        let registry = TestRegistry::empty();
        let err = registry
            .test_results("ghost", VariantCounts::new(10, 1), VariantCounts::new(10, 2))
            .unwrap_err();
        assert!(matches!(err, AbError::InvalidInput(_)));
    }

    #[test]
    fn test_results_delegates_to_stats() {
        let registry = registry_with(vec![fifty_fifty("t1")]);
        let res = registry
            .test_results("t1", VariantCounts::new(1000, 50), VariantCounts::new(1000, 75))
            .unwrap();
        assert!(res.is_significant);
    }
}
