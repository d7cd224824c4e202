//! # ab-engine
//!
//! Deterministic A/B test assignment and statistical analysis.
//!
//! The crate is the experimentation core of a marketing web application:
//! hashing-based variant bucketing, forced-override administration,
//! request-eligibility rules, and a two-proportion z-test for reading
//! experiment results. It exposes pure functions and an explicit
//! [`TestRegistry`] object — no network surface, no global state. The
//! surrounding application owns HTTP, storage, and rendering, and feeds
//! this crate request signals and aggregate counts.
//!
//! ## Quick start
//!
//! ```
//! use ab_engine::{MemoryEventSink, MemoryOverrideStore, RequestSignals, TestRegistry};
//!
//! let registry = TestRegistry::with_default_tests();
//! let mut overrides = MemoryOverrideStore::new();
//! let mut sink = MemoryEventSink::new();
//!
//! let signals = RequestSignals::new("Mozilla/5.0", "https://google.com/search");
//! let outcome = ab_engine::process_request(
//!     &registry, &overrides, &mut sink, &signals, Some("anon_1a2b3c"),
//! );
//! for (name, value) in &outcome.headers {
//!     // attach x-ab-test-* headers to the response
//!     let _ = (name, value);
//! }
//!
//! // Pin a variant for QA, then clear it.
//! registry.force_variant("cta_button_text", "try_free", "anon_1a2b3c", &mut overrides);
//! registry.reset_subject_variants("anon_1a2b3c", &mut overrides);
//! ```

pub mod bucket;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod events;
pub mod middleware;
pub mod registry;
pub mod stats;

pub use bucket::bucket;
pub use config::RegistryConfig;
pub use eligibility::{is_eligible, RequestSignals, TargetingRule};
pub use error::{AbError, AbResult};
pub use events::{AbEvent, EventKind, EventSink, MemoryEventSink};
pub use middleware::{
    mint_anonymous_id, process_request, tests_for_route, Assignment, CookieDirective,
    RequestOutcome,
};
pub use registry::{
    MemoryOverrideStore, OverrideStore, TestDefinition, TestRegistry, VariantDef, DEFAULT_VARIANT,
};
pub use stats::{
    calculate_significance, minimum_detectable_effect, required_sample_size, SignificanceResult,
    VariantCounts,
};
