//! Registry configuration loading.
//!
//! Test definitions are declared in TOML and validated on load, so every
//! configuration error surfaces at process start rather than during
//! request-time assignment:
//!
//! ```toml
//! [[tests]]
//! name = "pricing_page_layout"
//! description = "Test different pricing page layouts"
//! active = true
//! targeting = { rule = "cookie_absent", cookie = "visited_pricing" }
//!
//! [[tests.variants]]
//! name = "control"
//! weight = 0.5
//!
//! [[tests.variants]]
//! name = "feature_comparison"
//! weight = 0.5
//! ```
//!
//! Variants declared without weights get an equal split.

use serde::{Deserialize, Serialize};

use crate::error::AbResult;
use crate::registry::{TestDefinition, TestRegistry, VariantDef};

/// Top-level shape of a registry TOML document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub tests: Vec<TestDefinition>,
}

impl TestRegistry {
    /// Parse and validate a registry from a TOML document.
    pub fn from_toml_str(doc: &str) -> AbResult<Self> {
        let config: RegistryConfig = toml::from_str(doc)?;
        TestRegistry::new(config.tests)
    }

    /// The built-in experiment set: five marketing-surface tests with their
    /// production traffic splits and targeting rules.
    pub fn with_default_tests() -> Self {
        use crate::eligibility::TargetingRule;

        let defs = vec![
            TestDefinition {
                name: "landing_page_hero".into(),
                description: "Test different hero sections on landing page".into(),
                variants: vec![
                    variant("control", 0.5, "Original hero section"),
                    variant("video_hero", 0.3, "Video background hero"),
                    variant("testimonial_hero", 0.2, "Testimonial-focused hero"),
                ],
                active: true,
                targeting: TargetingRule::AnonymousFromReferrers {
                    domains: vec![
                        "google.com".into(),
                        "facebook.com".into(),
                        "linkedin.com".into(),
                    ],
                },
            },
            TestDefinition {
                name: "pricing_page_layout".into(),
                description: "Test different pricing page layouts".into(),
                variants: vec![
                    variant("control", 0.5, "Original pricing layout"),
                    variant("feature_comparison", 0.5, "Feature comparison table"),
                ],
                active: true,
                targeting: TargetingRule::CookieAbsent { cookie: "visited_pricing".into() },
            },
            TestDefinition {
                name: "cta_button_text".into(),
                description: "Test different CTA button text".into(),
                variants: vec![
                    variant("control", 0.25, "Get Started"),
                    variant("try_free", 0.25, "Try Free"),
                    variant("start_estimate", 0.25, "Start Estimate"),
                    variant("book_demo", 0.25, "Book Demo"),
                ],
                active: true,
                targeting: TargetingRule::Everyone,
            },
            TestDefinition {
                name: "onboarding_flow".into(),
                description: "Test different onboarding flows".into(),
                variants: vec![
                    variant("control", 0.5, "Original onboarding"),
                    variant("progressive", 0.5, "Progressive disclosure"),
                ],
                active: true,
                targeting: TargetingRule::AuthenticatedOnly,
            },
            TestDefinition {
                name: "calculator_layout".into(),
                description: "Test different calculator layouts".into(),
                variants: vec![
                    variant("control", 0.5, "Original calculator"),
                    variant("wizard", 0.5, "Step-by-step wizard"),
                ],
                active: true,
                targeting: TargetingRule::Everyone,
            },
        ];

        // The built-in set is known-valid; validation cannot fail here.
        TestRegistry::new(defs).expect("built-in test definitions are valid")
    }
}

fn variant(name: &str, weight: f64, description: &str) -> VariantDef {
    VariantDef { name: name.into(), weight, description: description.into() }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
