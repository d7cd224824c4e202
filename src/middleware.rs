//! # Stage: Request Middleware Glue
//!
//! ## Responsibility
//! The per-request orchestration consumed by the surrounding web layer:
//! establish a subject id (minting an anonymous one when needed), run every
//! active test through the eligibility filter, resolve variants, and emit
//! the response side-channel — `x-ab-test-<name>` headers and
//! `ab_test_<name>` cookie directives.
//!
//! ## Guarantees
//! - Never fails: bot or ineligible traffic yields an outcome with no
//!   assignments, not an error
//! - Exposure events are emitted once per assigned test into the injected
//!   sink, so the aggregate counters see every assignment
//!
//! ## NOT Responsible For
//! - HTTP types or wire format (the caller maps these directives onto its
//!   own response object)
//! - Routing (the route→tests table is advisory; callers may assign all
//!   active tests instead)

use tracing::debug;
use uuid::Uuid;

use crate::eligibility::{self, RequestSignals};
use crate::events::{AbEvent, EventSink};
use crate::registry::{OverrideStore, TestRegistry};

/// Client-readable assignment cookies live 30 days.
const ASSIGNMENT_COOKIE_MAX_AGE: u64 = 60 * 60 * 24 * 30;
/// The hidden anonymous id cookie lives a year.
const ANONYMOUS_COOKIE_MAX_AGE: u64 = 60 * 60 * 24 * 365;

// ---------------------------------------------------------------------------
// Response side-channel types
// ---------------------------------------------------------------------------

/// A cookie the caller should set on its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieDirective {
    pub name: String,
    pub value: String,
    pub max_age_secs: u64,
    /// Hidden from client-side script when `true`.
    pub http_only: bool,
}

/// One resolved assignment for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub test_name: String,
    pub variant: String,
}

/// Everything the web layer needs to apply after running the middleware.
#[derive(Debug, Clone, Default)]
pub struct RequestOutcome {
    /// The subject id used for assignment (existing or freshly minted).
    pub subject_id: String,
    /// Variant assignments for every active, eligible test.
    pub assignments: Vec<Assignment>,
    /// `x-ab-test-<name>` header pairs.
    pub headers: Vec<(String, String)>,
    /// Assignment cookies plus, when minted, the hidden anonymous id cookie.
    pub cookies: Vec<CookieDirective>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Process one request: establish the subject id, assign variants for every
/// active test the request is eligible for, and describe the headers and
/// cookies the caller should attach to its response.
///
/// `subject_id` is the id recovered from the request's cookies, if any.
/// When absent, an `anon_<uuid>` id is minted and the hidden one-year
/// `anonymous_id` cookie directive is included in the outcome.
pub fn process_request(
    registry: &TestRegistry,
    overrides: &dyn OverrideStore,
    sink: &mut dyn EventSink,
    signals: &RequestSignals,
    subject_id: Option<&str>,
) -> RequestOutcome {
    let mut outcome = RequestOutcome::default();

    match subject_id {
        Some(id) => outcome.subject_id = id.to_string(),
        None => {
            outcome.subject_id = mint_anonymous_id();
            outcome.cookies.push(CookieDirective {
                name: "anonymous_id".into(),
                value: outcome.subject_id.clone(),
                max_age_secs: ANONYMOUS_COOKIE_MAX_AGE,
                http_only: true,
            });
        }
    }

    for test in registry.active_tests() {
        if !eligibility::is_eligible(&test.name, Some(&test.targeting), signals) {
            continue;
        }
        let variant = registry.resolve_variant(&test.name, &outcome.subject_id, overrides);
        debug!(test = %test.name, variant = %variant, subject = %outcome.subject_id, "assigned");

        outcome.headers.push((format!("x-ab-test-{}", test.name), variant.clone()));
        outcome.cookies.push(CookieDirective {
            name: format!("ab_test_{}", test.name),
            value: variant.clone(),
            max_age_secs: ASSIGNMENT_COOKIE_MAX_AGE,
            http_only: false,
        });
        sink.record(AbEvent::exposure(
            test.name.as_str(),
            variant.as_str(),
            outcome.subject_id.as_str(),
        ));
        outcome.assignments.push(Assignment { test_name: test.name.clone(), variant });
    }

    outcome
}

/// Stable pseudo-random anonymous subject id.
pub fn mint_anonymous_id() -> String {
    format!("anon_{}", Uuid::new_v4().simple())
}

/// Tests attached to a page route. Advisory table from the marketing
/// surface; unknown routes carry no tests.
pub fn tests_for_route(path: &str) -> &'static [&'static str] {
    match path {
        "/" => &["landing_page_hero", "cta_button_text"],
        "/pricing" => &["pricing_page_layout", "cta_button_text"],
        "/calculator" => &["calculator_layout", "cta_button_text"],
        "/onboarding" => &["onboarding_flow"],
        _ => &[],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
