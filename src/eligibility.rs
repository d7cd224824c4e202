//! # Stage: Eligibility Filter
//!
//! ## Responsibility
//! Decides whether a request participates in a given test before any
//! assignment is attempted. Bot traffic is excluded from every test
//! unconditionally; each test may additionally carry its own targeting rule.
//!
//! ## Guarantees
//! - Pure decision function: no mutation, no I/O
//! - Fail-open: a test name the filter has no rule for is eligible, so new
//!   tests roll out without a lockstep filter change (documented policy)
//!
//! ## NOT Responsible For
//! - Variant assignment (see `registry`)
//! - Persisting the "seen this surface" cookies it reads

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// User-agent tokens that mark a request as automated traffic.
const BOT_TOKENS: [&str; 2] = ["bot", "crawler"];

// ---------------------------------------------------------------------------
// RequestSignals — the read-only bag of request metadata
// ---------------------------------------------------------------------------

/// Request metadata the filter inspects. All fields are read-only snapshots
/// taken from the inbound request by the caller.
#[derive(Debug, Clone, Default)]
pub struct RequestSignals {
    pub user_agent: String,
    pub referrer: String,
    /// The request carries an authenticated account.
    pub authenticated: bool,
    /// Named cookie values from the request.
    pub cookies: HashMap<String, String>,
}

impl RequestSignals {
    pub fn new(user_agent: impl Into<String>, referrer: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            referrer: referrer.into(),
            ..Default::default()
        }
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn authenticated(mut self, flag: bool) -> Self {
        self.authenticated = flag;
        self
    }

    /// Case-insensitive substring match against known bot tokens.
    pub fn is_bot(&self) -> bool {
        let ua = self.user_agent.to_ascii_lowercase();
        BOT_TOKENS.iter().any(|token| ua.contains(token))
    }
}

// ---------------------------------------------------------------------------
// TargetingRule — per-test participation predicate
// ---------------------------------------------------------------------------

/// Targeting predicate a test definition may declare.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum TargetingRule {
    /// Every request participates.
    #[default]
    Everyone,
    /// Anonymous traffic arriving from one of the listed referrer domains.
    /// Matching is substring-based, so "google.com" also matches subdomains
    /// and any URL merely containing the token. Inherited behavior; see
    /// DESIGN.md before tightening, as that changes experiment populations.
    AnonymousFromReferrers { domains: Vec<String> },
    /// Participates only while the named cookie is absent.
    CookieAbsent { cookie: String },
    /// Only requests with an authenticated account.
    AuthenticatedOnly,
}

impl TargetingRule {
    /// Evaluate this rule against the request signals.
    pub fn matches(&self, signals: &RequestSignals) -> bool {
        match self {
            TargetingRule::Everyone => true,
            TargetingRule::AnonymousFromReferrers { domains } => {
                !signals.authenticated
                    && domains.iter().any(|d| signals.referrer.contains(d.as_str()))
            }
            TargetingRule::CookieAbsent { cookie } => !signals.cookies.contains_key(cookie),
            TargetingRule::AuthenticatedOnly => signals.authenticated,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Whether the request described by `signals` participates in a test
/// carrying `rule`. Bot exclusion runs before any per-test rule.
///
/// `rule = None` means the test is unknown to the filter: eligible by
/// policy, so experiment rollout never waits on a filter update.
pub fn is_eligible(test_name: &str, rule: Option<&TargetingRule>, signals: &RequestSignals) -> bool {
    if signals.is_bot() {
        debug!(test = test_name, ua = %signals.user_agent, "bot traffic excluded");
        return false;
    }
    match rule {
        Some(rule) => rule.matches(signals),
        None => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
