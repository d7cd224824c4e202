//! # Stage: Statistics Engine
//!
//! ## Responsibility
//! Evaluates experiment health from aggregate conversion counts: a pooled
//! two-proportion z-test for significance, plus minimum-detectable-effect
//! and required-sample-size calculations for experiment planning.
//!
//! ## Guarantees
//! - Pure and deterministic: same counts, same result, no I/O
//! - Non-silent failure: zero participants or out-of-range rates return
//!   [`AbError::InvalidInput`] rather than NaN/Infinity
//!
//! ## NOT Responsible For
//! - Storing or incrementing the counters (external aggregation store)
//! - Deciding what counts as a conversion (event ingestion concern)

use serde::{Deserialize, Serialize};

use crate::error::{AbError, AbResult};

/// z-critical for 95% confidence (two-sided alpha = 0.05).
const Z_ALPHA: f64 = 1.96;
/// z-critical for 80% power (beta = 0.20).
const Z_BETA: f64 = 0.84;

// ---------------------------------------------------------------------------
// VariantCounts — the aggregate snapshot one arm reports
// ---------------------------------------------------------------------------

/// Aggregate counts for one experiment arm, as read from the external
/// aggregation store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantCounts {
    /// Distinct subjects exposed to this variant.
    pub participants: u64,
    /// Qualifying outcome events.
    pub conversions: u64,
    /// Optional revenue-style value sum.
    #[serde(default)]
    pub value_sum: f64,
}

impl VariantCounts {
    pub fn new(participants: u64, conversions: u64) -> Self {
        Self { participants, conversions, value_sum: 0.0 }
    }

    /// Conversion rate, or `None` when no subjects were exposed.
    pub fn rate(&self) -> Option<f64> {
        if self.participants == 0 {
            None
        } else {
            Some(self.conversions as f64 / self.participants as f64)
        }
    }
}

// ---------------------------------------------------------------------------
// SignificanceResult
// ---------------------------------------------------------------------------

/// Outcome of a two-proportion significance test. Ephemeral — computed on
/// demand from counts, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// Two-tailed p-value in `[0, 1]`.
    pub p_value: f64,
    /// `true` when `p_value < 0.05`.
    pub is_significant: bool,
    /// `(1 - p_value) * 100`, clamped to 99.9.
    pub confidence_level: f64,
    /// z-statistic of the observed rate difference.
    pub z_score: f64,
    pub control_rate: f64,
    pub test_rate: f64,
}

// ---------------------------------------------------------------------------
// Significance test (pooled two-proportion z-test)
// ---------------------------------------------------------------------------

/// Two-proportion z-test of `treatment` against `control`.
///
/// Either arm with zero participants is an [`AbError::InvalidInput`]; the
/// division is undefined and must not silently propagate as NaN.
pub fn calculate_significance(
    control: VariantCounts,
    treatment: VariantCounts,
) -> AbResult<SignificanceResult> {
    let control_rate = control.rate().ok_or_else(|| {
        AbError::InvalidInput("control arm has zero participants".into())
    })?;
    let test_rate = treatment.rate().ok_or_else(|| {
        AbError::InvalidInput("treatment arm has zero participants".into())
    })?;

    let n1 = control.participants as f64;
    let n2 = treatment.participants as f64;

    let pooled_rate =
        (control.conversions + treatment.conversions) as f64 / (n1 + n2);
    let pooled_variance = pooled_rate * (1.0 - pooled_rate);
    let standard_error = (pooled_variance * (1.0 / n1 + 1.0 / n2)).sqrt();

    // Identical rates in both arms (all-convert or none-convert) leave zero
    // pooled variance; there is no evidence of a difference.
    let z_score = if standard_error > 0.0 {
        (test_rate - control_rate).abs() / standard_error
    } else {
        0.0
    };

    let p_value = 2.0 * (1.0 - normal_cdf(z_score));
    let is_significant = p_value < 0.05;
    let confidence_level = ((1.0 - p_value) * 100.0).min(99.9);

    Ok(SignificanceResult {
        p_value,
        is_significant,
        confidence_level,
        z_score,
        control_rate,
        test_rate,
    })
}

/// Standard normal CDF via the error function.
fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz & Stegun 7.1.26 rational approximation of erf(x).
/// Maximum absolute error ~1.5e-7, plenty for significance decisions.
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t) * (-x * x).exp();

    sign * y
}

// ---------------------------------------------------------------------------
// Experiment planning — MDE and sample size
// ---------------------------------------------------------------------------

/// Minimum detectable effect for an experiment of a given size, at fixed
/// 95% confidence / 80% power.
pub fn minimum_detectable_effect(
    baseline_conversion: f64,
    participants: u64,
) -> AbResult<f64> {
    if participants == 0 {
        return Err(AbError::InvalidInput("participants must be > 0".into()));
    }
    if !(0.0..=1.0).contains(&baseline_conversion) {
        return Err(AbError::InvalidInput(format!(
            "baseline conversion must be in [0, 1], got {baseline_conversion}"
        )));
    }

    let pooled_variance = baseline_conversion * (1.0 - baseline_conversion);
    let standard_error = (2.0 * pooled_variance / participants as f64).sqrt();
    Ok((Z_ALPHA + Z_BETA) * standard_error)
}

/// Required participants per arm to detect `minimum_detectable_effect` over
/// `baseline_conversion`, at fixed 95% confidence / 80% power.
pub fn required_sample_size(
    baseline_conversion: f64,
    minimum_detectable_effect: f64,
) -> AbResult<u64> {
    if !(0.0..1.0).contains(&baseline_conversion) {
        return Err(AbError::InvalidInput(format!(
            "baseline conversion must be in [0, 1), got {baseline_conversion}"
        )));
    }
    if minimum_detectable_effect <= 0.0 {
        return Err(AbError::InvalidInput(format!(
            "minimum detectable effect must be > 0, got {minimum_detectable_effect}"
        )));
    }

    let p1 = baseline_conversion;
    let p2 = baseline_conversion + minimum_detectable_effect;
    if p2 > 1.0 {
        // A target rate above 100% would flip the pooled variance negative
        // and saturate the cast to 0.
        return Err(AbError::InvalidInput(format!(
            "baseline + effect must not exceed 1.0, got {p2}"
        )));
    }

    let pooled_p = (p1 + p2) / 2.0;
    let pooled_variance = pooled_p * (1.0 - pooled_p);

    let numerator = (Z_ALPHA + Z_BETA).powi(2) * 2.0 * pooled_variance;
    let denominator = (p2 - p1).powi(2);

    Ok((numerator / denominator).ceil() as u64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
