//! Crate-level error taxonomy.
//!
//! Two rules drive the shape of this enum:
//! - Statistics inputs that would divide by zero or leave the unit interval
//!   fail loudly with [`AbError::InvalidInput`] instead of returning NaN.
//! - Malformed test definitions are rejected at registry-load time with
//!   [`AbError::Configuration`], so that variant resolution at request time
//!   is total and never raises.
//!
//! Resolving a variant for an unknown or inactive test is deliberately NOT
//! an error: the resolver falls back to the default variant (fail-open),
//! because experiment assignment must never break the request path it is
//! attached to.

use thiserror::Error;

/// All errors surfaced by this crate.
#[derive(Debug, Error)]
pub enum AbError {
    /// Malformed or zero-valued input to the statistics engine.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A test definition rejected at registry-load time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The registry TOML document could not be parsed.
    #[error("failed to parse registry config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Convenience alias used throughout the crate.
pub type AbResult<T> = Result<T, AbError>;
