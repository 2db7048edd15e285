//! Euclidean face matcher.
//!
//! Turns a (reference, probe) pair of encodings into a match verdict plus a
//! display confidence. Decisions use only `is_match`.

use crate::types::Encoding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;
pub const DEFAULT_ENCODING_DIM: usize = 128;

/// Distance reported when a comparison could not run because an encoding
/// was missing. Larger than any real distance.
pub const MISSING_ENCODING_DISTANCE: f64 = f64::MAX;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("encoding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("reference or probe encoding is missing")]
    MissingEncoding,
    #[error("encoding component {index} is not finite")]
    NonFiniteEncoding { index: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatcherConfigError {
    #[error("match threshold must be finite and positive, got {0}")]
    InvalidThreshold(f64),
    #[error("encoding dimension must be non-zero")]
    ZeroDimension,
}

/// Outcome of comparing a probe against a reference encoding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub is_match: bool,
    pub distance: f64,
    /// Linear rescaling of `distance` to [0, 100]. Display only.
    pub confidence: f64,
}

impl MatchResult {
    /// Non-match verdict used when an encoding was absent.
    pub fn missing() -> Self {
        Self {
            is_match: false,
            distance: MISSING_ENCODING_DISTANCE,
            confidence: 0.0,
        }
    }
}

/// Threshold matcher over fixed-dimension encodings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMatcher {
    threshold: f64,
    dimension: usize,
}

impl FaceMatcher {
    pub fn new(threshold: f64, dimension: usize) -> Result<Self, MatcherConfigError> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(MatcherConfigError::InvalidThreshold(threshold));
        }
        if dimension == 0 {
            return Err(MatcherConfigError::ZeroDimension);
        }
        Ok(Self {
            threshold,
            dimension,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Compare a probe against a reference.
    ///
    /// An absent or empty encoding on either side is `MissingEncoding`;
    /// either side differing from the configured dimension is
    /// `DimensionMismatch`; a NaN or infinite component is
    /// `NonFiniteEncoding`. The threshold boundary is inclusive.
    pub fn compare(
        &self,
        reference: Option<&Encoding>,
        probe: Option<&Encoding>,
    ) -> Result<MatchResult, MatchError> {
        let (reference, probe) = match (reference, probe) {
            (Some(r), Some(p)) if !r.is_empty() && !p.is_empty() => (r, p),
            _ => return Err(MatchError::MissingEncoding),
        };

        for enc in [reference, probe] {
            if enc.dimension() != self.dimension {
                return Err(MatchError::DimensionMismatch {
                    expected: self.dimension,
                    actual: enc.dimension(),
                });
            }
            if let Some(index) = enc.values.iter().position(|v| !v.is_finite()) {
                return Err(MatchError::NonFiniteEncoding { index });
            }
        }

        let distance = reference.euclidean_distance(probe);
        Ok(MatchResult {
            is_match: distance <= self.threshold,
            distance,
            confidence: self.confidence(distance),
        })
    }

    /// `max(0, (1 - distance / threshold) * 100)`.
    pub fn confidence(&self, distance: f64) -> f64 {
        ((1.0 - distance / self.threshold) * 100.0).max(0.0)
    }
}

impl Default for FaceMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            dimension: DEFAULT_ENCODING_DIM,
        }
    }
}
