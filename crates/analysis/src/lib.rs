pub mod callgraph;
pub mod locator;
pub mod scoring;

pub use callgraph::CallGraph;
pub use locator::{AnchorSpec, KnownName, Locator, Resolution, Strategy, TargetRole};
pub use scoring::{Candidate, RulePredicate, ScoringRule, default_rules};

use serde::{Deserialize, Serialize};
use sigpatch_core::detection::NameShape;
use thiserror::Error;

/// Error type for locator configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// Body-size range is empty.
    #[error("invalid body size range {0}..={1}")]
    InvalidBodySize(usize, usize),
    /// Tie tolerance is negative or not a number.
    #[error("invalid tie tolerance {0}")]
    InvalidTieTolerance(f64),
    /// Obfuscated-name shape accepts no length.
    #[error("invalid name shape: min_len {0} > max_len {1}")]
    InvalidNameShape(usize, usize),
}

/// Analysis result type
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration for the signature locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Shape of obfuscated type and method names
    pub name_shape: NameShape,
    /// Runner-up within this distance of the top score makes the verdict ambiguous
    pub tie_tolerance: f64,
    /// Candidates below this score are discarded
    pub min_score: f64,
    /// Inclusive instruction-count range for `body_size_in_range`
    pub body_size: (usize, usize),
    /// Scoring rules used when a role brings none
    pub rules: Vec<ScoringRule>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            name_shape: NameShape::default(),
            tie_tolerance: 0.0,
            min_score: 5.0, // at least the accessor shape
            body_size: (1, 100),
            rules: default_rules(),
        }
    }
}

impl LocatorConfig {
    pub fn validate(&self) -> Result<()> {
        let (lo, hi) = self.body_size;
        if lo > hi {
            return Err(Error::InvalidBodySize(lo, hi));
        }
        if self.tie_tolerance.is_nan() || self.tie_tolerance < 0.0 {
            return Err(Error::InvalidTieTolerance(self.tie_tolerance));
        }
        if self.name_shape.min_len > self.name_shape.max_len {
            return Err(Error::InvalidNameShape(
                self.name_shape.min_len,
                self.name_shape.max_len,
            ));
        }
        Ok(())
    }
}
