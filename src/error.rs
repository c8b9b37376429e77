//! Error types for the metrics engine

use thiserror::Error;

/// Why the engine refused to produce a metrics row for a sequence.
///
/// Every variant except `Inconsistent` rejects the input. The grouping stage
/// filters short and non-finite sequences out, so seeing one of those here
/// means the caller skipped that step. `Inconsistent` is an internal failure and always indicates a
/// defect in the computation itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("sequence too short: need at least {min} values, got {len}")]
    TooShort { len: usize, min: usize },

    #[error("non-finite {series} value at position {position}")]
    NonFinite {
        series: &'static str,
        position: usize,
    },

    #[error("spread sequence has {spread} values but index sequence has {values}")]
    SpreadLengthMismatch { values: usize, spread: usize },

    #[error("accumulated step change overflows at step {position}")]
    StepOverflow { position: usize },

    #[error("amplitude decomposition mismatch: growth {growth} + drop {drop} != total {total}")]
    Inconsistent { growth: f64, drop: f64, total: f64 },
}

impl EngineError {
    /// True for failures that point at a bug rather than at bad input.
    pub fn is_internal(&self) -> bool {
        matches!(self, EngineError::Inconsistent { .. })
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
