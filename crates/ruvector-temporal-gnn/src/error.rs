//! Error types for temporal graph construction and convolution.
//!
//! Every failure in the forward path is fatal for the current batch and is
//! returned to the caller, which decides whether to abort or skip.

use thiserror::Error;

/// Error type for temporal GNN operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TemporalGnnError {
    /// A reshape, view or width check failed.
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Operation that detected the mismatch.
        context: String,
        /// Expected shape or element count.
        expected: String,
        /// Shape or element count actually observed.
        actual: String,
    },

    /// A source point has fewer than `k` eligible candidates.
    #[error("insufficient neighbors for point {point}: {available} candidates available, k = {k}")]
    InsufficientNeighbors {
        /// Source point index (flattened or sample-local, depending on the caller).
        point: usize,
        /// Number of eligible candidates.
        available: usize,
        /// Requested neighbor count.
        k: usize,
    },

    /// A required component was not supplied at construction time.
    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An internal structural invariant does not hold.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl TemporalGnnError {
    /// Create a shape mismatch error.
    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invariant violation error.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}

impl From<ndarray::ShapeError> for TemporalGnnError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::shape_mismatch("ndarray", "compatible shape", err)
    }
}

/// Result type for temporal GNN operations.
pub type Result<T> = std::result::Result<T, TemporalGnnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = TemporalGnnError::shape_mismatch("reshape", 30, 29);
        assert_eq!(
            err.to_string(),
            "shape mismatch in reshape: expected 30, got 29"
        );

        let err = TemporalGnnError::InsufficientNeighbors {
            point: 3,
            available: 1,
            k: 2,
        };
        assert!(err.to_string().contains("k = 2"));

        let err = TemporalGnnError::MissingDependency("graph creator");
        assert_eq!(err.to_string(), "missing dependency: graph creator");
    }

    #[test]
    fn test_from_shape_error() {
        let shape_err = ndarray::Array2::<f32>::from_shape_vec((2, 2), vec![1.0; 3]).unwrap_err();
        let err: TemporalGnnError = shape_err.into();
        assert!(matches!(err, TemporalGnnError::ShapeMismatch { .. }));
    }
}
