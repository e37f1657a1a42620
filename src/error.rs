//! Error types for the response model pipeline

use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Typed failures surfaced to the caller of the pipeline.
///
/// The ordering errors (`NotReady`, `NotFitted`, `NotConfigured`) mean an
/// operation was invoked before the step it depends on.
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Missing or malformed required columns
    #[error("Schema error: {0}")]
    Schema(String),

    /// A class has fewer samples than the requested fold-count
    #[error("Insufficient data: class '{class}' has {count} samples, {folds} folds requested")]
    InsufficientData {
        class: String,
        count: usize,
        folds: usize,
    },

    #[error("Model not fitted")]
    NotFitted,

    #[error("Not ready: {0}")]
    NotReady(String),

    /// Neighbor count requested without a prior search or manual assignment
    #[error("Neighbor count not configured: run a search or supply k")]
    NotConfigured,

    #[error("Invalid parameter: {name}, {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Data error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Nearest neighbour index error: {0}")]
    NearestNeighbour(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ForgeError {
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        ForgeError::Schema(msg.into())
    }

    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ForgeError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<linfa_nn::BuildError> for ForgeError {
    fn from(err: linfa_nn::BuildError) -> Self {
        ForgeError::NearestNeighbour(err.to_string())
    }
}

impl From<linfa_nn::NnError> for ForgeError {
    fn from(err: linfa_nn::NnError) -> Self {
        ForgeError::NearestNeighbour(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message() {
        let err = ForgeError::InsufficientData {
            class: "yes".to_string(),
            count: 2,
            folds: 3,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient data: class 'yes' has 2 samples, 3 folds requested"
        );
    }

    #[test]
    fn test_invalid_parameter_helper() {
        let err = ForgeError::invalid("test_size", "must be in (0, 1)");
        assert!(matches!(err, ForgeError::InvalidParameter { ref name, .. } if name == "test_size"));
    }
}
