//! Error types for the tabular transformer pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, TabError>;

/// Main error type for encoding, dataset construction and training
#[derive(Error, Debug)]
pub enum TabError {
    #[error("Data error: {0}")]
    DataError(String),

    /// A fitted encoder produced output that disagrees with its own metadata
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// The column's values cannot be represented by the requested encoder.
    /// Recovered by the dataset builder, never surfaced from `fit_feat_encoders`.
    #[error("Won't encode: {0}")]
    WontEncode(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Not fitted: {0}")]
    NotFitted(String),

    #[error("Already fitted: {0}")]
    AlreadyFitted(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },
}

impl TabError {
    pub(crate) fn invalid_parameter(
        name: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        TabError::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// True for the recoverable "column cannot be encoded" condition
    pub fn is_wont_encode(&self) -> bool {
        matches!(self, TabError::WontEncode(_))
    }
}

impl From<polars::error::PolarsError> for TabError {
    fn from(err: polars::error::PolarsError) -> Self {
        TabError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for TabError {
    fn from(err: serde_json::Error) -> Self {
        TabError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for TabError {
    fn from(err: ndarray::ShapeError) -> Self {
        TabError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
