//! Error types for Arutala

/// Result type alias using Arutala's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Arutala operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Image bytes could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Input tensor does not match what the model expects
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Forward pass or post-processing failed
    #[error("model execution error: {0}")]
    Execution(String),

    /// Model could not be resolved or downloaded from the hub
    #[error("hub error: {0}")]
    Hub(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Dataset layout or sample loading errors
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Checkpoint persistence errors
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Tensor library errors outside the request path
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl Error {
    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a new hub error
    pub fn hub(msg: impl Into<String>) -> Self {
        Self::Hub(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new dataset error
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    /// Create a new checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }
}

/// Why a single uploaded image could not be classified.
///
/// This is the complete set of per-request failures; the HTTP layer maps each
/// variant to a status code explicitly.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictError {
    /// The upload is not a decodable image
    #[error("cannot decode image: {0}")]
    Decode(String),

    /// The transformed tensor does not fit the model input
    #[error("expected input shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The model failed while running
    #[error("model execution failed: {0}")]
    Execution(String),
}

impl PredictError {
    /// Wrap a tensor failure raised during the forward pass
    pub fn execution(err: impl std::fmt::Display) -> Self {
        Self::Execution(err.to_string())
    }
}

impl From<PredictError> for Error {
    fn from(err: PredictError) -> Self {
        match err {
            PredictError::Decode(msg) => Error::Decode(msg),
            PredictError::ShapeMismatch { expected, actual } => {
                Error::ShapeMismatch { expected, actual }
            }
            PredictError::Execution(msg) => Error::Execution(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_error_converts_to_matching_variant() {
        let err: Error = PredictError::ShapeMismatch {
            expected: vec![3, 224, 224],
            actual: vec![3, 100, 100],
        }
        .into();

        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert!(err.to_string().contains("[3, 224, 224]"));
    }

    #[test]
    fn test_decode_message_is_preserved() {
        let err = PredictError::Decode("The image format could not be determined".into());
        assert_eq!(
            err.to_string(),
            "cannot decode image: The image format could not be determined"
        );
    }
}
