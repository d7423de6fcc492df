//! Arutala Core
//!
//! Types shared by the inference service and the training loop.
//!
//! This crate provides:
//! - The workspace error type and result alias
//! - The closed per-request prediction failure taxonomy
//! - Prediction value types

pub mod error;
pub mod types;

pub use error::{Error, PredictError, Result};
pub use types::{BatchPrediction, Prediction};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, PredictError, Result};
    pub use crate::types::{BatchPrediction, Prediction};
}
