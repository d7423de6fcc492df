//! Arutala Server
//!
//! HTTP API classifying uploaded images with a single pretrained ConvNeXt.
//!
//! The model is loaded once at startup into an [`AppState`] and shared
//! read-only by every request:
//!
//! - `GET /` reports liveness.
//! - `POST /predict` classifies the multipart field `file`.
//! - `POST /batch-predict` classifies every `files` field in one forward pass.
//! - `GET /metrics` renders Prometheus metrics.

pub mod cli;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use cli::Cli;
pub use config::ServerConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
