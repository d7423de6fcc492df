//! Mapping of request failures onto HTTP responses

use arutala_core::PredictError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// An uploaded file could not be classified
    #[error("Error processing file {filename}: {source}")]
    Predict {
        filename: String,
        #[source]
        source: PredictError,
    },

    /// A required multipart field is absent or the body is not multipart
    #[error("{0}")]
    Unprocessable(String),

    /// The multipart stream itself is malformed
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn predict(filename: impl Into<String>, source: PredictError) -> Self {
        Self::Predict {
            filename: filename.into(),
            source,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Predict { .. } | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Predict { source, .. } => match source {
                PredictError::Decode(_) => "decode",
                PredictError::ShapeMismatch { .. } => "shape_mismatch",
                PredictError::Execution(_) => "execution",
            },
            Self::Unprocessable(_) => "unprocessable",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::counter!("arutala_errors_total", "type" => self.kind()).increment(1);

        let status = self.status();
        let body = json!({ "detail": self.to_string() });

        (status, Json(body)).into_response()
    }
}
