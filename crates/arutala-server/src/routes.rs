//! HTTP routes and handlers

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;
use arutala_core::{BatchPrediction, Prediction};

pub fn create_router(state: AppState) -> Router {
    // Credentials rule out wildcards, so mirror whatever the caller sent
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Router::new()
        .route("/", get(root))
        .route("/predict", post(predict))
        .route("/batch-predict", post(batch_predict))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Arutala image classification API",
        "status": "ok",
    }))
}

async fn metrics(State(state): State<AppState>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

/// Response for a single image
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: String,
    pub probability: f32,
}

impl From<Prediction> for PredictResponse {
    fn from(p: Prediction) -> Self {
        Self {
            prediction: p.label,
            probability: p.probability,
        }
    }
}

async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    metrics::counter!("arutala_requests_total", "route" => "predict").increment(1);

    let upload = read_uploads(multipart, "file", Some(1))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Unprocessable("Field 'file' is required".to_string()))?;

    let start = Instant::now();
    let prediction = state
        .model
        .preprocess(&upload.bytes)
        .and_then(|input| state.model.predict(&input))
        .map_err(|e| {
            warn!(filename = %upload.filename, error = %e, "Prediction failed");
            ApiError::predict(&upload.filename, e)
        })?;
    record_latency("predict", start);

    debug!(
        filename = %upload.filename,
        label = %prediction.label,
        probability = prediction.probability,
        "Predicted"
    );
    metrics::counter!("arutala_predictions_total").increment(1);

    Ok(Json(prediction.into()))
}

async fn batch_predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<BatchPrediction>, ApiError> {
    metrics::counter!("arutala_requests_total", "route" => "batch_predict").increment(1);

    let uploads = read_uploads(multipart, "files", None).await?;
    if uploads.is_empty() {
        return Err(ApiError::Unprocessable(
            "Field 'files' requires at least one file".to_string(),
        ));
    }

    let start = Instant::now();
    let mut inputs = Vec::with_capacity(uploads.len());
    for upload in &uploads {
        let input = state.model.preprocess(&upload.bytes).map_err(|e| {
            warn!(filename = %upload.filename, error = %e, "Preprocessing failed");
            ApiError::predict(&upload.filename, e)
        })?;
        inputs.push(input);
    }

    let predictions = state.model.predict_batch(&inputs).map_err(|e| {
        let names: Vec<&str> = uploads.iter().map(|u| u.filename.as_str()).collect();
        warn!(files = uploads.len(), error = %e, "Batch prediction failed");
        ApiError::predict(names.join(", "), e)
    })?;
    record_latency("batch_predict", start);

    debug!(files = predictions.len(), "Batch predicted");
    metrics::counter!("arutala_predictions_total").increment(predictions.len() as u64);

    Ok(Json(predictions.into_iter().collect()))
}

/// One uploaded file from a multipart body
struct Upload {
    filename: String,
    bytes: Bytes,
}

/// Collect files sent under `field_name`, in upload order.
///
/// With a `limit`, the rest of the body is left unread once that many files
/// have been collected.
async fn read_uploads(
    multipart: Result<Multipart, MultipartRejection>,
    field_name: &str,
    limit: Option<usize>,
) -> Result<Vec<Upload>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::Unprocessable(e.to_string()))?;

    let mut uploads = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(field_name) {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read {}: {}", filename, e)))?;

        uploads.push(Upload { filename, bytes });
        if limit.is_some_and(|limit| uploads.len() >= limit) {
            break;
        }
    }

    Ok(uploads)
}

fn record_latency(route: &'static str, start: Instant) {
    metrics::histogram!("arutala_inference_latency_us", "route" => route)
        .record(start.elapsed().as_micros() as f64);
}
