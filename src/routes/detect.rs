use crate::{
    data_url::{base64_payload, decode_image},
    detection::DetectResponse,
    model_service::{ModelLoader, ModelService},
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

pub const CONFIDENCE_THRESHOLD: f32 = 0.25;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("model not loaded")]
    ModelUnavailable,
    #[error("Expected JSON with {{ image: dataURL }}")]
    BadRequest,
    #[error("Invalid data URL")]
    InvalidImageEncoding,
    #[error("{0}")]
    InferenceFailure(String),
}

impl DetectError {
    fn outcome(&self) -> &'static str {
        match self {
            DetectError::ModelUnavailable => "model_unavailable",
            DetectError::BadRequest => "bad_request",
            DetectError::InvalidImageEncoding => "invalid_image_encoding",
            DetectError::InferenceFailure(_) => "inference_failure",
        }
    }
}

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        let status = match self {
            DetectError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            DetectError::BadRequest => StatusCode::BAD_REQUEST,
            DetectError::InvalidImageEncoding => StatusCode::BAD_REQUEST,
            DetectError::InferenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[instrument(skip(state, body), fields(body_len = body.len()))]
pub async fn detect<L: ModelLoader>(
    State(state): State<SharedState<L>>,
    body: Bytes,
) -> Result<Json<DetectResponse>, DetectError> {
    let result = run_detect(&state, &body).await;

    match &result {
        Ok(response) => {
            tracing::debug!("Returning {} detections", response.detections.len());
            state.metrics.record_detect("ok");
        }
        Err(e @ DetectError::InferenceFailure(_)) => {
            tracing::error!("/yolo/detect error: {}", e);
            state.metrics.record_detect(e.outcome());
        }
        Err(e) => {
            tracing::warn!("/yolo/detect rejected: {}", e);
            state.metrics.record_detect(e.outcome());
        }
    }

    result.map(Json)
}

async fn run_detect<L: ModelLoader>(
    state: &SharedState<L>,
    body: &[u8],
) -> Result<DetectResponse, DetectError> {
    let model = match state.model.current() {
        Some(model) => model,
        None => {
            let handle = state.model.clone();
            tokio::task::spawn_blocking(move || handle.ensure_loaded())
                .await
                .map_err(|e| DetectError::InferenceFailure(e.to_string()))?
                .ok_or(DetectError::ModelUnavailable)?
        }
    };

    let request: Value = serde_json::from_slice(body).map_err(|_| DetectError::BadRequest)?;

    let payload = request
        .get("image")
        .and_then(Value::as_str)
        .and_then(base64_payload)
        .ok_or(DetectError::InvalidImageEncoding)?;

    let started = Instant::now();
    let image =
        decode_image(payload).map_err(|e| DetectError::InferenceFailure(e.to_string()))?;
    let boxes = model
        .predict(image, CONFIDENCE_THRESHOLD)
        .await
        .map_err(|e| DetectError::InferenceFailure(e.to_string()))?;
    state
        .metrics
        .record_inference_duration(started.elapsed().as_millis() as u64);

    for (i, bbox) in boxes.iter().enumerate() {
        tracing::debug!(
            "Detection {}: class_id={}, confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
            i,
            bbox.class_id,
            bbox.confidence,
            bbox.x1,
            bbox.y1,
            bbox.x2,
            bbox.y2
        );
    }

    Ok(DetectResponse::from_boxes(&boxes, model.class_names()))
}
