use super::{blocking, ApiError, ApiResult, AppState};
use axum::{extract::State, Json};
use faceid_core::{EmbedError, NormalizedTensor};
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub detector_available: bool,
    pub version: &'static str,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_loaded = state.pipeline.engine().is_loaded();
    if !model_loaded {
        tracing::warn!("health check: embedding model not loaded");
    }
    Json(HealthResponse {
        status: if model_loaded { "healthy" } else { "degraded" },
        model_loaded,
        detector_available: state.pipeline.preprocessor().has_detector(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Raw inference on an already-normalized tensor.
#[derive(Debug, Deserialize)]
pub struct InferenceRequest {
    pub request_id: String,
    /// `3*112*112` values, flat or split into rows.
    pub input_data: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
pub struct InferenceResponse {
    pub request_id: String,
    pub prediction: Vec<f32>,
    /// Milliseconds spent in the model.
    pub execution_time: f64,
    pub status: &'static str,
}

/// POST /api/v1/inference
pub async fn inference(
    State(state): State<AppState>,
    Json(request): Json<InferenceRequest>,
) -> ApiResult<Json<InferenceResponse>> {
    if !state.pipeline.engine().is_loaded() {
        return Err(EmbedError::ModelNotLoaded.into());
    }

    let values: Vec<f32> = request.input_data.into_iter().flatten().collect();
    let received = values.len();
    let tensor = NormalizedTensor::from_flat(values).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "input_data must hold {} values, got {received}",
            NormalizedTensor::SHAPE.iter().product::<usize>()
        ))
    })?;

    let (embedding, elapsed) = blocking(move || {
        let start = Instant::now();
        let embedding = state.pipeline.engine().embed(&tensor)?;
        Ok((embedding, start.elapsed()))
    })
    .await?;

    let execution_time = elapsed.as_secs_f64() * 1000.0;
    tracing::info!(request_id = %request.request_id, execution_ms = execution_time, "inference done");

    Ok(Json(InferenceResponse {
        request_id: request.request_id,
        prediction: embedding.values,
        execution_time,
        status: "success",
    }))
}
