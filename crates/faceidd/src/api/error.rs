use crate::artifacts::ArtifactError;
use crate::enroll::EnrollError;
use crate::identify::IdentifyError;
use crate::store::StoreError;
use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use faceid_core::{EmbedError, PipelineError, PreprocessError};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced to HTTP clients as `{"detail": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn internal(e: impl std::fmt::Display) -> Self {
        tracing::error!(error = %e, "request failed");
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Preprocess(PreprocessError::Decode(_)) => ApiError::BadRequest(e.to_string()),
            PipelineError::Embed(EmbedError::ModelNotLoaded) => ApiError::Unavailable(e.to_string()),
            PipelineError::Embed(_) => ApiError::internal(e),
        }
    }
}

impl From<EmbedError> for ApiError {
    fn from(e: EmbedError) -> Self {
        PipelineError::from(e).into()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateName(_) => ApiError::Conflict(e.to_string()),
            other => ApiError::internal(other),
        }
    }
}

impl From<ArtifactError> for ApiError {
    fn from(e: ArtifactError) -> Self {
        ApiError::internal(e)
    }
}

impl From<EnrollError> for ApiError {
    fn from(e: EnrollError) -> Self {
        match e {
            EnrollError::DuplicateName(_) => ApiError::Conflict(e.to_string()),
            EnrollError::EmptyName | EnrollError::MismatchedInput { .. } => ApiError::BadRequest(e.to_string()),
            EnrollError::Pipeline(e) => e.into(),
            EnrollError::Artifact(e) => e.into(),
            EnrollError::Store(e) => e.into(),
        }
    }
}

impl From<IdentifyError> for ApiError {
    fn from(e: IdentifyError) -> Self {
        match e {
            IdentifyError::EmptyGallery => ApiError::NotFound(e.to_string()),
            IdentifyError::Pipeline(e) => e.into(),
            IdentifyError::Store(e) => e.into(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::BadRequest(format!("invalid multipart body: {}", e.body_text()))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::internal(e)
    }
}
