//! HTTP boundary.

mod error;
mod system;
mod users;

pub use error::{ApiError, ApiResult};
pub use users::UserResponse;

use crate::artifacts::ArtifactStorage;
use crate::config::Config;
use crate::enroll::Enroller;
use crate::store::IdentityStore;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use faceid_core::FacePipeline;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handles for every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<FacePipeline>,
    pub store: Arc<dyn IdentityStore>,
    pub artifacts: Arc<ArtifactStorage>,
    pub enroller: Enroller,
}

impl AppState {
    pub fn new(config: Config, pipeline: FacePipeline, store: Arc<dyn IdentityStore>) -> Self {
        let pipeline = Arc::new(pipeline);
        let artifacts = Arc::new(ArtifactStorage::new(config.data_dir.clone(), config.face_image_dir.clone()));
        let enroller = Enroller::new(pipeline.clone(), store.clone(), artifacts.clone());
        Self {
            config: Arc::new(config),
            pipeline,
            store,
            artifacts,
            enroller,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/health", get(system::health))
        .route("/api/v1/inference", post(system::inference))
        .route("/api/v1/users", get(users::list))
        .route("/api/v1/users/register", post(users::register))
        .route("/api/v1/users/register/bulk", post(users::register_bulk))
        .route("/api/v1/users/search", post(users::search))
        .route("/api/v1/users/face-image/:identity_id", get(users::face_image))
        .route(
            "/api/v1/users/face-preprocessed-image/:identity_id",
            get(users::face_preprocessed_image),
        )
        .route("/api/v1/users/all", delete(users::remove_all))
        .route(
            "/api/v1/users/:identity_id",
            get(users::show).patch(users::update).delete(users::remove),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run store or pipeline work off the async runtime.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ApiResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
