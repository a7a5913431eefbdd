//! `/api/v1/users` handlers.

use super::{blocking, ApiError, ApiResult, AppState};
use crate::artifacts::ArtifactStorage;
use crate::enroll::BulkEvent;
use crate::identify::{identify, Identification};
use crate::store::IdentityUpdate;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use faceid_core::Identity;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Public view of an identity. The embedding never leaves the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub identity_id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: String,
}

impl From<&Identity> for UserResponse {
    fn from(identity: &Identity) -> Self {
        Self {
            identity_id: identity.identity_id.clone(),
            name: identity.name.clone(),
            is_active: identity.is_active,
            created_at: identity.created_at.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MatchedUser {
    pub name: Option<String>,
    pub identity_id: Option<String>,
    pub face_image_url: Option<String>,
}

impl MatchedUser {
    fn from_candidate(identity: Option<&Identity>) -> Self {
        match identity {
            Some(identity) => Self {
                name: Some(identity.name.clone()),
                identity_id: Some(identity.identity_id.clone()),
                face_image_url: identity
                    .face_image_path
                    .as_ref()
                    .map(|_| format!("/api/v1/users/face-image/{}", identity.identity_id)),
            },
            None => Self {
                name: None,
                identity_id: None,
                face_image_url: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub search_result: bool,
    pub user: MatchedUser,
    pub similarity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl From<Identification> for SearchResponse {
    fn from(found: Identification) -> Self {
        Self {
            search_result: found.identified,
            user: MatchedUser::from_candidate(found.best.as_ref()),
            similarity: found.similarity,
            message: (!found.identified).then_some("No matching user found or similarity is too low"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> ApiResult<String> {
    Ok(field.text().await?)
}

async fn read_bytes(field: axum::extract::multipart::Field<'_>) -> ApiResult<Vec<u8>> {
    Ok(field.bytes().await?.to_vec())
}

fn missing(field: &str) -> ApiError {
    ApiError::BadRequest(format!("missing multipart field: {field}"))
}

/// POST /api/v1/users/register
pub async fn register(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<UserResponse>> {
    let mut name = None;
    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "name" => name = Some(read_text(field).await?),
            "file" => file = Some(read_bytes(field).await?),
            _ => {}
        }
    }
    let name = name.ok_or_else(|| missing("name"))?;
    let file = file.ok_or_else(|| missing("file"))?;

    let enroller = state.enroller.clone();
    let identity = blocking(move || Ok(enroller.enroll(&file, &name)?)).await?;
    Ok(Json(UserResponse::from(&identity)))
}

/// POST /api/v1/users/register/bulk
///
/// Streams one SSE `data:` frame per item and a final summary. The batch is
/// driven on a blocking thread that stops when the client disconnects.
pub async fn register_bulk(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<impl IntoResponse> {
    let mut files = Vec::new();
    let mut names = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "files" => files.push(read_bytes(field).await?),
            "names" => names.push(read_text(field).await?),
            _ => {}
        }
    }

    let batch = state.enroller.bulk(files, names)?;
    let (tx, rx) = mpsc::channel::<BulkEvent>(1);
    tokio::task::spawn_blocking(move || {
        for event in batch {
            if tx.blocking_send(event).is_err() {
                tracing::warn!("bulk enrollment client disconnected, stopping");
                return;
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| Event::default().json_data(&event));
    let headers = [
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
    ];
    Ok((headers, Sse::new(stream).keep_alive(KeepAlive::default())))
}

/// POST /api/v1/users/search
pub async fn search(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<SearchResponse>> {
    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        if field_name == "file" {
            file = Some(read_bytes(field).await?);
        }
    }
    let file = file.ok_or_else(|| missing("file"))?;

    let threshold = state.config.match_threshold;
    let found = blocking(move || Ok(identify(&state.pipeline, state.store.as_ref(), &file, threshold)?)).await?;
    Ok(Json(found.into()))
}

/// GET /api/v1/users/face-image/:identity_id
pub async fn face_image(State(state): State<AppState>, Path(identity_id): Path<String>) -> ApiResult<impl IntoResponse> {
    let identity = lookup(&state, identity_id).await?;
    let token = identity.and_then(|i| i.face_image_path);
    serve_artifact(&state.artifacts, token, "Face image").await
}

/// GET /api/v1/users/face-preprocessed-image/:identity_id
pub async fn face_preprocessed_image(
    State(state): State<AppState>,
    Path(identity_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let identity = lookup(&state, identity_id).await?;
    let token = identity.and_then(|i| i.face_preprocessed_path);
    serve_artifact(&state.artifacts, token, "Preprocessed face image").await
}

async fn lookup(state: &AppState, identity_id: String) -> ApiResult<Option<Identity>> {
    let store = state.store.clone();
    blocking(move || Ok(store.get(&identity_id)?)).await
}

async fn serve_artifact(
    artifacts: &ArtifactStorage,
    token: Option<String>,
    what: &str,
) -> ApiResult<impl IntoResponse> {
    let token = token.ok_or_else(|| ApiError::NotFound(format!("{what} not found")))?;
    let bytes = match tokio::fs::read(artifacts.resolve(&token)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("{what} file not found")));
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    };
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}

/// GET /api/v1/users
pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> ApiResult<Json<Vec<UserResponse>>> {
    let skip = query.skip.unwrap_or(0);
    let limit = query.limit.unwrap_or(100);
    let identities = blocking(move || Ok(state.store.list(skip, limit)?)).await?;
    Ok(Json(identities.iter().map(UserResponse::from).collect()))
}

/// GET /api/v1/users/:identity_id
pub async fn show(State(state): State<AppState>, Path(identity_id): Path<String>) -> ApiResult<Json<UserResponse>> {
    let identity = lookup(&state, identity_id).await?.ok_or_else(user_not_found)?;
    Ok(Json(UserResponse::from(&identity)))
}

/// PATCH /api/v1/users/:identity_id
pub async fn update(
    State(state): State<AppState>,
    Path(identity_id): Path<String>,
    Json(body): Json<UpdateUserRequest>,
) -> ApiResult<Json<UserResponse>> {
    let name = body.name.map(|n| n.trim().to_string());
    if name.as_deref() == Some("") {
        return Err(ApiError::BadRequest("name must not be empty".into()));
    }
    let update = IdentityUpdate {
        name,
        is_active: body.is_active,
    };
    let updated = blocking(move || Ok(state.store.update(&identity_id, &update)?))
        .await?
        .ok_or_else(user_not_found)?;
    tracing::info!(identity_id = %updated.identity_id, name = %updated.name, active = updated.is_active, "identity updated");
    Ok(Json(UserResponse::from(&updated)))
}

/// DELETE /api/v1/users/:identity_id
pub async fn remove(State(state): State<AppState>, Path(identity_id): Path<String>) -> ApiResult<Json<Value>> {
    let removed = blocking(move || {
        let removed = state.store.delete(&identity_id)?.ok_or_else(user_not_found)?;
        release_artifacts(&state.artifacts, std::slice::from_ref(&removed));
        Ok(removed)
    })
    .await?;
    tracing::info!(identity_id = %removed.identity_id, name = %removed.name, "identity removed");
    Ok(Json(json!({ "message": "User deleted successfully" })))
}

/// DELETE /api/v1/users/all
pub async fn remove_all(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let deleted = blocking(move || {
        let removed = state.store.delete_all()?;
        release_artifacts(&state.artifacts, &removed);
        Ok(removed.len())
    })
    .await?;
    tracing::warn!(deleted, "all identities removed");
    Ok(Json(json!({
        "message": format!("Successfully deleted {deleted} users"),
        "deleted": deleted,
    })))
}

fn release_artifacts(artifacts: &ArtifactStorage, identities: &[Identity]) {
    for identity in identities {
        for token in [&identity.face_image_path, &identity.face_preprocessed_path].into_iter().flatten() {
            artifacts.delete_if_exists(token);
        }
    }
}

fn user_not_found() -> ApiError {
    ApiError::NotFound("User not found".into())
}
