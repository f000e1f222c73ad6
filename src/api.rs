use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::de::DeserializeOwned;

use crate::auth::RequestParts;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::tier::WriteKind;
use crate::types::*;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health & stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        // Identity
        .route("/register", post(register))
        .route("/me", get(get_me))
        .route("/identities/:mention_name", get(get_identity))
        // Tier-gated writes
        .route("/writes/:kind", post(admit_write))
        // Key rotation & lineage
        .route("/rotate", post(rotate))
        .route("/lineage", get(get_lineage))
        // Administration
        .route("/admin/tier", post(update_tier))
        .route("/admin/status", post(update_status))
        .with_state(state)
}

// ============ Request Helpers ============

fn request_parts<'a>(
    method: &'a Method,
    uri: &'a Uri,
    headers: &'a HeaderMap,
    body: &'a [u8],
) -> RequestParts<'a> {
    RequestParts {
        method: method.as_str(),
        path: uri.path(),
        headers,
        body,
    }
}

/// Bodies are parsed only after the raw bytes were verified
fn parse_json<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::malformed(format!("Invalid JSON body: {}", e)))
}

// ============ Health Endpoints ============

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse::success(state.health()))
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse::success(state.stats()))
}

// ============ Identity Endpoints ============

async fn register(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state.register(&request_parts(&method, &uri, &headers, &body), Utc::now())?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(identity))))
}

async fn get_me(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.authenticate(&request_parts(&method, &uri, &headers, &body))?;
    Ok(Json(ApiResponse::success(ctx)))
}

async fn get_identity(
    State(state): State<Arc<AppState>>,
    Path(mention_name): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = state.authenticate_optional(&request_parts(&method, &uri, &headers, &body))?;
    let profile = state.profile(&mention_name, viewer)?;
    Ok(Json(ApiResponse::success(profile)))
}

// ============ Writes ============

async fn admit_write(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.authenticate(&request_parts(&method, &uri, &headers, &body))?;
    let kind: WriteKind = kind.parse()?;

    let admission = state.admit_write(&ctx, kind, Utc::now())?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(admission))))
}

// ============ Rotation & Lineage ============

async fn rotate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: RotateKeyRequest = parse_json(&body)?;
    let outcome = state.rotate(req, Utc::now())?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(outcome))))
}

#[derive(serde::Deserialize)]
struct LineageQuery {
    key: Option<String>,
}

async fn get_lineage(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LineageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let key = query
        .key
        .ok_or_else(|| ApiError::malformed("Query parameter 'key' is required"))?;
    let view = state.lineage(&key)?;
    Ok(Json(ApiResponse::success(view)))
}

// ============ Administration ============

async fn update_tier(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.authenticate(&request_parts(&method, &uri, &headers, &body))?;
    let req: UpdateTierRequest = parse_json(&body)?;
    let identity = state.update_tier(&ctx, req, Utc::now())?;
    Ok(Json(ApiResponse::success(identity)))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.authenticate(&request_parts(&method, &uri, &headers, &body))?;
    let req: UpdateStatusRequest = parse_json(&body)?;
    let identity = state.set_status(&ctx, req, Utc::now())?;
    Ok(Json(ApiResponse::success(identity)))
}
