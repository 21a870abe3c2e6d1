use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::data::Sample;
use crate::history::{HistoryEntry, HistoryQuery};
use crate::pipeline::{Historian, HistorianError};
use crate::policy::PointPolicy;
use crate::store::Store;

/// Application state shared across handlers
pub struct AppState<S: Store> {
    pub historian: Arc<Historian<S>>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub buffered_rows: usize,
    pub store_healthy: bool,
}

pub async fn health_check<S: Store>(State(state): State<Arc<AppState<S>>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        buffered_rows: state.historian.buffered_rows(),
        store_healthy: state.historian.is_healthy(),
    })
}

// ============================================================================
// Point Configuration
// ============================================================================

#[derive(Serialize)]
pub struct PointsResponse {
    pub points: HashMap<String, PointPolicy>,
}

pub async fn list_points<S: Store>(State(state): State<Arc<AppState<S>>>) -> Json<PointsResponse> {
    Json(PointsResponse {
        points: state.historian.enabled_points(),
    })
}

pub async fn enable_point<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    policy: Option<Json<PointPolicy>>,
) -> StatusCode {
    let policy = policy.map(|Json(p)| p).unwrap_or_default();
    state.historian.enable_history(&id, policy);
    StatusCode::OK
}

pub async fn disable_point<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.historian.disable_history(&id) {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound(format!("Point '{}' is not tracked", id)))
    }
}

// ============================================================================
// Writes
// ============================================================================

#[derive(Deserialize)]
pub struct StoreStateRequest {
    #[serde(flatten)]
    pub sample: Sample,
    #[serde(default)]
    pub flush: bool,
}

#[derive(Serialize)]
pub struct StoreStateResponse {
    pub stored: bool,
}

pub async fn store_state<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(request): Json<StoreStateRequest>,
) -> Result<Json<StoreStateResponse>, ApiError> {
    let stored = state
        .historian
        .store_state(&id, request.sample, request.flush)
        .await?;
    Ok(Json(StoreStateResponse { stored }))
}

pub async fn update_state<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(sample): Json<Sample>,
) -> Result<StatusCode, ApiError> {
    state.historian.update(&id, sample).await?;
    Ok(StatusCode::OK)
}

// ============================================================================
// Deletes
// ============================================================================

#[derive(Deserialize)]
pub struct DeleteRequest {
    pub timestamps: Vec<i64>,
}

pub async fn delete_samples<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(request): Json<DeleteRequest>,
) -> Result<StatusCode, ApiError> {
    state.historian.delete(&id, &request.timestamps).await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct DeleteRangeRequest {
    pub start: i64,
    pub end: i64,
}

pub async fn delete_range<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(request): Json<DeleteRangeRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .historian
        .delete_range(&id, request.start, request.end)
        .await?;
    Ok(StatusCode::OK)
}

pub async fn delete_all<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.historian.delete_all(&id).await?;
    Ok(StatusCode::OK)
}

// ============================================================================
// History
// ============================================================================

#[derive(Serialize)]
pub struct HistoryResponse {
    pub entries: Vec<HistoryEntry>,
    pub count: usize,
}

pub async fn query_history<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(query): Json<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let entries = state.historian.get_history(&id, &query).await?;
    Ok(Json(HistoryResponse {
        count: entries.len(),
        entries,
    }))
}

// ============================================================================
// Buffer
// ============================================================================

#[derive(Serialize)]
pub struct FlushResponse {
    pub flushed: usize,
}

pub async fn flush<S: Store>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<FlushResponse>, ApiError> {
    let flushed = state.historian.flush_buffer().await?;
    Ok(Json(FlushResponse { flushed }))
}

// ============================================================================
// Errors
// ============================================================================

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<HistorianError> for ApiError {
    fn from(e: HistorianError) -> Self {
        match e {
            HistorianError::Validation(msg) => ApiError::BadRequest(msg),
            HistorianError::Conversion(e) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
