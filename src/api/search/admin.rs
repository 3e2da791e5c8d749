use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::types::*;
use crate::api::{ApiError, ApiResponse};
use crate::search::{
    Compression, FileSource, IndexError, IndexStatus, QueryError, RecordSource, SearchError,
};
use crate::state::AppState;

/// GET /api/index/status - 获取索引状态
pub async fn index_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<IndexStatus>> {
    Json(ApiResponse::success(state.search.status()))
}

/// POST /api/admin/index/rebuild - 重建索引
///
/// Starts the build on the blocking pool and returns 202 right away.
/// Progress and the outcome are visible on `/api/index/status`.
///
/// A file whose extension names no known format is a bad request and
/// rejects the whole call. Files that fail while being read are skipped
/// by the build and reported as failed sources.
pub async fn rebuild_index(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RebuildRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<RebuildStarted>>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request("invalid_request", e.body_text()))?;

    if req.files.is_empty() {
        return Err(SearchError::from(QueryError::MissingParameter("files")).into());
    }
    let compressor = match req.compressor.as_deref() {
        Some(name) => Some(
            name.parse::<Compression>()
                .map_err(|e| ApiError::bad_request("invalid_value", e.to_string()))?,
        ),
        None => None,
    };

    let mut sources: Vec<Box<dyn RecordSource>> = Vec::with_capacity(req.files.len());
    for file in &req.files {
        let source = FileSource::detect(file)
            .map_err(|e| ApiError::bad_request("unsupported_format", e.to_string()))?;
        sources.push(Box::new(source));
    }

    if state.search.index_state().is_running() {
        return Err(SearchError::from(IndexError::BuildInProgress).into());
    }

    tracing::info!("Index rebuild requested for {} source(s)", sources.len());
    let service = state.search.clone();
    tokio::task::spawn_blocking(move || {
        // outcome is logged by the service and kept in the build progress
        let _ = service.rebuild(&sources, compressor);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::accepted("index rebuild started", RebuildStarted { sources: req.files })),
    ))
}
