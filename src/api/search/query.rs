use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    Json,
};
use serde_json::Value;
use std::sync::Arc;

use crate::api::ApiError;
use crate::search::{SearchQuery, SearchResult};
use crate::state::AppState;

/// GET /search - 查询字符串搜索
///
/// `limit` defaults to the configured page size, `offset` to 0.
pub async fn search_get(
    State(state): State<Arc<AppState>>,
    params: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<SearchResult>, ApiError> {
    let Query(pairs) = params.map_err(|e| ApiError::bad_request("invalid_request", e.body_text()))?;
    let query = SearchQuery::from_pairs(pairs, state.default_limit).map_err(crate::search::SearchError::from)?;
    run_search(&state, query).await
}

/// POST /api/search - JSON 搜索
pub async fn search_post(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SearchResult>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request("invalid_request", e.body_text()))?;
    let Value::Object(map) = body else {
        return Err(ApiError::bad_request("invalid_request", "request body must be a JSON object"));
    };

    // flatten to key/value pairs so both forms share one parser
    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map {
        let value = match value {
            Value::Null => continue,
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(ApiError::bad_request(
                    "invalid_request",
                    format!("field {:?} must be a string or a number, got {}", key, other),
                ))
            }
        };
        pairs.push((key, value));
    }

    let query = SearchQuery::from_pairs(pairs, state.default_limit).map_err(crate::search::SearchError::from)?;
    run_search(&state, query).await
}

async fn run_search(state: &AppState, query: SearchQuery) -> Result<Json<SearchResult>, ApiError> {
    tracing::debug!("Search request: {:?}", query);
    let result = state.search.search_with_timeout(query, state.search_timeout).await?;
    Ok(Json(result))
}
