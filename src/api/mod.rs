//! HTTP API / HTTP 接口
//!
//! Thin axum layer over [`SearchService`](crate::search::SearchService).
//! Handlers do request parsing and status mapping only.

pub mod search;
pub mod server;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::search::SearchError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn accepted(message: &str, data: T) -> Self {
        Self {
            code: 202,
            message: message.to_string(),
            data: Some(data),
        }
    }
}

/// Error body `{code, message}` with the matching HTTP status / 错误响应
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Build the application router / 构建路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(server::health_check))
        .route("/search", get(search::query::search_get))
        .route("/api/search", post(search::query::search_post))
        .route("/api/index/status", get(search::admin::index_status))
        .route("/api/admin/index/rebuild", post(search::admin::rebuild_index))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::path::Path;
    use std::sync::Arc;

    use crate::config::AppConfig;
    use crate::search::{
        BuildOptions, GenerationStore, MemorySource, QueryPlanner, RecordSource, SearchService,
        SourceFormat,
    };
    use crate::state::AppState;

    pub const BOOKS: &str = "\
1,Dune,Frank Herbert,Chilton,epub,1000,english,1965,412,,,,\n\
2,Dune,Frank Herbert,Ace,pdf,2000,english,1990,,,,,\n\
3,Dune Messiah,Frank Herbert,Putnam,epub,1500,english,1969,,,,,\n\
4,Emma,Jane Austen,,epub,900,english,1815,,,,,\n";

    pub fn empty_state(dir: &Path) -> Arc<AppState> {
        let service = SearchService::new(
            GenerationStore::new(dir, 2),
            QueryPlanner::default(),
            BuildOptions::default(),
        );
        Arc::new(AppState::new(Arc::new(service), &AppConfig::default()))
    }

    pub fn indexed_state(dir: &Path, csv: &str) -> Arc<AppState> {
        let state = empty_state(dir);
        let sources: Vec<Box<dyn RecordSource>> = vec![Box::new(MemorySource::new(
            "books",
            SourceFormat::Csv,
            csv.to_string(),
        ))];
        state.search.rebuild(&sources, None).unwrap();
        state
    }
}
