//! Error types for indexing and searching / 索引与搜索错误类型
//!
//! Ingestion errors are recovered inside the builder and end up in the
//! build report. Query errors are rejected before execution. Index errors
//! are fatal to the operation in progress.

use std::path::PathBuf;

use thiserror::Error;

use super::query::FilterField;

/// Errors raised while reading a single record source.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open source {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O or decompression failure in the middle of a source. Fails the whole source.
    #[error("read error: {0}")]
    Read(#[from] std::io::Error),

    /// A single record that could not be decoded. Only that record is skipped.
    #[error("malformed record at {location}: {message}")]
    Malformed { location: String, message: String },

    #[error("unsupported source format: {0}")]
    UnsupportedFormat(String),
}

impl IngestError {
    /// Whether this error only affects the current record.
    pub fn is_record_local(&self) -> bool {
        matches!(self, IngestError::Malformed { .. })
    }
}

/// Query validation errors / 查询校验错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unknown filter field: {0}")]
    UnknownField(String),

    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: FilterField, value: String },

    #[error("limit must be a positive integer, got {0}")]
    InvalidLimit(i64),

    #[error("limit {limit} exceeds the maximum of {max}")]
    LimitTooLarge { limit: i64, max: usize },

    #[error("offset must be non-negative, got {0}")]
    InvalidOffset(i64),

    #[error("invalid range for {field}: min {min} is greater than max {max}")]
    InvalidRange { field: FilterField, min: u64, max: u64 },

    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid number for {name}: {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("unknown search mode {0:?}, expected filter or explore")]
    InvalidMode(String),
}

/// Index storage and lifecycle errors / 索引存储错误
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted index: {0}")]
    Corrupt(String),

    #[error("unsupported index format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("an index build is already running")]
    BuildInProgress,

    #[error("no record sources given")]
    NoSources,

    #[error("all {0} record sources failed")]
    AllSourcesFailed(usize),

    #[error("unknown compressor {0:?}, expected one of: none, lz4, zstd")]
    UnknownCompressor(String),
}

impl IndexError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        IndexError::Corrupt(message.into())
    }
}

/// Errors returned by the search boundary.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("no index generation is available")]
    IndexUnavailable,

    #[error("search was cancelled")]
    Cancelled,

    #[error("search timed out after {0} ms")]
    Timeout(u64),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            SearchError::Query(_) => 400,
            SearchError::IndexUnavailable => 503,
            SearchError::Timeout(_) => 504,
            SearchError::Index(IndexError::BuildInProgress) => 409,
            SearchError::Index(_) | SearchError::Cancelled | SearchError::Internal(_) => 500,
        }
    }

    /// Stable machine readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::Query(QueryError::UnknownField(_)) => "unknown_field",
            SearchError::Query(QueryError::InvalidValue { .. }) => "invalid_value",
            SearchError::Query(QueryError::InvalidLimit(_)) => "invalid_limit",
            SearchError::Query(QueryError::LimitTooLarge { .. }) => "limit_too_large",
            SearchError::Query(QueryError::InvalidOffset(_)) => "invalid_offset",
            SearchError::Query(QueryError::InvalidRange { .. }) => "invalid_range",
            SearchError::Query(QueryError::MissingParameter(_)) => "missing_parameter",
            SearchError::Query(QueryError::InvalidNumber { .. }) => "invalid_value",
            SearchError::Query(QueryError::InvalidMode(_)) => "invalid_mode",
            SearchError::Index(IndexError::Corrupt(_)) => "index_corrupt",
            SearchError::Index(IndexError::BuildInProgress) => "build_in_progress",
            SearchError::Index(_) => "index_error",
            SearchError::IndexUnavailable => "index_unavailable",
            SearchError::Cancelled => "cancelled",
            SearchError::Timeout(_) => "timeout",
            SearchError::Internal(_) => "internal",
        }
    }
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;
