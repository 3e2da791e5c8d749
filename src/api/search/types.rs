use serde::{Deserialize, Serialize};

/// POST /api/admin/index/rebuild request / 重建索引请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RebuildRequest {
    /// Source files, format and compression detected from the name
    #[serde(default)]
    pub files: Vec<String>,
    /// Record store compressor override: none, lz4 or zstd
    #[serde(default)]
    pub compressor: Option<String>,
}

/// Accepted rebuild / 重建已开始
#[derive(Debug, Clone, Serialize)]
pub struct RebuildStarted {
    pub sources: Vec<String>,
}
