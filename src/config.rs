//! Application configuration module / 应用配置模块
//!
//! Manages application configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::search::{BuildOptions, Compression, LimitPolicy, QueryPlanner};

/// Global configuration instance / 全局配置实例
static CONFIG: OnceCell<Arc<RwLock<AppConfig>>> = OnceCell::new();

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration / 服务器配置
    pub server: ServerConfig,
    /// Index storage and build configuration / 索引配置
    pub index: IndexConfig,
    /// Search configuration / 搜索配置
    pub search: SearchConfig,
}

/// Server configuration / 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address / 服务器监听地址
    pub host: String,
    /// Server port / 服务器端口
    pub port: u16,
}

/// Index configuration / 索引配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Index directory, holds CURRENT and generations/ / 索引目录
    pub dir: String,
    /// Generations kept on disk, including the serving one / 保留的索引代数量
    pub keep_generations: usize,
    /// Record store compressor: none, lz4 or zstd / 压缩算法
    pub compressor: Compression,
    /// Records per compressed store block
    pub block_size: usize,
}

/// Search configuration / 搜索配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Page size when a request leaves `limit` out / 默认分页大小
    pub default_limit: i64,
    /// Largest accepted `limit` / 最大分页大小
    pub max_limit: usize,
    /// What to do with a larger limit: reject or clamp
    pub limit_policy: LimitPolicy,
    /// Per-request evaluation timeout / 查询超时(毫秒)
    pub timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        let build = BuildOptions::default();
        Self {
            dir: "index".to_string(),
            keep_generations: 2,
            compressor: build.compressor,
            block_size: build.block_size,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 30,
            max_limit: 100,
            limit_policy: LimitPolicy::Reject,
            timeout_ms: 5_000,
        }
    }
}

impl AppConfig {
    /// Get the index directory path / 获取索引目录路径
    pub fn get_index_dir(&self) -> PathBuf {
        PathBuf::from(&self.index.dir)
    }

    /// Get the server bind address / 获取服务器绑定地址
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            compressor: self.index.compressor,
            block_size: self.index.block_size.max(1),
        }
    }

    pub fn planner(&self) -> QueryPlanner {
        QueryPlanner::new(self.search.max_limit, self.search.limit_policy)
    }
}

/// Get the default config file path / 获取配置文件路径
pub fn default_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config(config_path: &Path) -> Result<AppConfig, String> {
    if config_path.exists() {
        // Load existing config / 加载现有配置
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        // Create default config / 创建默认配置
        let config = AppConfig::default();
        save_config(config_path, &config)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config_path: &Path, config: &AppConfig) -> Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}

/// Initialize global configuration / 初始化全局配置
pub fn init_config(config: AppConfig) -> Result<Arc<RwLock<AppConfig>>, String> {
    let config_arc = Arc::new(RwLock::new(config));

    CONFIG
        .set(config_arc.clone())
        .map_err(|_| "Config already initialized".to_string())?;

    Ok(config_arc)
}

/// Get global configuration instance / 获取全局配置实例
pub fn get_config() -> Arc<RwLock<AppConfig>> {
    CONFIG
        .get_or_init(|| {
            let config = load_config(&default_config_path()).unwrap_or_default();
            Arc::new(RwLock::new(config))
        })
        .clone()
}

/// Get a read-only snapshot of current config / 获取当前配置的只读快照
pub fn config() -> AppConfig {
    get_config().read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = load_config(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.search.default_limit, 30);
        assert_eq!(config.search.max_limit, 100);
        assert_eq!(config.get_bind_address(), "127.0.0.1:7070");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"index": {"compressor": "lz4"}, "search": {"limit_policy": "clamp"}}"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.index.compressor, Compression::Lz4);
        assert_eq!(config.index.keep_generations, 2);
        assert_eq!(config.search.limit_policy, LimitPolicy::Clamp);
        assert_eq!(config.server.port, 7070);
    }

    #[test]
    fn test_bad_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"index": {"compressor": "brotli"}}"#).unwrap();
        assert!(load_config(&path).is_err());
    }
}
