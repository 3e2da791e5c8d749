use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::AppConfig;
use crate::search::SearchService;

/// Index building progress / 索引构建进度
#[derive(Debug, Clone, Serialize)]
pub struct IndexProgress {
    pub is_running: bool,
    pub is_done: bool,
    /// Raw records read so far in the current (or last) build
    pub record_count: u64,
    pub error: Option<String>,
    pub last_done_time: Option<i64>,
}

impl Default for IndexProgress {
    fn default() -> Self {
        Self {
            is_running: false,
            is_done: true,
            record_count: 0,
            error: None,
            last_done_time: None,
        }
    }
}

/// Index state management / 索引状态管理
///
/// Doubles as the single-build guard: `try_start` fails while a build runs.
pub struct IndexState {
    pub running: AtomicBool,
    pub record_count: AtomicU64,
    pub progress: RwLock<IndexProgress>,
}

impl IndexState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            record_count: AtomicU64::new(0),
            progress: RwLock::new(IndexProgress::default()),
        }
    }

    /// Mark a build as started; false if one is already running.
    pub fn try_start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.record_count.store(0, Ordering::SeqCst);
        let mut progress = self.progress.write();
        progress.is_running = true;
        progress.is_done = false;
        progress.record_count = 0;
        progress.error = None;
        true
    }

    /// Add `n` processed records.
    pub fn add(&self, n: u64) {
        if n == 0 {
            return;
        }
        let count = self.record_count.fetch_add(n, Ordering::SeqCst) + n;
        self.progress.write().record_count = count;
    }

    pub fn finish(&self, error: Option<String>) {
        let mut progress = self.progress.write();
        progress.is_running = false;
        progress.is_done = error.is_none();
        progress.error = error;
        progress.last_done_time = Some(chrono::Utc::now().timestamp());
        drop(progress);
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn get_progress(&self) -> IndexProgress {
        self.progress.read().clone()
    }
}

impl Default for IndexState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handler state / 应用状态
pub struct AppState {
    pub search: Arc<SearchService>,
    /// `limit` used when a query string leaves it out
    pub default_limit: i64,
    pub search_timeout: Duration,
}

impl AppState {
    pub fn new(search: Arc<SearchService>, config: &AppConfig) -> Self {
        Self {
            search,
            default_limit: config.search.default_limit,
            search_timeout: Duration::from_millis(config.search.timeout_ms),
        }
    }
}
