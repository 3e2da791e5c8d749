//! Search service - owns the serving generation / 搜索服务
//!
//! Readers clone the `Arc` of the current generation when a request starts
//! and keep it until they finish; `publish` swaps the pointer under a short
//! write lock. An old generation is freed when its last reader drops it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;

use super::builder::{BuildOptions, BuildReport, IndexBuilder};
use super::compression::Compression;
use super::error::{IndexError, SearchError};
use super::executor::{self, CancelToken};
use super::generation::{GenerationInfo, GenerationStore, IndexGeneration};
use super::planner::QueryPlanner;
use super::query::{SearchQuery, SearchResult};
use super::source::RecordSource;
use crate::state::{IndexProgress, IndexState};

/// Index status for the admin endpoint / 索引状态
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    /// Serving generation, if any
    pub generation: Option<GenerationInfo>,
    pub build: IndexProgress,
}

pub struct SearchService {
    current: RwLock<Option<Arc<IndexGeneration>>>,
    planner: QueryPlanner,
    generations: GenerationStore,
    build_options: BuildOptions,
    index_state: Arc<IndexState>,
}

impl SearchService {
    pub fn new(generations: GenerationStore, planner: QueryPlanner, build_options: BuildOptions) -> Self {
        Self {
            current: RwLock::new(None),
            planner,
            generations,
            build_options,
            index_state: Arc::new(IndexState::new()),
        }
    }

    /// Load the generation named by `CURRENT`, if there is one / 加载当前索引
    ///
    /// Returns whether a generation is now being served.
    pub fn open_current(&self) -> Result<bool, IndexError> {
        match self.generations.load_current()? {
            Some(generation) => {
                self.publish(Arc::new(generation));
                Ok(true)
            }
            None => {
                tracing::warn!(
                    "No index found in {:?}, searches fail until an index is built",
                    self.generations.dir()
                );
                Ok(false)
            }
        }
    }

    /// The generation new requests will read.
    pub fn snapshot(&self) -> Option<Arc<IndexGeneration>> {
        self.current.read().clone()
    }

    /// Make `generation` current, returning the one it replaced.
    pub fn publish(&self, generation: Arc<IndexGeneration>) -> Option<Arc<IndexGeneration>> {
        let name = generation.name().to_string();
        let previous = std::mem::replace(&mut *self.current.write(), Some(generation));
        tracing::info!(
            "Published index generation {} (replaced {:?})",
            name,
            previous.as_ref().map(|g| g.name().to_string())
        );
        previous
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    pub fn index_state(&self) -> &Arc<IndexState> {
        &self.index_state
    }

    /// Search / 搜索
    pub fn search(&self, query: &SearchQuery) -> Result<SearchResult, SearchError> {
        self.search_with_cancel(query, &CancelToken::new())
    }

    pub fn search_with_cancel(
        &self,
        query: &SearchQuery,
        cancel: &CancelToken,
    ) -> Result<SearchResult, SearchError> {
        let plan = self.planner.plan(query)?;
        let generation = self.snapshot().ok_or(SearchError::IndexUnavailable)?;
        executor::execute(&generation, &plan, cancel)
    }

    /// Search on the blocking pool; abandoned and cancelled after `timeout`.
    pub async fn search_with_timeout(
        self: &Arc<Self>,
        query: SearchQuery,
        timeout: Duration,
    ) -> Result<SearchResult, SearchError> {
        let plan = self.planner.plan(&query)?;
        let generation = self.snapshot().ok_or(SearchError::IndexUnavailable)?;

        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let task = tokio::task::spawn_blocking(move || executor::execute(&generation, &plan, &worker_cancel));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SearchError::Internal(format!("search task failed: {}", e))),
            Err(_) => {
                cancel.cancel();
                tracing::warn!("Search timed out after {:?}", timeout);
                Err(SearchError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Build, persist, load and publish a new generation / 重建索引
    ///
    /// Blocking. On any failure the serving generation is left untouched.
    pub fn rebuild(
        &self,
        sources: &[Box<dyn RecordSource>],
        compressor: Option<Compression>,
    ) -> Result<BuildReport, SearchError> {
        if !self.index_state.try_start() {
            return Err(IndexError::BuildInProgress.into());
        }
        let result = self.rebuild_inner(sources, compressor);
        self.index_state
            .finish(result.as_ref().err().map(|e| e.to_string()));
        match &result {
            Ok(report) => tracing::info!("Index rebuild finished: generation {}", report.generation),
            Err(e) => tracing::error!("Index rebuild failed: {}", e),
        }
        result.map_err(SearchError::from)
    }

    fn rebuild_inner(
        &self,
        sources: &[Box<dyn RecordSource>],
        compressor: Option<Compression>,
    ) -> Result<BuildReport, IndexError> {
        let mut options = self.build_options;
        if let Some(compressor) = compressor {
            options.compressor = compressor;
        }

        let built = IndexBuilder::new(options)
            .with_progress(self.index_state.clone())
            .build(sources)?;
        let built_at_ms = chrono::Utc::now().timestamp_millis();
        let bytes = Bytes::from(built.to_bytes(&options, built_at_ms)?);

        let name = self.generations.next_name(built_at_ms)?;
        self.generations.write(&name, &bytes)?;
        // validate what was written before anyone can be pointed at it
        let generation = IndexGeneration::from_bytes(name.clone(), bytes)?;
        self.generations.set_current(&name)?;
        self.publish(Arc::new(generation));

        if let Err(e) = self.generations.prune() {
            tracing::warn!("Failed to prune old generations: {}", e);
        }

        let mut report = built.report;
        report.generation = name;
        Ok(report)
    }

    pub fn status(&self) -> IndexStatus {
        IndexStatus {
            generation: self.snapshot().map(|g| g.info()),
            build: self.index_state.get_progress(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::compression::test_util::{lz4_frame, zstd_stream};
    use crate::search::query::FilterField;
    use crate::search::source::{FileSource, MemorySource, SourceFormat};

    const BOOKS: &str = "\
1,Dune,Frank Herbert,Chilton,epub,1000,english,1965,412,,,,\n\
2,Dune,Frank Herbert,Ace,pdf,2000,english,1990,,,,,\n\
3,Dune Messiah,Frank Herbert,Putnam,epub,1500,english,1969,,,,,\n\
4,Emma,Jane Austen,,epub,900,english,1815,,,,,\n";

    fn service(dir: &std::path::Path) -> SearchService {
        SearchService::new(
            GenerationStore::new(dir, 2),
            QueryPlanner::default(),
            BuildOptions::default(),
        )
    }

    fn csv(name: &str, data: &str) -> Vec<Box<dyn RecordSource>> {
        vec![Box::new(MemorySource::new(name, SourceFormat::Csv, data.to_string()))]
    }

    fn ids(result: &SearchResult) -> Vec<u64> {
        result.books.iter().map(|b| b.id).collect()
    }

    #[test]
    fn test_unavailable_before_build() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        assert!(!service.open_current().unwrap());
        assert!(matches!(
            service.search(&SearchQuery::new(10, 0)),
            Err(SearchError::IndexUnavailable)
        ));
        // validation still comes first
        assert!(matches!(
            service.search(&SearchQuery::new(0, 0)),
            Err(SearchError::Query(_))
        ));
    }

    #[test]
    fn test_rebuild_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let report = {
            let service = service(dir.path());
            let report = service.rebuild(&csv("books", BOOKS), None).unwrap();
            let query = SearchQuery::new_query("dune", 10, 0).with_filter(FilterField::Extension, "epub");
            let result = service.search(&query).unwrap();
            assert_eq!(result.total, 2);
            assert_eq!(ids(&result), vec![1, 3]);
            report
        };
        assert_eq!(report.records_indexed, 4);
        assert!(!report.generation.is_empty());

        let reopened = service(dir.path());
        assert!(reopened.open_current().unwrap());
        let status = reopened.status();
        let info = status.generation.unwrap();
        assert_eq!(info.name, report.generation);
        assert_eq!(info.record_count, 4);
        assert_eq!(info.scoring_version, executor::SCORING_VERSION);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let query = SearchQuery::new_query("frank dune", 10, 0);
        service.rebuild(&csv("books", BOOKS), None).unwrap();
        let first = service.search(&query).unwrap();
        service.rebuild(&csv("books", BOOKS), None).unwrap();
        let second = service.search(&query).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_failed_rebuild_keeps_serving() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let first = service.rebuild(&csv("books", BOOKS), None).unwrap();

        let broken: Vec<Box<dyn RecordSource>> = vec![Box::new(
            MemorySource::new("broken", SourceFormat::Csv, b"\x28\xb5\x2f\xfd not zstd".to_vec())
                .with_compression(Compression::Zstd),
        )];
        assert!(service.rebuild(&broken, None).is_err());
        assert_eq!(service.snapshot().unwrap().name(), first.generation);
        assert_eq!(service.search(&SearchQuery::new(10, 0)).unwrap().total, 4);
        let progress = service.status().build;
        assert!(progress.error.is_some());
        assert!(!progress.is_running);
    }

    #[test]
    fn test_rebuild_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        assert!(service.index_state().try_start());
        assert!(matches!(
            service.rebuild(&csv("books", BOOKS), None),
            Err(SearchError::Index(IndexError::BuildInProgress))
        ));
        service.index_state().finish(None);
        assert!(service.rebuild(&csv("books", BOOKS), None).is_ok());
    }

    #[test]
    fn test_snapshot_survives_publish() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        service.rebuild(&csv("old", BOOKS), None).unwrap();
        let in_flight = service.snapshot().unwrap();

        service
            .rebuild(&csv("new", "9,Neuromancer,William Gibson,,epub,1,english,1984,,,,,\n"), None)
            .unwrap();

        // the reader's snapshot is unaffected by the swap
        assert_eq!(in_flight.record_count(), 4);
        let plan = QueryPlanner::default().plan(&SearchQuery::new_query("dune", 10, 0)).unwrap();
        let old = executor::execute(&in_flight, &plan, &CancelToken::new()).unwrap();
        assert_eq!(old.total, 3);

        let new = service.search(&SearchQuery::new_query("dune", 10, 0)).unwrap();
        assert_eq!(new.total, 0);
        assert_eq!(service.snapshot().unwrap().record_count(), 1);
    }

    #[test]
    fn test_compressed_file_sources() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        let lz4_path = data_dir.path().join("part1.csv.lz4");
        let zst_path = data_dir.path().join("part2.jsonl.zst");
        std::fs::write(&lz4_path, lz4_frame(BOOKS.as_bytes())).unwrap();
        std::fs::write(
            &zst_path,
            zstd_stream(b"{\"id\":10,\"title\":\"Dune\",\"author\":\"Brian Herbert\",\"extension\":\"EPUB\"}\n"),
        )
        .unwrap();

        let sources: Vec<Box<dyn RecordSource>> = vec![
            Box::new(FileSource::detect(&lz4_path).unwrap()),
            Box::new(FileSource::detect(&zst_path).unwrap()),
        ];
        let service = service(dir.path());
        let report = service.rebuild(&sources, Some(Compression::Lz4)).unwrap();
        assert_eq!(report.records_indexed, 5);
        assert_eq!(service.status().generation.unwrap().compressor, Compression::Lz4);

        let query = SearchQuery::new_query("dune", 10, 0).with_filter(FilterField::Extension, "epub");
        assert_eq!(ids(&service.search(&query).unwrap()), vec![1, 3, 10]);
    }

    #[tokio::test]
    async fn test_search_with_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(service(dir.path()));
        service.rebuild(&csv("books", BOOKS), None).unwrap();
        let result = service
            .search_with_timeout(SearchQuery::new_query("emma", 10, 0), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ids(&result), vec![4]);
    }

    #[tokio::test]
    async fn test_search_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(service(dir.path()));
        service.rebuild(&csv("books", BOOKS), None).unwrap();
        let err = service
            .search_with_timeout(SearchQuery::new_query("dune", 10, 0), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Timeout(0)));
        assert_eq!(err.status_code(), 504);
    }
}
