//! Search module - book catalog indexing and querying / 搜索模块
//!
//! Layers, leaves first / 分层：
//! - Record model: `schema`, `tokenizer`
//! - Index builder: `source`, `compression`, `builder`, `format`, `store`, `generation`
//! - Query planner: `query`, `planner`
//! - Query executor: `postings`, `executor`
//! - Search service: `service`, holds the serving generation
//!
//! Supports multilingual search (Chinese via jieba, Latin scripts via word
//! splitting) with Unicode NFKC folding on both the index and query side.

pub mod builder;
pub mod compression;
pub mod error;
pub mod executor;
pub mod format;
pub mod generation;
pub mod planner;
pub mod postings;
pub mod query;
pub mod schema;
pub mod service;
pub mod source;
pub mod store;
pub mod tokenizer;

pub use builder::{BuildOptions, BuildReport, IndexBuilder};
pub use compression::Compression;
pub use error::{IndexError, IngestError, QueryError, SearchError};
pub use executor::{CancelToken, SCORING_VERSION};
pub use generation::{GenerationInfo, GenerationStore, IndexGeneration};
pub use planner::{LimitPolicy, QueryPlan, QueryPlanner};
pub use query::{FilterField, SearchMode, SearchQuery, SearchResult};
pub use schema::BookRecord;
pub use service::{IndexStatus, SearchService};
pub use source::{FileSource, MemorySource, RecordSource, SourceFormat};
