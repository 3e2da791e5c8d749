//! Index builder / 索引构建
//!
//! Build runs in four phases:
//! 1. parse and normalize every source in parallel (rayon)
//! 2. assign ids and reject duplicates, single-threaded in source order
//! 3. build partial postings per source in parallel, keyed by record id
//! 4. sort records by id and k-way merge the partials into ordinal postings
//!
//! Only phase 1 and 3 run in parallel, and neither decides anything that
//! depends on scheduling, so the output is a function of the input alone.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::compression::Compression;
use super::error::{IndexError, IngestError};
use super::executor::SCORING_VERSION;
use super::format::{self, Dictionary, Header};
use super::postings::{self, Ordinal};
use super::schema::{BookRecord, KeywordField, TextField};
use super::source::RecordSource;
use super::store;
use super::tokenizer::tokenize;
use crate::state::IndexState;

/// Progress is published every this many records.
const PROGRESS_BATCH: u64 = 1024;

/// Build options / 构建选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Compressor for record store blocks
    pub compressor: Compression,
    /// Records per store block
    pub block_size: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            compressor: Compression::Zstd,
            block_size: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSource {
    pub name: String,
    pub error: String,
}

/// Build report / 构建报告
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Name of the persisted generation; empty until persisted
    pub generation: String,
    pub records_indexed: usize,
    /// Malformed records plus rejected duplicates
    pub records_skipped: usize,
    pub records_flagged: usize,
    pub sources_total: usize,
    pub sources_failed: usize,
    pub failed_sources: Vec<FailedSource>,
    /// Ids seen more than once; the first occurrence was kept
    pub duplicate_ids: Vec<u64>,
    pub elapsed_ms: u64,
}

/// Token (or key) -> ordinal postings, one map per field.
pub type FieldPostings = BTreeMap<String, Vec<Ordinal>>;

/// In-memory result of a build, ready to be encoded.
#[derive(Debug, Clone)]
pub struct BuiltIndex {
    /// Ordered by id; position is the ordinal
    pub records: Vec<BookRecord>,
    /// Indexed by `TextField::index`
    pub text: Vec<FieldPostings>,
    /// Indexed by `KeywordField::index`
    pub keywords: Vec<FieldPostings>,
    pub report: BuildReport,
}

impl BuiltIndex {
    /// Encode as a generation file.
    pub fn to_bytes(&self, options: &BuildOptions, built_at_ms: i64) -> Result<Vec<u8>, IndexError> {
        let group = |fields: &[FieldPostings]| {
            let dicts: Vec<Vec<u8>> = fields
                .iter()
                .map(|postings| {
                    Dictionary::write(postings.iter().map(|(k, v)| (k.as_str(), v.as_slice())))
                })
                .collect();
            format::write_group(&dicts)
        };
        let payloads = [
            group(&self.text),
            group(&self.keywords),
            store::write_store(&self.records, options.compressor, options.block_size)?,
        ];
        Ok(Header::write_file(
            SCORING_VERSION,
            options.compressor,
            self.records.len() as u64,
            built_at_ms,
            payloads,
        ))
    }
}

/// Records of one source after phase 1.
struct ParsedSource {
    name: String,
    records: Vec<(Option<u64>, BookRecord)>,
    malformed: usize,
    error: Option<IngestError>,
}

/// Partial postings of one source, keyed by record id.
#[derive(Default)]
struct PartialPostings {
    text: Vec<HashMap<String, Vec<u64>>>,
    keywords: Vec<HashMap<String, Vec<u64>>>,
}

pub struct IndexBuilder {
    options: BuildOptions,
    progress: Option<Arc<IndexState>>,
}

impl IndexBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self {
            options,
            progress: None,
        }
    }

    /// Report processed record counts to `state` while building.
    pub fn with_progress(mut self, state: Arc<IndexState>) -> Self {
        self.progress = Some(state);
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Build an index from sources / 从数据源构建索引
    pub fn build(&self, sources: &[Box<dyn RecordSource>]) -> Result<BuiltIndex, IndexError> {
        if sources.is_empty() {
            return Err(IndexError::NoSources);
        }
        let started = Instant::now();

        // Phase 1
        let parsed: Vec<ParsedSource> = sources
            .par_iter()
            .map(|source| self.parse_source(source.as_ref()))
            .collect();

        let mut report = BuildReport {
            sources_total: sources.len(),
            ..Default::default()
        };
        let mut batches = Vec::with_capacity(parsed.len());
        for source in parsed {
            report.records_skipped += source.malformed;
            match source.error {
                Some(err) => {
                    tracing::warn!("Source {} failed, its records are discarded: {}", source.name, err);
                    report.failed_sources.push(FailedSource {
                        name: source.name,
                        error: err.to_string(),
                    });
                }
                None => batches.push(source.records),
            }
        }
        report.sources_failed = report.failed_sources.len();
        if report.sources_failed == report.sources_total {
            return Err(IndexError::AllSourcesFailed(report.sources_total));
        }

        // Phase 2
        let batches = assign_ids(batches, &mut report);

        // Phase 3
        let partials: Vec<PartialPostings> = batches
            .par_iter()
            .map(|records| partial_postings(records))
            .collect();

        // Phase 4
        let mut records: Vec<BookRecord> = batches.into_iter().flatten().collect();
        records.sort_unstable_by_key(|book| book.id);
        let ids: Vec<u64> = records.iter().map(|book| book.id).collect();
        let text = merge_fields(&ids, partials.iter().map(|p| &p.text), TextField::ALL.len());
        let keywords = merge_fields(&ids, partials.iter().map(|p| &p.keywords), KeywordField::ALL.len());

        report.records_indexed = records.len();
        report.records_flagged = records.iter().filter(|book| book.is_flagged()).count();
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            indexed = report.records_indexed,
            skipped = report.records_skipped,
            flagged = report.records_flagged,
            failed_sources = report.sources_failed,
            elapsed_ms = report.elapsed_ms,
            "Index built"
        );

        Ok(BuiltIndex {
            records,
            text,
            keywords,
            report,
        })
    }

    fn parse_source(&self, source: &dyn RecordSource) -> ParsedSource {
        let name = source.name();
        let mut parsed = ParsedSource {
            name: name.clone(),
            records: Vec::new(),
            malformed: 0,
            error: None,
        };
        let iter = match source.open() {
            Ok(iter) => iter,
            Err(err) => {
                parsed.error = Some(err);
                return parsed;
            }
        };

        let mut pending = 0u64;
        for item in iter {
            match item {
                Ok(raw) => parsed.records.push(raw.normalize()),
                Err(err) if err.is_record_local() => {
                    tracing::debug!("Skipping record: {}", err);
                    parsed.malformed += 1;
                }
                Err(err) => {
                    parsed.error = Some(err);
                    parsed.records.clear();
                    break;
                }
            }
            pending += 1;
            if pending == PROGRESS_BATCH {
                self.report_progress(pending);
                pending = 0;
            }
        }
        self.report_progress(pending);

        tracing::debug!(
            "Parsed source {}: {} records, {} malformed",
            name,
            parsed.records.len(),
            parsed.malformed
        );
        parsed
    }

    fn report_progress(&self, n: u64) {
        if let Some(state) = &self.progress {
            state.add(n);
        }
    }
}

/// Phase 2: ids come from the source when present; missing ids continue
/// after the largest id of the whole build, in source then record order.
/// Once the id space is used up, records without an id are skipped.
fn assign_ids(
    batches: Vec<Vec<(Option<u64>, BookRecord)>>,
    report: &mut BuildReport,
) -> Vec<Vec<BookRecord>> {
    let max_id = batches
        .iter()
        .flatten()
        .filter_map(|(id, _)| *id)
        .max();
    let mut next_id = max_id.map_or(Some(1), |max| max.checked_add(1));
    let mut seen = HashSet::new();
    let mut exhausted = 0usize;

    let batches = batches
        .into_iter()
        .map(|batch| {
            let mut kept = Vec::with_capacity(batch.len());
            for (source_id, mut book) in batch {
                match source_id {
                    Some(id) => {
                        if !seen.insert(id) {
                            report.duplicate_ids.push(id);
                            report.records_skipped += 1;
                            continue;
                        }
                        book.id = id;
                    }
                    None => {
                        let Some(id) = next_id else {
                            exhausted += 1;
                            continue;
                        };
                        book.id = id;
                        next_id = id.checked_add(1);
                    }
                }
                kept.push(book);
            }
            kept
        })
        .collect::<Vec<_>>();

    if exhausted > 0 {
        tracing::warn!("No ids left to assign, skipped {} records without an id", exhausted);
        report.records_skipped += exhausted;
    }
    batches
}

/// Phase 3: per-source postings, lists sorted by id.
fn partial_postings(records: &[BookRecord]) -> PartialPostings {
    let mut partial = PartialPostings {
        text: vec![HashMap::new(); TextField::ALL.len()],
        keywords: vec![HashMap::new(); KeywordField::ALL.len()],
    };
    for book in records {
        for field in TextField::ALL {
            let mut tokens = tokenize(field.value(book));
            tokens.sort_unstable();
            tokens.dedup();
            let map = &mut partial.text[field.index()];
            for token in tokens {
                map.entry(token).or_default().push(book.id);
            }
        }
        for field in KeywordField::ALL {
            let map = &mut partial.keywords[field.index()];
            for key in field.keys(book) {
                map.entry(key).or_default().push(book.id);
            }
        }
    }
    for map in partial.text.iter_mut().chain(partial.keywords.iter_mut()) {
        for ids in map.values_mut() {
            ids.sort_unstable();
            ids.dedup();
        }
    }
    partial
}

/// Phase 4: translate ids to ordinals and union the per-source lists.
fn merge_fields<'a, I>(ids: &[u64], partials: I, field_count: usize) -> Vec<FieldPostings>
where
    I: Iterator<Item = &'a Vec<HashMap<String, Vec<u64>>>>,
{
    let mut gathered: Vec<BTreeMap<&'a str, Vec<Vec<Ordinal>>>> = vec![BTreeMap::new(); field_count];
    for fields in partials {
        for (field_idx, map) in fields.iter().enumerate() {
            for (key, key_ids) in map {
                // ids are unique and sorted, so the ordinal of an id is its rank
                let ords: Vec<Ordinal> = key_ids
                    .iter()
                    .filter_map(|id| ids.binary_search(id).ok())
                    .map(|ord| ord as Ordinal)
                    .collect();
                gathered[field_idx].entry(key.as_str()).or_default().push(ords);
            }
        }
    }
    gathered
        .into_iter()
        .map(|field| {
            field
                .into_iter()
                .map(|(key, lists)| (key.to_string(), postings::union_all(&lists)))
                .collect()
        })
        .collect()
}
