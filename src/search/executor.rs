//! Query executor / 查询执行
//!
//! Resolves every clause of a plan to a sorted ordinal set, intersects them
//! smallest first, applies range clauses on the fixed-width columns, ranks
//! and paginates. Reads only the immutable generation it was handed.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::error::SearchError;
use super::generation::IndexGeneration;
use super::planner::{Clause, QueryPlan};
use super::postings::{intersect_all, union_all, Ordinal};
use super::query::{SearchMode, SearchResult};
use super::schema::TextField;
use super::tokenizer::is_short_token;

/// Version of the ranking function, stored in every generation header.
pub const SCORING_VERSION: u32 = 2;

const TOKEN_WEIGHT: u32 = 2;
const SHORT_TOKEN_WEIGHT: u32 = 1;

/// Quality factors are `log10(10 + boost)` in thousandths.
const QUALITY_SCALE: f64 = 1000.0;

/// Per-field multiplier of a free-text match / 字段权重
fn field_weight(field: TextField) -> u32 {
    match field {
        TextField::Title => 3,
        TextField::Author => 2,
        TextField::Publisher | TextField::Isbn => 1,
    }
}

/// Relevance multiplier for a stored quality boost; 1000 for a bare record.
fn quality_factor(boost: u8) -> u64 {
    ((10.0 + f64::from(boost)).log10() * QUALITY_SCALE).round() as u64
}

/// Cancellation is polled once per this many candidates.
const CANCEL_CHECK_INTERVAL: usize = 4096;

/// Cooperative cancellation flag shared with a running search / 取消标记
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), SearchError> {
        if self.is_cancelled() {
            Err(SearchError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A posting list that adds `weight` to every candidate it contains.
struct ScoreList {
    weight: u32,
    ordinals: Vec<Ordinal>,
}

/// Execute a plan against one generation / 执行查询计划
pub fn execute(
    generation: &IndexGeneration,
    plan: &QueryPlan,
    cancel: &CancelToken,
) -> Result<SearchResult, SearchError> {
    cancel.check()?;

    let mut score_lists = Vec::new();
    let candidates: Vec<Ordinal> = if plan.clauses.is_empty() {
        (0..generation.record_count() as Ordinal).collect()
    } else {
        let mut sets = Vec::with_capacity(plan.clauses.len());
        for clause in &plan.clauses {
            cancel.check()?;
            let set = resolve(generation, clause, &mut score_lists)?;
            let empty = set.is_empty();
            sets.push(set);
            if empty {
                break;
            }
        }
        intersect_all(sets)
    };

    let candidates = apply_ranges(generation, plan, candidates, cancel)?;
    let total = candidates.len();
    let end = plan.offset.saturating_add(plan.limit);

    let page: Vec<Ordinal> = if plan.ranked && plan.offset < total {
        let scores = score(&candidates, &score_lists, cancel)?;
        let store = generation.store();
        let mut ranked: Vec<(u64, Ordinal)> = scores
            .into_iter()
            .zip(candidates)
            .map(|(relevance, ord)| (u64::from(relevance) * quality_factor(store.quality(ord)), ord))
            .collect();
        // higher score first, ties by ordinal, which is id order
        let cmp = |a: &(u64, Ordinal), b: &(u64, Ordinal)| -> CmpOrdering {
            (Reverse(a.0), a.1).cmp(&(Reverse(b.0), b.1))
        };
        if end < ranked.len() {
            ranked.select_nth_unstable_by(end, cmp);
            ranked.truncate(end);
        }
        ranked.sort_unstable_by(cmp);
        ranked[plan.offset..].iter().map(|(_, ord)| *ord).collect()
    } else {
        let start = plan.offset.min(total);
        candidates[start..end.min(total)].to_vec()
    };

    cancel.check()?;
    let books = generation.store().get_many(&page)?;

    Ok(SearchResult {
        total,
        offset: plan.offset,
        limit: plan.limit,
        books,
    })
}

fn resolve(
    generation: &IndexGeneration,
    clause: &Clause,
    score_lists: &mut Vec<ScoreList>,
) -> Result<Vec<Ordinal>, SearchError> {
    let set = match clause {
        Clause::MatchNone => Vec::new(),
        Clause::Id(id) => generation.store().ordinal_of(*id).into_iter().collect(),
        Clause::Keyword { field, keys } => {
            let dict = generation.keyword(*field);
            let lists = keys
                .iter()
                .map(|key| dict.get(key))
                .collect::<Result<Vec<_>, _>>()?;
            union_all(&lists)
        }
        Clause::FieldTokens { field, tokens } => {
            let dict = generation.text(*field);
            let lists = tokens
                .iter()
                .map(|token| dict.get(token))
                .collect::<Result<Vec<_>, _>>()?;
            intersect_all(lists)
        }
        Clause::FreeText { tokens, mode } => {
            let mut per_token = Vec::with_capacity(tokens.len());
            for token in tokens {
                let token_weight = if is_short_token(token) {
                    SHORT_TOKEN_WEIGHT
                } else {
                    TOKEN_WEIGHT
                };
                let mut fields = Vec::with_capacity(TextField::ALL.len());
                for field in TextField::ALL {
                    let ordinals = generation.text(field).get(token)?;
                    if !ordinals.is_empty() {
                        fields.push(ordinals.clone());
                        score_lists.push(ScoreList {
                            weight: token_weight * field_weight(field),
                            ordinals,
                        });
                    }
                }
                per_token.push(union_all(&fields));
            }
            match mode {
                SearchMode::Filter => intersect_all(per_token),
                SearchMode::Explore => union_all(&per_token),
            }
        }
    };
    Ok(set)
}

fn apply_ranges(
    generation: &IndexGeneration,
    plan: &QueryPlan,
    candidates: Vec<Ordinal>,
    cancel: &CancelToken,
) -> Result<Vec<Ordinal>, SearchError> {
    if plan.ranges.is_empty() {
        return Ok(candidates);
    }
    let store = generation.store();
    let mut kept = Vec::with_capacity(candidates.len());
    for (i, ord) in candidates.into_iter().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 {
            cancel.check()?;
        }
        if plan
            .ranges
            .iter()
            .all(|range| range.matches(store.numeric(range.field, ord)))
        {
            kept.push(ord);
        }
    }
    Ok(kept)
}

/// Relevance: sum of token weight times field weight over every
/// (token, field) match, aligned with `candidates`.
fn score(
    candidates: &[Ordinal],
    score_lists: &[ScoreList],
    cancel: &CancelToken,
) -> Result<Vec<u32>, SearchError> {
    let mut scores = vec![0u32; candidates.len()];
    for list in score_lists {
        cancel.check()?;
        let (mut i, mut j) = (0usize, 0usize);
        while i < candidates.len() && j < list.ordinals.len() {
            match candidates[i].cmp(&list.ordinals[j]) {
                CmpOrdering::Less => i += 1,
                CmpOrdering::Greater => j += 1,
                CmpOrdering::Equal => {
                    scores[i] += list.weight;
                    i += 1;
                    j += 1;
                }
            }
        }
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::builder::{BuildOptions, IndexBuilder};
    use crate::search::planner::QueryPlanner;
    use crate::search::query::{FilterField, SearchQuery};
    use crate::search::source::{MemorySource, RecordSource, SourceFormat};

    const CATALOG: &str = "\
1,Dune,Frank Herbert,Chilton,epub,1000,english,1965,412,978-0441013593,,,aaa\n\
2,Dune,Frank Herbert,Ace,pdf,2000,english,1990,,,,,bbb\n\
3,Dune Messiah,Frank Herbert,Putnam,epub,1500,english,1969,,,,,ccc\n\
4,Emma,Jane Austen,,epub,900,english,1815,,,,,ddd\n\
5,Children of Dune,Frank Herbert,,mobi,1700,english,1976,,,,,eee\n\
6,Der Wüstenplanet,Frank Herbert,,epub,1100,german,1967,,,,,fff\n";

    fn generation() -> IndexGeneration {
        generation_from(CATALOG)
    }

    fn generation_from(csv: &'static str) -> IndexGeneration {
        let sources: Vec<Box<dyn RecordSource>> =
            vec![Box::new(MemorySource::new("catalog", SourceFormat::Csv, csv))];
        let options = BuildOptions {
            block_size: 2,
            ..Default::default()
        };
        let built = IndexBuilder::new(options).build(&sources).unwrap();
        let bytes = built.to_bytes(&options, 0).unwrap();
        IndexGeneration::from_bytes("test", bytes.into()).unwrap()
    }

    fn run(gen: &IndexGeneration, query: &SearchQuery) -> SearchResult {
        let plan = QueryPlanner::default().plan(query).unwrap();
        execute(gen, &plan, &CancelToken::new()).unwrap()
    }

    fn ids(result: &SearchResult) -> Vec<u64> {
        result.books.iter().map(|b| b.id).collect()
    }

    #[test]
    fn test_dune_epub() {
        let gen = generation();
        let query = SearchQuery::new_query("dune", 10, 0).with_filter(FilterField::Extension, "epub");
        let result = run(&gen, &query);
        assert_eq!(result.total, 2);
        assert_eq!(ids(&result), vec![1, 3]);
    }

    #[test]
    fn test_ranking_prefers_more_matches() {
        let gen = generation();
        let result = run(&gen, &SearchQuery::new_query("dune herbert", 10, 0));
        // same matches everywhere; 1 has pages, 5 has no publisher; 2 and 3 tie by id
        assert_eq!(ids(&result), vec![1, 2, 3, 5]);

        let result = run(&gen, &SearchQuery::new_query("dune messiah", 10, 0).with_mode(SearchMode::Explore));
        assert_eq!(result.books[0].id, 3);
        assert_eq!(result.total, 4);
    }

    #[test]
    fn test_title_match_outranks_author_match() {
        let gen = generation_from(
            "10,Emma,Austen,,epub,1,english,,,,,,\n\
             11,Austen Letters,Someone,,epub,1,english,,,,,,\n",
        );
        let result = run(&gen, &SearchQuery::new_query("austen", 10, 0));
        assert_eq!(ids(&result), vec![11, 10]);
    }

    #[test]
    fn test_complete_record_outranks_sparse_duplicate() {
        let gen = generation_from(
            "20,Foundation,,,epub,1,,,,,,,\n\
             21,Foundation,Isaac Asimov,Gnome,epub,1,english,1951,255,,,http://covers/21.jpg,\n",
        );
        let result = run(&gen, &SearchQuery::new_query("foundation", 10, 0));
        assert_eq!(ids(&result), vec![21, 20]);
        assert!(quality_factor(75) > quality_factor(0));
        assert_eq!(quality_factor(0), 1000);
    }

    #[test]
    fn test_overlong_query_matches_nothing() {
        let gen = generation();
        let long = "x".repeat(60);
        let result = run(&gen, &SearchQuery::new_query(long, 10, 0));
        assert_eq!(result.total, 0);
        assert!(result.books.is_empty());
    }

    #[test]
    fn test_empty_query_returns_id_order() {
        let gen = generation();
        let result = run(&gen, &SearchQuery::new(3, 2));
        assert_eq!(result.total, 6);
        assert_eq!(ids(&result), vec![3, 4, 5]);
    }

    #[test]
    fn test_offset_past_total() {
        let gen = generation();
        let result = run(&gen, &SearchQuery::new_query("dune", 10, 50));
        assert_eq!(result.total, 4);
        assert!(result.books.is_empty());
    }

    #[test]
    fn test_pagination_is_consistent() {
        let gen = generation();
        let all = ids(&run(&gen, &SearchQuery::new_query("herbert dune", 10, 0).with_mode(SearchMode::Explore)));
        let mut paged = Vec::new();
        for offset in (0..all.len()).step_by(2) {
            let page = run(
                &gen,
                &SearchQuery::new_query("herbert dune", 2, offset as i64).with_mode(SearchMode::Explore),
            );
            paged.extend(ids(&page));
        }
        assert_eq!(paged, all);
    }

    #[test]
    fn test_structured_filters() {
        let gen = generation();
        let by_id = run(&gen, &SearchQuery::new(10, 0).with_filter(FilterField::Id, "4"));
        assert_eq!(ids(&by_id), vec![4]);

        let by_md5 = run(&gen, &SearchQuery::new(10, 0).with_filter(FilterField::Md5, "CCC"));
        assert_eq!(ids(&by_md5), vec![3]);

        let by_isbn = run(&gen, &SearchQuery::new(10, 0).with_filter(FilterField::Isbn, "9780441013593"));
        assert_eq!(ids(&by_isbn), vec![1]);

        let by_author = run(&gen, &SearchQuery::new(10, 0).with_filter(FilterField::Author, "austen"));
        assert_eq!(ids(&by_author), vec![4]);

        let by_title = run(&gen, &SearchQuery::new(10, 0).with_filter(FilterField::Title, "herbert"));
        assert_eq!(by_title.total, 0);
    }

    #[test]
    fn test_and_semantics() {
        let gen = generation();
        let query = SearchQuery::new(10, 0)
            .with_filter(FilterField::Extension, "epub")
            .with_filter(FilterField::Language, "german");
        assert_eq!(ids(&run(&gen, &query)), vec![6]);

        let none = SearchQuery::new(10, 0)
            .with_filter(FilterField::Extension, "mobi")
            .with_filter(FilterField::Language, "german");
        assert_eq!(run(&gen, &none).total, 0);
    }

    #[test]
    fn test_range_filters() {
        let gen = generation();
        let query = SearchQuery::new_query("dune", 10, 0).with_range(FilterField::Year, Some(1966), Some(1980));
        assert_eq!(ids(&run(&gen, &query)), vec![3, 5]);

        let pages = SearchQuery::new(10, 0).with_range(FilterField::Pages, Some(1), None);
        assert_eq!(ids(&run(&gen, &pages)), vec![1]);

        // an upper bound alone never matches records without a value
        let pages = SearchQuery::new(10, 0).with_range(FilterField::Pages, None, Some(500));
        assert_eq!(ids(&run(&gen, &pages)), vec![1]);

        let dated = generation_from(
            "1,Dated,A,,epub,1,english,1965,,,,,\n\
             2,Undated,B,,epub,1,english,,,,,,\n",
        );
        let before = SearchQuery::new(10, 0).with_range(FilterField::Year, None, Some(1970));
        assert_eq!(ids(&run(&dated, &before)), vec![1]);
    }

    #[test]
    fn test_unicode_query() {
        let gen = generation();
        let result = run(&gen, &SearchQuery::new_query("WÜSTENPLANET", 10, 0));
        assert_eq!(ids(&result), vec![6]);
    }

    #[test]
    fn test_cancelled() {
        let gen = generation();
        let plan = QueryPlanner::default().plan(&SearchQuery::new(10, 0)).unwrap();
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(execute(&gen, &plan, &token), Err(SearchError::Cancelled)));
    }
}
