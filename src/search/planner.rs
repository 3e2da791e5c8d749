//! Query planner - turns a SearchQuery into predicate operations / 查询规划
//!
//! Every criterion becomes one clause; the executor intersects all of
//! them. Validation happens here so the executor never sees bad input.

use serde::{Deserialize, Serialize};

use super::error::QueryError;
use super::query::{FilterField, SearchMode, SearchQuery};
use super::schema::{KeywordField, NumericField, TextField};
use super::tokenizer::{has_searchable_text, tokenize_query};

/// Behaviour when `limit` is above the configured maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitPolicy {
    /// Reject with `LimitTooLarge`
    #[default]
    Reject,
    /// Silently use the maximum
    Clamp,
}

/// One predicate over the index. Each resolves to a sorted ordinal set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    /// Record with this id
    Id(u64),
    /// Any of the keys in a keyword field
    Keyword { field: KeywordField, keys: Vec<String> },
    /// All tokens inside one text field
    FieldTokens { field: TextField, tokens: Vec<String> },
    /// Free text over every text field; contributes to ranking
    FreeText { tokens: Vec<String>, mode: SearchMode },
    /// Text made only of words too long to be indexed
    MatchNone,
}

/// Inclusive bound on a numeric column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeClause {
    pub field: NumericField,
    pub min: u64,
    pub max: u64,
}

impl RangeClause {
    #[inline]
    pub fn matches(&self, value: u64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Query plan / 查询计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub clauses: Vec<Clause>,
    pub ranges: Vec<RangeClause>,
    /// Order by relevance first; otherwise id order only
    pub ranked: bool,
    pub limit: usize,
    pub offset: usize,
}

impl QueryPlan {
    /// No criteria at all: every record is a candidate.
    pub fn is_match_all(&self) -> bool {
        self.clauses.is_empty() && self.ranges.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct QueryPlanner {
    max_limit: usize,
    limit_policy: LimitPolicy,
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self {
            max_limit: 100,
            limit_policy: LimitPolicy::Reject,
        }
    }
}

impl QueryPlanner {
    pub fn new(max_limit: usize, limit_policy: LimitPolicy) -> Self {
        Self {
            max_limit: max_limit.max(1),
            limit_policy,
        }
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    pub fn plan(&self, query: &SearchQuery) -> Result<QueryPlan, QueryError> {
        let limit = self.check_limit(query.limit)?;
        if query.offset < 0 {
            return Err(QueryError::InvalidOffset(query.offset));
        }
        let offset = usize::try_from(query.offset).map_err(|_| QueryError::InvalidOffset(query.offset))?;

        let mut clauses = Vec::new();
        for (field, value) in query.text_filters() {
            let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            if let Some(clause) = structured_clause(field, value)? {
                clauses.push(clause);
            }
        }

        let mut ranked = false;
        if let Some(text) = query.query.as_deref() {
            let tokens = tokenize_query(text);
            if !tokens.is_empty() {
                ranked = true;
                clauses.push(Clause::FreeText {
                    tokens,
                    mode: query.mode,
                });
            } else if has_searchable_text(text) {
                clauses.push(Clause::MatchNone);
            }
            // punctuation only: no clause, everything matches
        }

        let mut ranges = Vec::new();
        for (field, numeric, min, max) in [
            (FilterField::Year, NumericField::Year, query.year_min, query.year_max),
            (FilterField::Pages, NumericField::Pages, query.pages_min, query.pages_max),
            (
                FilterField::Filesize,
                NumericField::Filesize,
                query.filesize_min,
                query.filesize_max,
            ),
        ] {
            if min.is_none() && max.is_none() {
                continue;
            }
            let max = max.unwrap_or(u64::MAX);
            if let Some(min) = min.filter(|min| *min > max) {
                return Err(QueryError::InvalidRange { field, min, max });
            }
            // absent year/pages are stored as 0 and never match a range
            let floor = match numeric {
                NumericField::Year | NumericField::Pages => 1,
                NumericField::Filesize => 0,
            };
            let min = min.unwrap_or(floor).max(floor);
            ranges.push(RangeClause {
                field: numeric,
                min,
                max,
            });
        }

        tracing::trace!(clauses = clauses.len(), ranges = ranges.len(), ranked, "query planned");

        Ok(QueryPlan {
            clauses,
            ranges,
            ranked,
            limit,
            offset,
        })
    }

    fn check_limit(&self, limit: i64) -> Result<usize, QueryError> {
        if limit <= 0 {
            return Err(QueryError::InvalidLimit(limit));
        }
        let requested = usize::try_from(limit).unwrap_or(usize::MAX);
        if requested <= self.max_limit {
            return Ok(requested);
        }
        match self.limit_policy {
            LimitPolicy::Reject => Err(QueryError::LimitTooLarge {
                limit,
                max: self.max_limit,
            }),
            LimitPolicy::Clamp => Ok(self.max_limit),
        }
    }
}

fn structured_clause(field: FilterField, value: &str) -> Result<Option<Clause>, QueryError> {
    let clause = match field {
        FilterField::Id => {
            let id = value.parse::<u64>().map_err(|_| QueryError::InvalidValue {
                field,
                value: value.to_string(),
            })?;
            Clause::Id(id)
        }
        FilterField::Title => field_tokens(TextField::Title, value),
        FilterField::Author => field_tokens(TextField::Author, value),
        FilterField::Publisher => field_tokens(TextField::Publisher, value),
        FilterField::Extension => keyword(KeywordField::Extension, value),
        FilterField::Language => keyword(KeywordField::Language, value),
        FilterField::Isbn => keyword(KeywordField::Isbn, value),
        FilterField::Md5 => keyword(KeywordField::Md5, value),
        FilterField::Year | FilterField::Pages | FilterField::Filesize => {
            return Err(QueryError::InvalidValue {
                field,
                value: value.to_string(),
            })
        }
    };

    let empty = match &clause {
        Clause::FieldTokens { tokens, .. } => tokens.is_empty(),
        Clause::Keyword { keys, .. } => keys.is_empty(),
        _ => false,
    };
    Ok(if empty { None } else { Some(clause) })
}

fn field_tokens(field: TextField, value: &str) -> Clause {
    let tokens = tokenize_query(value);
    if tokens.is_empty() && has_searchable_text(value) {
        return Clause::MatchNone;
    }
    Clause::FieldTokens { field, tokens }
}

fn keyword(field: KeywordField, value: &str) -> Clause {
    Clause::Keyword {
        field,
        keys: field.normalize_value(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> QueryPlanner {
        QueryPlanner::new(100, LimitPolicy::Reject)
    }

    #[test]
    fn test_empty_query_matches_all() {
        let plan = planner().plan(&SearchQuery::new(10, 0)).unwrap();
        assert!(plan.is_match_all());
        assert!(!plan.ranked);
        assert_eq!((plan.limit, plan.offset), (10, 0));
    }

    #[test]
    fn test_free_text_and_filter() {
        let query = SearchQuery::new_query("Dune  Messiah", 10, 0)
            .with_filter(FilterField::Extension, " EPUB ");
        let plan = planner().plan(&query).unwrap();
        assert!(plan.ranked);
        assert_eq!(
            plan.clauses,
            vec![
                Clause::Keyword {
                    field: KeywordField::Extension,
                    keys: vec!["epub".to_string()],
                },
                Clause::FreeText {
                    tokens: vec!["dune".to_string(), "messiah".to_string()],
                    mode: SearchMode::Filter,
                },
            ]
        );
    }

    #[test]
    fn test_punctuation_query_is_noop() {
        let plan = planner().plan(&SearchQuery::new_query("  ?!  ", 10, 0)).unwrap();
        assert!(plan.is_match_all());
        assert!(!plan.ranked);
    }

    #[test]
    fn test_overlong_words_match_nothing() {
        let word = "donaudampfschifffahrtsgesellschaftskapitaenswitwe";
        let plan = planner().plan(&SearchQuery::new_query(word, 10, 0)).unwrap();
        assert_eq!(plan.clauses, vec![Clause::MatchNone]);
        assert!(!plan.is_match_all());

        let title = SearchQuery::new(10, 0).with_filter(FilterField::Title, word);
        assert_eq!(planner().plan(&title).unwrap().clauses, vec![Clause::MatchNone]);
    }

    #[test]
    fn test_limit_validation() {
        assert_eq!(
            planner().plan(&SearchQuery::new(0, 0)).unwrap_err(),
            QueryError::InvalidLimit(0)
        );
        assert_eq!(
            planner().plan(&SearchQuery::new(101, 0)).unwrap_err(),
            QueryError::LimitTooLarge { limit: 101, max: 100 }
        );
        let clamp = QueryPlanner::new(100, LimitPolicy::Clamp);
        assert_eq!(clamp.plan(&SearchQuery::new(500, 0)).unwrap().limit, 100);
    }

    #[test]
    fn test_negative_offset_rejected() {
        assert_eq!(
            planner().plan(&SearchQuery::new(10, -1)).unwrap_err(),
            QueryError::InvalidOffset(-1)
        );
    }

    #[test]
    fn test_invalid_id() {
        let query = SearchQuery::new(10, 0).with_filter(FilterField::Id, "abc");
        assert!(matches!(
            planner().plan(&query).unwrap_err(),
            QueryError::InvalidValue { field: FilterField::Id, .. }
        ));
    }

    #[test]
    fn test_ranges() {
        let query = SearchQuery::new(10, 0).with_range(FilterField::Year, Some(1960), None);
        let plan = planner().plan(&query).unwrap();
        assert_eq!(
            plan.ranges,
            vec![RangeClause {
                field: NumericField::Year,
                min: 1960,
                max: u64::MAX
            }]
        );

        let upper_only = SearchQuery::new(10, 0).with_range(FilterField::Pages, None, Some(500));
        assert_eq!(
            planner().plan(&upper_only).unwrap().ranges,
            vec![RangeClause {
                field: NumericField::Pages,
                min: 1,
                max: 500
            }]
        );

        let bad = SearchQuery::new(10, 0).with_range(FilterField::Pages, Some(10), Some(5));
        assert!(matches!(
            planner().plan(&bad).unwrap_err(),
            QueryError::InvalidRange { field: FilterField::Pages, .. }
        ));
    }

    #[test]
    fn test_title_filter_is_field_scoped() {
        let query = SearchQuery::new(10, 0).with_filter(FilterField::Title, "The Dune");
        let plan = planner().plan(&query).unwrap();
        assert_eq!(
            plan.clauses,
            vec![Clause::FieldTokens {
                field: TextField::Title,
                tokens: vec!["the".to_string(), "dune".to_string()],
            }]
        );
        assert!(!plan.ranked);
    }
}
