//! Search query boundary types / 搜索查询类型

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::QueryError;
use super::schema::BookRecord;

/// Fields a caller may filter on / 可过滤字段
///
/// Closed set: an unknown field name is a validation error, never a lookup miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    Id,
    Title,
    Author,
    Publisher,
    Extension,
    Language,
    Isbn,
    Md5,
    Year,
    Pages,
    Filesize,
}

impl FilterField {
    pub fn name(self) -> &'static str {
        match self {
            FilterField::Id => "id",
            FilterField::Title => "title",
            FilterField::Author => "author",
            FilterField::Publisher => "publisher",
            FilterField::Extension => "extension",
            FilterField::Language => "language",
            FilterField::Isbn => "isbn",
            FilterField::Md5 => "md5",
            FilterField::Year => "year",
            FilterField::Pages => "pages",
            FilterField::Filesize => "filesize",
        }
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterField {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(FilterField::Id),
            "title" => Ok(FilterField::Title),
            "author" => Ok(FilterField::Author),
            "publisher" => Ok(FilterField::Publisher),
            "extension" => Ok(FilterField::Extension),
            "language" => Ok(FilterField::Language),
            "isbn" => Ok(FilterField::Isbn),
            "md5" => Ok(FilterField::Md5),
            "year" => Ok(FilterField::Year),
            "pages" => Ok(FilterField::Pages),
            "filesize" => Ok(FilterField::Filesize),
            other => Err(QueryError::UnknownField(other.to_string())),
        }
    }
}

/// How free-text tokens combine / 自由文本匹配模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Every token must match
    #[default]
    Filter,
    /// Any token may match
    Explore,
}

impl FromStr for SearchMode {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filter" => Ok(SearchMode::Filter),
            "explore" => Ok(SearchMode::Explore),
            other => Err(QueryError::InvalidMode(other.to_string())),
        }
    }
}

/// Search query / 搜索请求
///
/// `limit` and `offset` are signed so that negative input reaches the
/// planner and is rejected there with a descriptive error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchQuery {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,

    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub mode: SearchMode,

    #[serde(default)]
    pub year_min: Option<u64>,
    #[serde(default)]
    pub year_max: Option<u64>,
    #[serde(default)]
    pub pages_min: Option<u64>,
    #[serde(default)]
    pub pages_max: Option<u64>,
    #[serde(default)]
    pub filesize_min: Option<u64>,
    #[serde(default)]
    pub filesize_max: Option<u64>,

    pub limit: i64,
    pub offset: i64,
}

impl SearchQuery {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit,
            offset,
            ..Default::default()
        }
    }

    pub fn new_query(query: impl Into<String>, limit: i64, offset: i64) -> Self {
        Self {
            query: Some(query.into()),
            limit,
            offset,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, field: FilterField, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match field {
            FilterField::Id => self.id = value,
            FilterField::Title => self.title = value,
            FilterField::Author => self.author = value,
            FilterField::Publisher => self.publisher = value,
            FilterField::Extension => self.extension = value,
            FilterField::Language => self.language = value,
            FilterField::Isbn => self.isbn = value,
            FilterField::Md5 => self.md5 = value,
            // numeric fields use with_range
            FilterField::Year | FilterField::Pages | FilterField::Filesize => {}
        }
        self
    }

    pub fn with_range(mut self, field: FilterField, min: Option<u64>, max: Option<u64>) -> Self {
        match field {
            FilterField::Year => (self.year_min, self.year_max) = (min, max),
            FilterField::Pages => (self.pages_min, self.pages_max) = (min, max),
            FilterField::Filesize => (self.filesize_min, self.filesize_max) = (min, max),
            _ => {}
        }
        self
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Structured text filters in a fixed order.
    pub fn text_filters(&self) -> [(FilterField, Option<&str>); 8] {
        [
            (FilterField::Id, self.id.as_deref()),
            (FilterField::Title, self.title.as_deref()),
            (FilterField::Author, self.author.as_deref()),
            (FilterField::Publisher, self.publisher.as_deref()),
            (FilterField::Extension, self.extension.as_deref()),
            (FilterField::Language, self.language.as_deref()),
            (FilterField::Isbn, self.isbn.as_deref()),
            (FilterField::Md5, self.md5.as_deref()),
        ]
    }

    /// Parse `key=value` pairs from a query string.
    ///
    /// `limit`/`offset` fall back to the given defaults when absent; unknown
    /// keys are rejected.
    pub fn from_pairs<I, K, V>(pairs: I, default_limit: i64) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut query = SearchQuery::new(default_limit, 0);
        for (key, value) in pairs {
            let key = key.as_ref();
            let value: String = value.into();
            match key {
                "query" | "q" => query.query = Some(value),
                "mode" => query.mode = value.parse()?,
                "limit" => query.limit = parse_signed("limit", &value)?,
                "offset" => query.offset = parse_signed("offset", &value)?,
                "year_min" => query.year_min = Some(parse_bound(FilterField::Year, &value)?),
                "year_max" => query.year_max = Some(parse_bound(FilterField::Year, &value)?),
                "pages_min" => query.pages_min = Some(parse_bound(FilterField::Pages, &value)?),
                "pages_max" => query.pages_max = Some(parse_bound(FilterField::Pages, &value)?),
                "filesize_min" => {
                    query.filesize_min = Some(parse_bound(FilterField::Filesize, &value)?)
                }
                "filesize_max" => {
                    query.filesize_max = Some(parse_bound(FilterField::Filesize, &value)?)
                }
                other => {
                    let field: FilterField = other.parse()?;
                    if matches!(
                        field,
                        FilterField::Year | FilterField::Pages | FilterField::Filesize
                    ) {
                        let bound = parse_bound(field, &value)?;
                        query = query.with_range(field, Some(bound), Some(bound));
                    } else {
                        query = query.with_filter(field, value);
                    }
                }
            }
        }
        Ok(query)
    }
}

fn parse_signed(name: &'static str, value: &str) -> Result<i64, QueryError> {
    value.trim().parse::<i64>().map_err(|_| QueryError::InvalidNumber {
        name,
        value: value.to_string(),
    })
}

fn parse_bound(field: FilterField, value: &str) -> Result<u64, QueryError> {
    value.trim().parse::<u64>().map_err(|_| QueryError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

/// Search result / 搜索结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Full candidate count before pagination
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub books: Vec<BookRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pairs() {
        let query = SearchQuery::from_pairs(
            vec![("query", "dune"), ("extension", "epub"), ("limit", "10"), ("offset", "20")],
            30,
        )
        .unwrap();
        assert_eq!(query.query.as_deref(), Some("dune"));
        assert_eq!(query.extension.as_deref(), Some("epub"));
        assert_eq!(query.limit, 10);
        assert_eq!(query.offset, 20);
    }

    #[test]
    fn test_from_pairs_defaults() {
        let query = SearchQuery::from_pairs(Vec::<(String, String)>::new(), 30).unwrap();
        assert_eq!(query.limit, 30);
        assert_eq!(query.offset, 0);
        assert_eq!(query.mode, SearchMode::Filter);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = SearchQuery::from_pairs(vec![("colour", "red")], 30).unwrap_err();
        assert_eq!(err, QueryError::UnknownField("colour".to_string()));
    }

    #[test]
    fn test_exact_year_becomes_range() {
        let query = SearchQuery::from_pairs(vec![("year", "1965")], 30).unwrap();
        assert_eq!(query.year_min, Some(1965));
        assert_eq!(query.year_max, Some(1965));
    }

    #[test]
    fn test_json_rejects_unknown_fields() {
        let err = serde_json::from_str::<SearchQuery>(r#"{"limit":1,"offset":0,"colour":"x"}"#);
        assert!(err.is_err());
        let ok: SearchQuery =
            serde_json::from_str(r#"{"limit":1,"offset":0,"mode":"explore"}"#).unwrap();
        assert_eq!(ok.mode, SearchMode::Explore);
    }

    #[test]
    fn test_field_names_round_trip() {
        for field in [FilterField::Id, FilterField::Md5, FilterField::Filesize] {
            assert_eq!(field.name().parse::<FilterField>().unwrap(), field);
        }
    }
}
