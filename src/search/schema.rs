//! Book record schema and normalization rules / 图书记录结构与规范化
//!
//! The same normalization is applied when indexing and when querying, so
//! exact-match filters and facets agree on case and Unicode form.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnError, DisplayFromStr, PickFirst};
use unicode_normalization::UnicodeNormalization;

/// Column order of headerless CSV dumps.
pub const CSV_COLUMNS: [&str; 13] = [
    "id",
    "title",
    "author",
    "publisher",
    "extension",
    "filesize",
    "language",
    "year",
    "pages",
    "isbn",
    "ipfs_cid",
    "cover_url",
    "md5",
];

/// Record quality flags / 记录标记
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordFlags(u8);

impl RecordFlags {
    /// Title was empty at ingestion time.
    pub const MISSING_TITLE: RecordFlags = RecordFlags(0b0000_0001);

    pub const fn empty() -> Self {
        RecordFlags(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        RecordFlags(bits)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: RecordFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: RecordFlags) {
        self.0 |= other.0;
    }
}

/// Book record - canonical form stored in the index / 图书记录
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: u64,
    pub title: String,
    pub author: String,
    pub publisher: Option<String>,
    /// Lower-cased
    pub extension: String,
    pub filesize: u64,
    /// Lower-cased
    pub language: String,
    pub year: Option<u32>,
    pub pages: Option<u32>,
    pub isbn: Option<String>,
    pub ipfs_cid: Option<String>,
    pub cover_url: Option<String>,
    pub md5: Option<String>,
    #[serde(default)]
    pub flags: RecordFlags,
}

impl BookRecord {
    /// Whether the record was indexed with a quality flag.
    pub fn is_flagged(&self) -> bool {
        !self.flags.is_empty()
    }

    /// Exact-match keys for the isbn field.
    pub fn isbn_keys(&self) -> Vec<String> {
        self.isbn.as_deref().map(isbn_keys).unwrap_or_default()
    }

    /// Metadata completeness boost / 元数据完整度加分
    ///
    /// Stored per record and multiplied into the relevance score, so a
    /// well described edition ranks above a bare duplicate. Stays below 90.
    pub fn quality_boost(&self) -> u8 {
        let mut boost = 0u8;
        if !self.author.is_empty() {
            boost += 10;
        }
        if self.publisher.is_some() {
            boost += 5;
        }
        if !self.language.is_empty() && self.language != "other" {
            boost += 10;
        }
        if self.year.is_some() {
            boost += 5;
        }
        if self.pages.is_some() {
            boost += 15;
        }
        if self.cover_url.is_some() {
            boost += 30;
        }
        boost
    }
}

/// Tokenized text fields, searched by free text / 全文索引字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextField {
    Title,
    Author,
    Publisher,
    Isbn,
}

impl TextField {
    pub const ALL: [TextField; 4] = [
        TextField::Title,
        TextField::Author,
        TextField::Publisher,
        TextField::Isbn,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            TextField::Title => "title",
            TextField::Author => "author",
            TextField::Publisher => "publisher",
            TextField::Isbn => "isbn",
        }
    }

    pub fn value(self, book: &BookRecord) -> &str {
        match self {
            TextField::Title => &book.title,
            TextField::Author => &book.author,
            TextField::Publisher => book.publisher.as_deref().unwrap_or_default(),
            TextField::Isbn => book.isbn.as_deref().unwrap_or_default(),
        }
    }
}

/// Exact-match fields / 精确匹配字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeywordField {
    Extension,
    Language,
    Isbn,
    Md5,
}

impl KeywordField {
    pub const ALL: [KeywordField; 4] = [
        KeywordField::Extension,
        KeywordField::Language,
        KeywordField::Isbn,
        KeywordField::Md5,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            KeywordField::Extension => "extension",
            KeywordField::Language => "language",
            KeywordField::Isbn => "isbn",
            KeywordField::Md5 => "md5",
        }
    }

    /// Normalized keys a record contributes to this field.
    pub fn keys(self, book: &BookRecord) -> Vec<String> {
        match self {
            KeywordField::Extension => vec![book.extension.clone()],
            KeywordField::Language => vec![book.language.clone()],
            KeywordField::Isbn => return book.isbn_keys(),
            KeywordField::Md5 => book.md5.iter().cloned().collect(),
        }
        .into_iter()
        .filter(|key| !key.is_empty())
        .collect()
    }

    /// Normalize a query value the same way keys were normalized.
    pub fn normalize_value(self, value: &str) -> Vec<String> {
        match self {
            KeywordField::Isbn => isbn_keys(value),
            _ => {
                let key = normalize_keyword(value);
                if key.is_empty() {
                    Vec::new()
                } else {
                    vec![key]
                }
            }
        }
    }
}

/// Fixed-width numeric columns / 数值列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NumericField {
    Filesize,
    Year,
    Pages,
}

impl NumericField {
    /// Column value; absent optional values read as 0.
    pub fn value(self, book: &BookRecord) -> u64 {
        match self {
            NumericField::Filesize => book.filesize,
            NumericField::Year => book.year.map(u64::from).unwrap_or(0),
            NumericField::Pages => book.pages.map(u64::from).unwrap_or(0),
        }
    }
}

/// Loosely typed record as read from a dump / 原始记录
///
/// Every field is optional. Numbers may arrive as numbers or strings, and
/// a value of the wrong shape reads as absent instead of rejecting the
/// whole record.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBook {
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub id: Option<u64>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub title: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub author: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub extension: Option<String>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub language: Option<String>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub year: Option<u64>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub pages: Option<u64>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub ipfs_cid: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub md5: Option<String>,
}

impl RawBook {
    /// Build from a headerless CSV row. Missing trailing columns are absent.
    pub fn from_csv_fields<'a, I>(fields: I) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut raw = RawBook::default();
        for (idx, bytes) in fields.into_iter().enumerate() {
            let value = String::from_utf8_lossy(bytes);
            match idx {
                0 => raw.id = parse_u64(&value),
                1 => raw.title = Some(value.into_owned()),
                2 => raw.author = Some(value.into_owned()),
                3 => raw.publisher = Some(value.into_owned()),
                4 => raw.extension = Some(value.into_owned()),
                5 => raw.filesize = parse_u64(&value),
                6 => raw.language = Some(value.into_owned()),
                7 => raw.year = parse_u64(&value),
                8 => raw.pages = parse_u64(&value),
                9 => raw.isbn = Some(value.into_owned()),
                10 => raw.ipfs_cid = Some(value.into_owned()),
                11 => raw.cover_url = Some(value.into_owned()),
                12 => raw.md5 = Some(value.into_owned()),
                _ => break,
            }
        }
        raw
    }

    /// Normalize into a record. Returns the source id separately, since
    /// records without one get an id assigned later by the builder.
    pub fn normalize(self) -> (Option<u64>, BookRecord) {
        let source_id = self.id;

        let title = clean_text(self.title.as_deref());
        let mut flags = RecordFlags::empty();
        if title.is_empty() {
            flags.insert(RecordFlags::MISSING_TITLE);
        }

        let book = BookRecord {
            id: source_id.unwrap_or(0),
            title,
            author: clean_text(self.author.as_deref()),
            publisher: non_empty(clean_text(self.publisher.as_deref())),
            extension: normalize_keyword(self.extension.as_deref().unwrap_or_default()),
            filesize: self.filesize.unwrap_or(0),
            language: normalize_keyword(self.language.as_deref().unwrap_or_default()),
            year: self.year.and_then(positive_u32),
            pages: self.pages.and_then(positive_u32),
            isbn: non_empty(clean_text(self.isbn.as_deref())),
            ipfs_cid: non_empty(clean_text(self.ipfs_cid.as_deref())),
            cover_url: non_empty(clean_text(self.cover_url.as_deref())),
            md5: non_empty(normalize_keyword(self.md5.as_deref().unwrap_or_default())),
            flags,
        };
        (source_id, book)
    }
}

/// Trim and collapse whitespace, keep case for display.
fn clean_text(value: Option<&str>) -> String {
    value
        .unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Normalize a keyword value (extension, language, md5) / 关键字规范化
pub fn normalize_keyword(value: &str) -> String {
    value.nfkc().collect::<String>().trim().to_lowercase()
}

/// Split an isbn field into its exact-match keys.
///
/// `"978-7-5442-1129-0, 7544211290"` -> `["9787544211290", "7544211290"]`
pub fn isbn_keys(value: &str) -> Vec<String> {
    let mut keys: Vec<String> = value
        .nfkc()
        .collect::<String>()
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(|part| {
            part.chars()
                .filter(|c| *c != '-')
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|part| !part.is_empty())
        .collect();
    keys.dedup();
    keys
}

/// Lenient unsigned parse: accepts `"123"`, `"123.0"`, `" 123 "`.
pub fn parse_u64(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(n) = value.parse::<u64>() {
        return Some(n);
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
            Some(f as u64)
        }
        _ => None,
    }
}

/// Year and page counts are positive; zero means absent.
fn positive_u32(value: u64) -> Option<u32> {
    u32::try_from(value).ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_json_record() {
        let raw: RawBook = serde_json::from_str(
            r#"{"id": 7, "title": "  Dune  ", "author": "Frank Herbert", "extension": "EPUB",
                "filesize": "1024", "language": "English", "year": 0, "pages": "412",
                "isbn": null, "md5": "ABCDEF"}"#,
        )
        .unwrap();
        let (id, book) = raw.normalize();
        assert_eq!(id, Some(7));
        assert_eq!(book.title, "Dune");
        assert_eq!(book.extension, "epub");
        assert_eq!(book.language, "english");
        assert_eq!(book.filesize, 1024);
        assert_eq!(book.year, None);
        assert_eq!(book.pages, Some(412));
        assert_eq!(book.isbn, None);
        assert_eq!(book.md5.as_deref(), Some("abcdef"));
        assert!(!book.is_flagged());
    }

    #[test]
    fn test_invalid_numbers_are_absent() {
        let raw: RawBook =
            serde_json::from_str(r#"{"id": "x12", "title": "T", "filesize": -5, "year": "abc"}"#)
                .unwrap();
        let (id, book) = raw.normalize();
        assert_eq!(id, None);
        assert_eq!(book.filesize, 0);
        assert_eq!(book.year, None);
    }

    #[test]
    fn test_wrong_shapes_read_as_absent() {
        let raw: RawBook = serde_json::from_str(
            r#"{"id": "12", "title": ["Dune"], "isbn": 9780441013593, "year": {"y": 1965},
                "pages": "412", "language": null}"#,
        )
        .unwrap();
        assert_eq!(raw.id, Some(12));
        assert_eq!(raw.title, None);
        assert_eq!(raw.isbn, None);
        assert_eq!(raw.year, None);
        assert_eq!(raw.pages, Some(412));
        let (_, book) = raw.normalize();
        assert!(book.flags.contains(RecordFlags::MISSING_TITLE));
        assert_eq!(book.language, "");
    }

    #[test]
    fn test_missing_title_is_flagged() {
        let raw = RawBook::from_csv_fields(vec![&b"3"[..], &b""[..], &b"Anon"[..]]);
        let (id, book) = raw.normalize();
        assert_eq!(id, Some(3));
        assert!(book.flags.contains(RecordFlags::MISSING_TITLE));
        assert_eq!(book.author, "Anon");
        assert_eq!(book.extension, "");
    }

    #[test]
    fn test_csv_column_order() {
        let row = [
            "1", "Title", "Author", "Pub", "pdf", "99", "en", "2001", "10", "978-0", "cid",
            "http://c", "MD5",
        ];
        let (_, book) = RawBook::from_csv_fields(row.iter().map(|s| s.as_bytes())).normalize();
        assert_eq!(book.publisher.as_deref(), Some("Pub"));
        assert_eq!(book.extension, "pdf");
        assert_eq!(book.year, Some(2001));
        assert_eq!(book.ipfs_cid.as_deref(), Some("cid"));
        assert_eq!(book.cover_url.as_deref(), Some("http://c"));
        assert_eq!(book.md5.as_deref(), Some("md5"));
        assert_eq!(CSV_COLUMNS.len(), 13);
    }

    #[test]
    fn test_quality_boost() {
        let row = [
            "1", "Title", "Author", "Pub", "pdf", "99", "en", "2001", "10", "", "", "http://c", "",
        ];
        let (_, full) = RawBook::from_csv_fields(row.iter().map(|s| s.as_bytes())).normalize();
        assert_eq!(full.quality_boost(), 75);

        let (_, bare) = RawBook::from_csv_fields(vec![&b"2"[..], &b"Title"[..]]).normalize();
        assert_eq!(bare.quality_boost(), 0);

        let other = BookRecord {
            language: "other".to_string(),
            ..bare
        };
        assert_eq!(other.quality_boost(), 0);
    }

    #[test]
    fn test_isbn_keys() {
        assert_eq!(
            isbn_keys("978-7-5442-1129-0, 7544211290;X-1"),
            vec!["9787544211290", "7544211290", "x1"]
        );
        assert!(isbn_keys(" , ").is_empty());
    }

    #[test]
    fn test_keyword_fullwidth_folds() {
        assert_eq!(normalize_keyword(" ＥＰＵＢ "), "epub");
    }
}
