//! Record sources - raw catalog dumps the builder ingests / 数据源
//!
//! A source is restartable: every `open()` returns a fresh iterator from
//! the start. Each item is either a raw record or an error; a record-local
//! error (`IngestError::Malformed`) skips one record, any other error ends
//! the source.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::compression::Compression;
use super::error::IngestError;
use super::schema::RawBook;

pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<RawBook, IngestError>> + 'a>;

/// A restartable producer of raw records.
pub trait RecordSource: Send + Sync {
    /// Name used in logs and build reports.
    fn name(&self) -> String;

    /// Start reading from the beginning.
    fn open(&self) -> Result<RecordIter<'_>, IngestError>;
}

/// Record encoding inside a (decompressed) source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Headerless CSV in the fixed column order
    Csv,
    /// One JSON object per line
    JsonLines,
}

impl SourceFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(SourceFormat::Csv),
            "jsonl" | "ndjson" | "json" => Some(SourceFormat::JsonLines),
            _ => None,
        }
    }
}

/// A dump file on disk / 文件数据源
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    format: SourceFormat,
    compression: Compression,
}

impl FileSource {
    /// Detect format and compression from the file name,
    /// e.g. `books.csv`, `books.jsonl.zst`, `dump.csv.lz4`.
    pub fn detect(path: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut parts: Vec<&str> = file_name.rsplitn(3, '.').collect();
        let mut compression = Compression::None;
        if let Some(c) = parts.first().and_then(|ext| Compression::from_extension(ext)) {
            compression = c;
            parts.remove(0);
        }
        let format = parts
            .first()
            .filter(|_| parts.len() > 1)
            .and_then(|ext| SourceFormat::from_extension(ext))
            .ok_or_else(|| IngestError::UnsupportedFormat(file_name.clone()))?;

        Ok(Self {
            path,
            format,
            compression,
        })
    }

    pub fn new(path: impl Into<PathBuf>, format: SourceFormat, compression: Compression) -> Self {
        Self {
            path: path.into(),
            format,
            compression,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }
}

impl RecordSource for FileSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> Result<RecordIter<'_>, IngestError> {
        let open_err = |source| IngestError::Open {
            path: self.path.clone(),
            source,
        };
        let file = File::open(&self.path).map_err(open_err)?;
        let reader = self
            .compression
            .stream_decoder(BufReader::new(file))
            .map_err(open_err)?;
        Ok(read_records(self.name(), self.format, reader))
    }
}

/// In-memory dump, for tools and tests.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    format: SourceFormat,
    compression: Compression,
    data: Bytes,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, format: SourceFormat, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            format,
            compression: Compression::None,
            data: data.into(),
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

impl RecordSource for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> Result<RecordIter<'_>, IngestError> {
        let reader = self
            .compression
            .stream_decoder(&self.data[..])
            .map_err(|source| IngestError::Open {
                path: PathBuf::from(&self.name),
                source,
            })?;
        Ok(read_records(self.name.clone(), self.format, reader))
    }
}

fn read_records<'a>(name: String, format: SourceFormat, reader: Box<dyn Read + 'a>) -> RecordIter<'a> {
    match format {
        SourceFormat::Csv => Box::new(csv_records(name, reader)),
        SourceFormat::JsonLines => Box::new(json_lines(name, reader)),
    }
}

fn csv_records<'a>(
    name: String,
    reader: Box<dyn Read + 'a>,
) -> impl Iterator<Item = Result<RawBook, IngestError>> + 'a {
    let reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    reader
        .into_byte_records()
        .enumerate()
        .map(move |(idx, record)| match record {
            Ok(record) => Ok(RawBook::from_csv_fields(record.iter())),
            Err(e) if e.is_io_error() => match e.into_kind() {
                csv::ErrorKind::Io(io) => Err(IngestError::Read(io)),
                other => Err(IngestError::Malformed {
                    location: format!("{}:{}", name, idx + 1),
                    message: format!("{:?}", other),
                }),
            },
            Err(e) => Err(IngestError::Malformed {
                location: format!("{}:{}", name, idx + 1),
                message: e.to_string(),
            }),
        })
}

fn json_lines<'a>(
    name: String,
    reader: Box<dyn Read + 'a>,
) -> impl Iterator<Item = Result<RawBook, IngestError>> + 'a {
    BufReader::new(reader)
        .split(b'\n')
        .enumerate()
        .filter_map(move |(idx, line)| {
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(IngestError::Read(e))),
            };
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                return None;
            }
            Some(
                serde_json::from_slice::<RawBook>(trimmed).map_err(|e| IngestError::Malformed {
                    location: format!("{}:{}", name, idx + 1),
                    message: e.to_string(),
                }),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::compression::test_util::{lz4_frame, zstd_stream};

    const CSV: &str = "1,Dune,Frank Herbert,Chilton,epub,1024,english,1965,412,,,,\n\
                       2,Emma,Jane Austen,,pdf,2048,english,1815,,,,,\n";

    fn collect(source: &dyn RecordSource) -> Vec<Result<RawBook, IngestError>> {
        source.open().unwrap().collect()
    }

    #[test]
    fn test_detect() {
        let s = FileSource::detect("/data/books.jsonl.zst").unwrap();
        assert_eq!((s.format(), s.compression()), (SourceFormat::JsonLines, Compression::Zstd));
        let s = FileSource::detect("dump.csv").unwrap();
        assert_eq!((s.format(), s.compression()), (SourceFormat::Csv, Compression::None));
        let s = FileSource::detect("dump.CSV.lz4").unwrap();
        assert_eq!((s.format(), s.compression()), (SourceFormat::Csv, Compression::Lz4));
        assert!(matches!(
            FileSource::detect("dump.parquet"),
            Err(IngestError::UnsupportedFormat(_))
        ));
        assert!(FileSource::detect("csv").is_err());
    }

    #[test]
    fn test_csv_source_is_restartable() {
        let source = MemorySource::new("mem", SourceFormat::Csv, CSV);
        for _ in 0..2 {
            let rows = collect(&source);
            assert_eq!(rows.len(), 2);
            let (_, book) = rows[0].as_ref().unwrap().clone().normalize();
            assert_eq!(book.title, "Dune");
        }
    }

    #[test]
    fn test_jsonl_malformed_line_is_local() {
        let data = "{\"id\":1,\"title\":\"A\"}\n{not json}\n\n{\"id\":2,\"title\":\"B\"}\n";
        let rows = collect(&MemorySource::new("mem", SourceFormat::JsonLines, data));
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ok());
        assert!(matches!(&rows[1], Err(e) if e.is_record_local()));
        assert!(rows[2].is_ok());
    }

    #[test]
    fn test_compressed_sources_match_plain() {
        let plain: Vec<_> = collect(&MemorySource::new("p", SourceFormat::Csv, CSV))
            .into_iter()
            .map(|r| r.unwrap().normalize())
            .collect();
        for (codec, data) in [
            (Compression::Lz4, lz4_frame(CSV.as_bytes())),
            (Compression::Zstd, zstd_stream(CSV.as_bytes())),
        ] {
            let source = MemorySource::new("c", SourceFormat::Csv, data).with_compression(codec);
            let rows: Vec<_> = collect(&source)
                .into_iter()
                .map(|r| r.unwrap().normalize())
                .collect();
            assert_eq!(rows, plain);
        }
    }

    #[test]
    fn test_corrupt_stream_fails_source() {
        let mut data = zstd_stream(CSV.as_bytes());
        let mid = data.len() / 2;
        data.truncate(mid);
        let source = MemorySource::new("bad", SourceFormat::Csv, data).with_compression(Compression::Zstd);
        let failed = match source.open() {
            Err(_) => true,
            Ok(iter) => iter.into_iter().any(|r| matches!(r, Err(e) if !e.is_record_local())),
        };
        assert!(failed);
    }

    #[test]
    fn test_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("books.csv.zst");
        std::fs::write(&path, zstd_stream(CSV.as_bytes())).unwrap();
        let source = FileSource::detect(&path).unwrap();
        assert_eq!(collect(&source).len(), 2);

        let missing = FileSource::detect(dir.path().join("nope.csv")).unwrap();
        assert!(matches!(missing.open(), Err(IngestError::Open { .. })));
    }
}
