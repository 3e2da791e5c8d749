//! Index generations - loading and persisting / 索引代
//!
//! On disk:
//!
//! ```text
//! <dir>/CURRENT                 name of the serving generation
//! <dir>/generations/<name>      generation files
//! ```
//!
//! A generation file is written under a temporary name, synced and renamed;
//! only then is `CURRENT` replaced the same way. A crash at any point leaves
//! `CURRENT` naming a complete file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::Serialize;

use super::compression::Compression;
use super::error::IndexError;
use super::format::{self, Dictionary, Header, SectionKind};
use super::schema::{KeywordField, TextField};
use super::store::RecordStore;

const CURRENT_FILE: &str = "CURRENT";
const GENERATIONS_DIR: &str = "generations";
const TMP_SUFFIX: &str = ".tmp";

/// One immutable, fully loaded index generation / 索引代
#[derive(Debug)]
pub struct IndexGeneration {
    name: String,
    header: Header,
    size_bytes: usize,
    text: Vec<Dictionary>,
    keywords: Vec<Dictionary>,
    store: RecordStore,
}

/// Summary of a generation for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationInfo {
    pub name: String,
    pub record_count: u64,
    pub built_at_ms: i64,
    pub format_version: u32,
    pub scoring_version: u32,
    pub compressor: Compression,
    pub size_bytes: usize,
}

impl IndexGeneration {
    /// Validate and open a generation held in memory.
    pub fn from_bytes(name: impl Into<String>, bytes: Bytes) -> Result<Self, IndexError> {
        let header = Header::parse(&bytes)?;
        let universe = u32::try_from(header.record_count)
            .map_err(|_| IndexError::corrupt("record count exceeds ordinal range"))?;

        let text = format::read_group(
            &format::section_bytes(&bytes, header.section(SectionKind::TextPostings)?)?,
            TextField::ALL.len(),
            universe,
        )?;
        let keywords = format::read_group(
            &format::section_bytes(&bytes, header.section(SectionKind::KeywordPostings)?)?,
            KeywordField::ALL.len(),
            universe,
        )?;
        let store = RecordStore::parse(
            format::section_bytes(&bytes, header.section(SectionKind::RecordStore)?)?,
            header.compressor,
        )?;
        if store.len() as u64 != header.record_count {
            return Err(IndexError::corrupt(format!(
                "header declares {} records, store holds {}",
                header.record_count,
                store.len()
            )));
        }

        Ok(Self {
            name: name.into(),
            size_bytes: bytes.len(),
            header,
            text,
            keywords,
            store,
        })
    }

    /// Read a generation file fully into memory.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let generation = Self::from_bytes(name, Bytes::from(bytes))?;
        tracing::info!(
            "Loaded index generation {} ({} records, {} bytes)",
            generation.name,
            generation.record_count(),
            generation.size_bytes
        );
        Ok(generation)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn record_count(&self) -> usize {
        self.store.len()
    }

    pub fn text(&self, field: TextField) -> &Dictionary {
        &self.text[field.index()]
    }

    pub fn keyword(&self, field: KeywordField) -> &Dictionary {
        &self.keywords[field.index()]
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn info(&self) -> GenerationInfo {
        GenerationInfo {
            name: self.name.clone(),
            record_count: self.header.record_count,
            built_at_ms: self.header.built_at_ms,
            format_version: self.header.format_version,
            scoring_version: self.header.scoring_version,
            compressor: self.header.compressor,
            size_bytes: self.size_bytes,
        }
    }
}

/// Generation directory manager / 索引目录管理
#[derive(Debug, Clone)]
pub struct GenerationStore {
    dir: PathBuf,
    keep_generations: usize,
}

impl GenerationStore {
    pub fn new(dir: impl Into<PathBuf>, keep_generations: usize) -> Self {
        Self {
            dir: dir.into(),
            keep_generations: keep_generations.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn generations_dir(&self) -> PathBuf {
        self.dir.join(GENERATIONS_DIR)
    }

    /// Name for a new generation; sorts in creation order.
    pub fn next_name(&self, built_at_ms: i64) -> Result<String, IndexError> {
        let base = format!("gen-{:013}", built_at_ms.max(0));
        let existing = self.list()?;
        let mut name = base.clone();
        let mut n = 1;
        while existing.contains(&name) {
            name = format!("{}-{}", base, n);
            n += 1;
        }
        Ok(name)
    }

    /// Durably write a generation file. `CURRENT` is not touched.
    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, IndexError> {
        let dir = self.generations_dir();
        fs::create_dir_all(&dir)?;
        let final_path = dir.join(name);
        let tmp_path = dir.join(format!("{}{}", name, TMP_SUFFIX));
        write_synced(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &final_path)?;
        tracing::debug!("Wrote generation file {:?}", final_path);
        Ok(final_path)
    }

    /// Point `CURRENT` at `name`, atomically.
    pub fn set_current(&self, name: &str) -> Result<(), IndexError> {
        let tmp_path = self.dir.join(format!("{}{}", CURRENT_FILE, TMP_SUFFIX));
        write_synced(&tmp_path, format!("{}\n", name).as_bytes())?;
        fs::rename(&tmp_path, self.dir.join(CURRENT_FILE))?;
        Ok(())
    }

    /// Name of the serving generation, if any.
    pub fn current(&self) -> Result<Option<String>, IndexError> {
        match fs::read_to_string(self.dir.join(CURRENT_FILE)) {
            Ok(content) => {
                let name = content.trim();
                if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
                    return Err(IndexError::corrupt("CURRENT does not name a generation"));
                }
                Ok(Some(name.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.generations_dir().join(name)
    }

    /// Load whatever `CURRENT` names.
    pub fn load_current(&self) -> Result<Option<IndexGeneration>, IndexError> {
        match self.current()? {
            Some(name) => IndexGeneration::load(&self.path_of(&name)).map(Some),
            None => Ok(None),
        }
    }

    /// Completed generation names, oldest first.
    pub fn list(&self) -> Result<Vec<String>, IndexError> {
        let dir = self.generations_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(TMP_SUFFIX) && entry.file_type()?.is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove old generations and leftover temp files, never the current one.
    pub fn prune(&self) -> Result<Vec<String>, IndexError> {
        let current = self.current()?;
        let names = self.list()?;
        let mut removed = Vec::new();
        let excess = names.len().saturating_sub(self.keep_generations);
        for name in names.into_iter().take(excess) {
            if current.as_deref() == Some(name.as_str()) {
                continue;
            }
            fs::remove_file(self.path_of(&name))?;
            tracing::info!("Pruned index generation {}", name);
            removed.push(name);
        }

        let dir = self.generations_dir();
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.file_name().to_string_lossy().ends_with(TMP_SUFFIX) {
                    fs::remove_file(entry.path())?;
                }
            }
        }
        Ok(removed)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::builder::{BuildOptions, IndexBuilder};
    use crate::search::source::{MemorySource, RecordSource, SourceFormat};

    fn sample_bytes() -> Vec<u8> {
        let sources: Vec<Box<dyn RecordSource>> = vec![Box::new(MemorySource::new(
            "s",
            SourceFormat::JsonLines,
            "{\"id\":1,\"title\":\"Dune\",\"author\":\"Frank Herbert\"}\n{\"id\":2,\"title\":\"Emma\"}\n",
        ))];
        let options = BuildOptions::default();
        IndexBuilder::new(options)
            .build(&sources)
            .unwrap()
            .to_bytes(&options, 1_700_000_000_000)
            .unwrap()
    }

    #[test]
    fn test_write_and_load_current() {
        let dir = tempfile::tempdir().unwrap();
        let store = GenerationStore::new(dir.path(), 2);
        assert!(store.load_current().unwrap().is_none());

        let name = store.next_name(1_700_000_000_000).unwrap();
        store.write(&name, &sample_bytes()).unwrap();
        store.set_current(&name).unwrap();

        let generation = store.load_current().unwrap().unwrap();
        assert_eq!(generation.name(), name);
        assert_eq!(generation.record_count(), 2);
        assert_eq!(generation.info().built_at_ms, 1_700_000_000_000);
        assert_eq!(generation.text(TextField::Title).get("emma").unwrap(), vec![1]);
    }

    #[test]
    fn test_corrupt_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = GenerationStore::new(dir.path(), 2);
        let mut bytes = sample_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x5a;
        store.write("gen-bad", &bytes).unwrap();
        store.set_current("gen-bad").unwrap();
        assert!(matches!(store.load_current(), Err(IndexError::Corrupt(_))));

        let truncated = &sample_bytes()[..40];
        assert!(matches!(
            IndexGeneration::from_bytes("t", Bytes::copy_from_slice(truncated)),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn test_prune_keeps_current() {
        let dir = tempfile::tempdir().unwrap();
        let store = GenerationStore::new(dir.path(), 1);
        let bytes = sample_bytes();
        for name in ["gen-1", "gen-2", "gen-3"] {
            store.write(name, &bytes).unwrap();
        }
        store.set_current("gen-2").unwrap();
        fs::write(store.generations_dir().join("gen-4.tmp"), b"partial").unwrap();

        let removed = store.prune().unwrap();
        assert_eq!(removed, vec!["gen-1".to_string()]);
        assert_eq!(store.list().unwrap(), vec!["gen-2".to_string(), "gen-3".to_string()]);
    }

    #[test]
    fn test_next_name_is_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = GenerationStore::new(dir.path(), 3);
        let first = store.next_name(5).unwrap();
        store.write(&first, b"x").unwrap();
        let second = store.next_name(5).unwrap();
        assert_ne!(first, second);
        assert!(second > first);
    }
}
