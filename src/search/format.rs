//! Generation file layout / 索引文件格式
//!
//! ```text
//! header   magic "BKSX" | format_version u32 | scoring_version u32
//!          | compressor u8 | pad [u8; 3] | record_count u64
//!          | built_at_ms i64 | section_count u32
//! sections section_count x (kind u32 | offset u64 | length u64 | xxh3 u64)
//! payload  text postings | keyword postings | record store
//! ```
//!
//! All integers are little-endian. Offsets are absolute file offsets.

use bytes::Bytes;
use xxhash_rust::xxh3::xxh3_64;

use super::compression::Compression;
use super::error::IndexError;
use super::postings::{self, Ordinal};

pub const MAGIC: &[u8; 4] = b"BKSX";
pub const FORMAT_VERSION: u32 = 2;

const FIXED_HEADER_LEN: usize = 4 + 4 + 4 + 4 + 8 + 8 + 4;
const SECTION_ENTRY_LEN: usize = 4 + 8 + 8 + 8;
const DICT_ENTRY_LEN: usize = 4 + 4 + 8 + 4;

/// Section kinds / 数据段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SectionKind {
    TextPostings = 1,
    KeywordPostings = 2,
    RecordStore = 3,
}

impl SectionKind {
    pub const ALL: [SectionKind; 3] = [
        SectionKind::TextPostings,
        SectionKind::KeywordPostings,
        SectionKind::RecordStore,
    ];

    fn from_u32(value: u32) -> Result<Self, IndexError> {
        match value {
            1 => Ok(SectionKind::TextPostings),
            2 => Ok(SectionKind::KeywordPostings),
            3 => Ok(SectionKind::RecordStore),
            other => Err(IndexError::corrupt(format!("unknown section kind {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionEntry {
    pub kind: SectionKind,
    pub offset: u64,
    pub length: u64,
    pub checksum: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub format_version: u32,
    pub scoring_version: u32,
    pub compressor: Compression,
    pub record_count: u64,
    pub built_at_ms: i64,
    pub sections: Vec<SectionEntry>,
}

impl Header {
    /// Assemble a complete file from section payloads, in `SectionKind::ALL` order.
    pub fn write_file(
        scoring_version: u32,
        compressor: Compression,
        record_count: u64,
        built_at_ms: i64,
        payloads: [Vec<u8>; 3],
    ) -> Vec<u8> {
        let header_len = FIXED_HEADER_LEN + SECTION_ENTRY_LEN * payloads.len();
        let total: usize = header_len + payloads.iter().map(Vec::len).sum::<usize>();
        let mut out = Vec::with_capacity(total);

        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&scoring_version.to_le_bytes());
        out.push(compressor.tag());
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&record_count.to_le_bytes());
        out.extend_from_slice(&built_at_ms.to_le_bytes());
        out.extend_from_slice(&(payloads.len() as u32).to_le_bytes());

        let mut offset = header_len as u64;
        for (kind, payload) in SectionKind::ALL.iter().zip(payloads.iter()) {
            out.extend_from_slice(&(*kind as u32).to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            out.extend_from_slice(&xxh3_64(payload).to_le_bytes());
            offset += payload.len() as u64;
        }
        for payload in &payloads {
            out.extend_from_slice(payload);
        }
        out
    }

    /// Parse and validate the header. Checksums of every section are verified.
    pub fn parse(file: &[u8]) -> Result<Self, IndexError> {
        let mut r = ByteReader::new(file);
        if r.take(4)? != MAGIC {
            return Err(IndexError::corrupt("bad magic"));
        }
        let format_version = r.u32()?;
        if format_version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion {
                found: format_version,
                expected: FORMAT_VERSION,
            });
        }
        let scoring_version = r.u32()?;
        let compressor = Compression::from_tag(r.u8()?)?;
        r.take(3)?;
        let record_count = r.u64()?;
        let built_at_ms = r.i64()?;
        let section_count = r.u32()? as usize;
        if section_count != SectionKind::ALL.len() {
            return Err(IndexError::corrupt(format!("expected 3 sections, found {}", section_count)));
        }

        let mut sections = Vec::with_capacity(section_count);
        for expected in SectionKind::ALL {
            let kind = SectionKind::from_u32(r.u32()?)?;
            if kind != expected {
                return Err(IndexError::corrupt("sections out of order"));
            }
            let entry = SectionEntry {
                kind,
                offset: r.u64()?,
                length: r.u64()?,
                checksum: r.u64()?,
            };
            let payload = section_slice(file, &entry)?;
            if xxh3_64(payload) != entry.checksum {
                return Err(IndexError::corrupt(format!("checksum mismatch in {:?} section", kind)));
            }
            sections.push(entry);
        }

        Ok(Header {
            format_version,
            scoring_version,
            compressor,
            record_count,
            built_at_ms,
            sections,
        })
    }

    pub fn section(&self, kind: SectionKind) -> Result<&SectionEntry, IndexError> {
        self.sections
            .iter()
            .find(|s| s.kind == kind)
            .ok_or_else(|| IndexError::corrupt(format!("missing {:?} section", kind)))
    }
}

fn section_slice<'a>(file: &'a [u8], entry: &SectionEntry) -> Result<&'a [u8], IndexError> {
    let start = usize::try_from(entry.offset).map_err(|_| IndexError::corrupt("section offset"))?;
    let len = usize::try_from(entry.length).map_err(|_| IndexError::corrupt("section length"))?;
    start
        .checked_add(len)
        .and_then(|end| file.get(start..end))
        .ok_or_else(|| IndexError::corrupt(format!("{:?} section out of bounds", entry.kind)))
}

/// Zero-copy view of one section.
pub fn section_bytes(file: &Bytes, entry: &SectionEntry) -> Result<Bytes, IndexError> {
    let slice = section_slice(file, entry)?;
    Ok(file.slice_ref(slice))
}

/// Serialize a group of dictionaries: `count u32 | count x len u64 | dicts`.
pub fn write_group(dicts: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(dicts.len() as u32).to_le_bytes());
    for dict in dicts {
        out.extend_from_slice(&(dict.len() as u64).to_le_bytes());
    }
    for dict in dicts {
        out.extend_from_slice(dict);
    }
    out
}

pub fn read_group(section: &Bytes, expected: usize, universe: u32) -> Result<Vec<Dictionary>, IndexError> {
    let mut r = ByteReader::new(section);
    let count = r.u32()? as usize;
    if count != expected {
        return Err(IndexError::corrupt(format!("expected {} dictionaries, found {}", expected, count)));
    }
    let mut lens = Vec::with_capacity(count);
    for _ in 0..count {
        lens.push(r.usize64()?);
    }
    let mut dicts = Vec::with_capacity(count);
    for len in lens {
        let slice = r.take(len)?;
        dicts.push(Dictionary::parse(section.slice_ref(slice), universe)?);
    }
    Ok(dicts)
}

/// Sorted key -> postings dictionary / 词典
///
/// ```text
/// entry_count u32 | keys_len u64 | postings_len u64
/// entries  entry_count x (key_off u32 | key_len u32 | postings_off u64 | count u32)
/// keys     concatenated key bytes, sorted
/// postings delta-varint posting lists
/// ```
#[derive(Debug, Clone)]
pub struct Dictionary {
    entries: Bytes,
    keys: Bytes,
    postings: Bytes,
    len: usize,
    universe: u32,
}

impl Dictionary {
    /// Encode from `(key, postings)` pairs already sorted by key.
    pub fn write<'a, I>(pairs: I) -> Vec<u8>
    where
        I: IntoIterator<Item = (&'a str, &'a [Ordinal])>,
    {
        let mut entries = Vec::new();
        let mut keys = Vec::new();
        let mut blob = Vec::new();
        let mut count = 0u32;
        for (key, list) in pairs {
            entries.extend_from_slice(&(keys.len() as u32).to_le_bytes());
            entries.extend_from_slice(&(key.len() as u32).to_le_bytes());
            entries.extend_from_slice(&(blob.len() as u64).to_le_bytes());
            entries.extend_from_slice(&(list.len() as u32).to_le_bytes());
            keys.extend_from_slice(key.as_bytes());
            postings::encode(list, &mut blob);
            count += 1;
        }
        let mut out = Vec::with_capacity(20 + entries.len() + keys.len() + blob.len());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&(keys.len() as u64).to_le_bytes());
        out.extend_from_slice(&(blob.len() as u64).to_le_bytes());
        out.extend_from_slice(&entries);
        out.extend_from_slice(&keys);
        out.extend_from_slice(&blob);
        out
    }

    /// Validate the entry table against its blobs.
    pub fn parse(bytes: Bytes, universe: u32) -> Result<Self, IndexError> {
        let mut r = ByteReader::new(&bytes);
        let len = r.u32()? as usize;
        let keys_len = r.usize64()?;
        let postings_len = r.usize64()?;
        let entries_len = len
            .checked_mul(DICT_ENTRY_LEN)
            .ok_or_else(|| IndexError::corrupt("dictionary size"))?;
        let entries = r.take(entries_len)?;
        let keys = r.take(keys_len)?;
        let postings = r.take(postings_len)?;
        if !r.is_empty() {
            return Err(IndexError::corrupt("trailing bytes after dictionary"));
        }

        let dict = Dictionary {
            entries: bytes.slice_ref(entries),
            keys: bytes.slice_ref(keys),
            postings: bytes.slice_ref(postings),
            len,
            universe,
        };
        let mut prev: Option<&[u8]> = None;
        for idx in 0..len {
            let entry = dict.entry(idx);
            let key = dict.key_at(&entry)?;
            if entry.postings_off > dict.postings.len() {
                return Err(IndexError::corrupt("postings offset out of bounds"));
            }
            if prev.is_some_and(|p| p >= key) {
                return Err(IndexError::corrupt("dictionary keys not sorted"));
            }
            prev = Some(key);
        }
        Ok(dict)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Decoded postings for `key`; empty when the key is absent.
    pub fn get(&self, key: &str) -> Result<Vec<Ordinal>, IndexError> {
        let needle = key.as_bytes();
        let (mut lo, mut hi) = (0usize, self.len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.entry(mid);
            match self.key_at(&entry)?.cmp(needle) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    let blob = &self.postings[entry.postings_off..];
                    return postings::decode(blob, entry.count, self.universe);
                }
            }
        }
        Ok(Vec::new())
    }

    fn entry(&self, idx: usize) -> DictEntry {
        let base = idx * DICT_ENTRY_LEN;
        let e = &self.entries[base..base + DICT_ENTRY_LEN];
        DictEntry {
            key_off: le_u32(&e[0..4]) as usize,
            key_len: le_u32(&e[4..8]) as usize,
            postings_off: le_u64(&e[8..16]) as usize,
            count: le_u32(&e[16..20]) as usize,
        }
    }

    fn key_at(&self, entry: &DictEntry) -> Result<&[u8], IndexError> {
        entry
            .key_off
            .checked_add(entry.key_len)
            .and_then(|end| self.keys.get(entry.key_off..end))
            .ok_or_else(|| IndexError::corrupt("dictionary key out of bounds"))
    }
}

struct DictEntry {
    key_off: usize,
    key_len: usize,
    postings_off: usize,
    count: usize,
}

#[inline]
pub fn le_u32(b: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&b[..4]);
    u32::from_le_bytes(buf)
}

#[inline]
pub fn le_u64(b: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&b[..8]);
    u64::from_le_bytes(buf)
}

/// Bounds-checked little-endian cursor; running off the end is corruption.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], IndexError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| IndexError::corrupt("unexpected end of data"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, IndexError> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32, IndexError> {
        Ok(le_u32(self.take(4)?))
    }

    pub fn u64(&mut self) -> Result<u64, IndexError> {
        Ok(le_u64(self.take(8)?))
    }

    pub fn i64(&mut self) -> Result<i64, IndexError> {
        Ok(self.u64()? as i64)
    }

    pub fn usize64(&mut self) -> Result<usize, IndexError> {
        usize::try_from(self.u64()?).map_err(|_| IndexError::corrupt("length overflow"))
    }

    /// Everything not consumed yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}
