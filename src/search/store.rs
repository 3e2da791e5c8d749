//! Columnar record store / 列式记录存储
//!
//! Fixed-width columns (id, filesize, year, pages, flags, quality) are
//! stored raw so range filters, ranking and id lookups never decompress
//! anything. The remaining fields live in compressed row blocks of
//! `block_size` records.
//!
//! ```text
//! count u64 | block_size u32 | block_count u32
//! id u64 x count | filesize u64 x count | year u32 x count | pages u32 x count
//! flags u8 x count | quality u8 x count
//! blocks block_count x (offset u64 | compressed_len u32 | uncompressed_len u32)
//! blob
//! ```

use std::collections::HashMap;

use bytes::Bytes;

use super::compression::Compression;
use super::error::IndexError;
use super::format::{le_u32, le_u64, ByteReader};
use super::postings::{read_varint, write_varint, Ordinal};
use super::schema::{BookRecord, NumericField, RecordFlags};

const BLOCK_ENTRY_LEN: usize = 8 + 4 + 4;

/// Serialize records (already in ordinal order).
pub fn write_store(
    records: &[BookRecord],
    compressor: Compression,
    block_size: usize,
) -> Result<Vec<u8>, IndexError> {
    let block_size = block_size.max(1);
    let count = records.len();
    let block_count = count.div_ceil(block_size);

    let mut out = Vec::new();
    out.extend_from_slice(&(count as u64).to_le_bytes());
    out.extend_from_slice(&(block_size as u32).to_le_bytes());
    out.extend_from_slice(&(block_count as u32).to_le_bytes());

    for book in records {
        out.extend_from_slice(&book.id.to_le_bytes());
    }
    for book in records {
        out.extend_from_slice(&book.filesize.to_le_bytes());
    }
    for book in records {
        out.extend_from_slice(&book.year.unwrap_or(0).to_le_bytes());
    }
    for book in records {
        out.extend_from_slice(&book.pages.unwrap_or(0).to_le_bytes());
    }
    for book in records {
        out.push(book.flags.bits());
    }
    for book in records {
        out.push(book.quality_boost());
    }

    let mut table = Vec::with_capacity(block_count * BLOCK_ENTRY_LEN);
    let mut blob = Vec::new();
    let mut raw = Vec::new();
    for chunk in records.chunks(block_size) {
        raw.clear();
        for book in chunk {
            encode_row(book, &mut raw);
        }
        let packed = compressor.compress_block(&raw)?;
        table.extend_from_slice(&(blob.len() as u64).to_le_bytes());
        table.extend_from_slice(&(packed.len() as u32).to_le_bytes());
        table.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        blob.extend_from_slice(&packed);
    }
    out.extend_from_slice(&table);
    out.extend_from_slice(&blob);
    Ok(out)
}

fn encode_row(book: &BookRecord, out: &mut Vec<u8>) {
    for text in [&book.title, &book.author, &book.extension, &book.language] {
        write_str(out, Some(text.as_str()));
    }
    for text in [
        &book.publisher,
        &book.isbn,
        &book.ipfs_cid,
        &book.cover_url,
        &book.md5,
    ] {
        write_str(out, text.as_deref());
    }
}

/// varint(len + 1) then bytes; 0 marks an absent value.
fn write_str(out: &mut Vec<u8>, value: Option<&str>) {
    match value {
        None => write_varint(out, 0),
        Some(s) => {
            write_varint(out, s.len() as u64 + 1);
            out.extend_from_slice(s.as_bytes());
        }
    }
}

fn read_str(buf: &[u8], pos: &mut usize) -> Result<Option<String>, IndexError> {
    let tag = read_varint(buf, pos)?;
    if tag == 0 {
        return Ok(None);
    }
    let len = usize::try_from(tag - 1).map_err(|_| IndexError::corrupt("string length"))?;
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| IndexError::corrupt("string out of bounds"))?;
    let s = std::str::from_utf8(&buf[*pos..end])
        .map_err(|_| IndexError::corrupt("invalid utf-8 in record block"))?
        .to_string();
    *pos = end;
    Ok(Some(s))
}

/// Row fields that are not in a fixed-width column.
struct RowFields {
    title: String,
    author: String,
    extension: String,
    language: String,
    publisher: Option<String>,
    isbn: Option<String>,
    ipfs_cid: Option<String>,
    cover_url: Option<String>,
    md5: Option<String>,
}

fn decode_rows(buf: &[u8], expected: usize) -> Result<Vec<RowFields>, IndexError> {
    let mut rows = Vec::with_capacity(expected);
    let mut pos = 0usize;
    let required = |v: Option<String>| v.ok_or_else(|| IndexError::corrupt("missing required field"));
    for _ in 0..expected {
        rows.push(RowFields {
            title: required(read_str(buf, &mut pos)?)?,
            author: required(read_str(buf, &mut pos)?)?,
            extension: required(read_str(buf, &mut pos)?)?,
            language: required(read_str(buf, &mut pos)?)?,
            publisher: read_str(buf, &mut pos)?,
            isbn: read_str(buf, &mut pos)?,
            ipfs_cid: read_str(buf, &mut pos)?,
            cover_url: read_str(buf, &mut pos)?,
            md5: read_str(buf, &mut pos)?,
        });
    }
    if pos != buf.len() {
        return Err(IndexError::corrupt("trailing bytes in record block"));
    }
    Ok(rows)
}

/// Read side of the record store; all slices share the generation buffer.
#[derive(Debug, Clone)]
pub struct RecordStore {
    count: usize,
    block_size: usize,
    compressor: Compression,
    ids: Bytes,
    filesizes: Bytes,
    years: Bytes,
    pages: Bytes,
    flags: Bytes,
    quality: Bytes,
    blocks: Bytes,
    blob: Bytes,
}

impl RecordStore {
    pub fn parse(section: Bytes, compressor: Compression) -> Result<Self, IndexError> {
        let mut r = ByteReader::new(&section);
        let count = r.usize64()?;
        let block_size = r.u32()? as usize;
        let block_count = r.u32()? as usize;
        if block_size == 0 || block_count != count.div_ceil(block_size) {
            return Err(IndexError::corrupt("record store block layout"));
        }
        let width = |w: usize| {
            count
                .checked_mul(w)
                .ok_or_else(|| IndexError::corrupt("record count overflow"))
        };
        let ids = r.take(width(8)?)?;
        let filesizes = r.take(width(8)?)?;
        let years = r.take(width(4)?)?;
        let pages = r.take(width(4)?)?;
        let flags = r.take(width(1)?)?;
        let quality = r.take(width(1)?)?;
        let blocks = r.take(block_count * BLOCK_ENTRY_LEN)?;
        let blob = r.rest();

        let store = RecordStore {
            count,
            block_size,
            compressor,
            ids: section.slice_ref(ids),
            filesizes: section.slice_ref(filesizes),
            years: section.slice_ref(years),
            pages: section.slice_ref(pages),
            flags: section.slice_ref(flags),
            quality: section.slice_ref(quality),
            blocks: section.slice_ref(blocks),
            blob: section.slice_ref(blob),
        };

        let mut prev_id: Option<u64> = None;
        for ord in 0..count {
            let id = store.id_at(ord as Ordinal);
            if prev_id.is_some_and(|p| p >= id) {
                return Err(IndexError::corrupt("id column not strictly increasing"));
            }
            prev_id = Some(id);
        }
        for block in 0..block_count {
            let (offset, compressed, _) = store.block_entry(block);
            if offset.checked_add(compressed).map_or(true, |end| end > store.blob.len()) {
                return Err(IndexError::corrupt("record block out of bounds"));
            }
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn id_at(&self, ord: Ordinal) -> u64 {
        let i = ord as usize * 8;
        le_u64(&self.ids[i..i + 8])
    }

    /// Column value for range filtering; absent year/pages read as 0.
    #[inline]
    pub fn numeric(&self, field: NumericField, ord: Ordinal) -> u64 {
        let ord = ord as usize;
        match field {
            NumericField::Filesize => le_u64(&self.filesizes[ord * 8..ord * 8 + 8]),
            NumericField::Year => u64::from(le_u32(&self.years[ord * 4..ord * 4 + 4])),
            NumericField::Pages => u64::from(le_u32(&self.pages[ord * 4..ord * 4 + 4])),
        }
    }

    /// Stored metadata completeness boost of a record.
    #[inline]
    pub fn quality(&self, ord: Ordinal) -> u8 {
        self.quality[ord as usize]
    }

    /// Binary search the id column.
    pub fn ordinal_of(&self, id: u64) -> Option<Ordinal> {
        let (mut lo, mut hi) = (0usize, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.id_at(mid as Ordinal).cmp(&id) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(mid as Ordinal),
            }
        }
        None
    }

    fn block_entry(&self, block: usize) -> (usize, usize, usize) {
        let e = &self.blocks[block * BLOCK_ENTRY_LEN..(block + 1) * BLOCK_ENTRY_LEN];
        (
            le_u64(&e[0..8]) as usize,
            le_u32(&e[8..12]) as usize,
            le_u32(&e[12..16]) as usize,
        )
    }

    fn read_block(&self, block: usize) -> Result<Vec<RowFields>, IndexError> {
        let (offset, compressed, uncompressed) = self.block_entry(block);
        let packed = &self.blob[offset..offset + compressed];
        let raw = self.compressor.decompress_block(packed, uncompressed)?;
        let rows_in_block = (self.count - block * self.block_size).min(self.block_size);
        decode_rows(&raw, rows_in_block)
    }

    /// Materialize records in the given order. Each block is decompressed once.
    pub fn get_many(&self, ords: &[Ordinal]) -> Result<Vec<BookRecord>, IndexError> {
        let mut blocks: HashMap<usize, Vec<RowFields>> = HashMap::new();
        let mut out = Vec::with_capacity(ords.len());
        for &ord in ords {
            if ord as usize >= self.count {
                return Err(IndexError::corrupt(format!("ordinal {} out of range", ord)));
            }
            let block = ord as usize / self.block_size;
            if !blocks.contains_key(&block) {
                blocks.insert(block, self.read_block(block)?);
            }
            let row = blocks
                .get(&block)
                .and_then(|rows| rows.get(ord as usize % self.block_size))
                .ok_or_else(|| IndexError::corrupt("row missing from block"))?;
            out.push(self.assemble(ord, row));
        }
        Ok(out)
    }

    pub fn get(&self, ord: Ordinal) -> Result<BookRecord, IndexError> {
        self.get_many(&[ord])?
            .pop()
            .ok_or_else(|| IndexError::corrupt("record missing"))
    }

    fn assemble(&self, ord: Ordinal, row: &RowFields) -> BookRecord {
        let positive = |v: u64| u32::try_from(v).ok().filter(|v| *v > 0);
        BookRecord {
            id: self.id_at(ord),
            title: row.title.clone(),
            author: row.author.clone(),
            publisher: row.publisher.clone(),
            extension: row.extension.clone(),
            filesize: self.numeric(NumericField::Filesize, ord),
            language: row.language.clone(),
            year: positive(self.numeric(NumericField::Year, ord)),
            pages: positive(self.numeric(NumericField::Pages, ord)),
            isbn: row.isbn.clone(),
            ipfs_cid: row.ipfs_cid.clone(),
            cover_url: row.cover_url.clone(),
            md5: row.md5.clone(),
            flags: RecordFlags::from_bits(self.flags[ord as usize]),
        }
    }
}
