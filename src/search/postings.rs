//! Posting lists - sorted ordinal sets and their on-disk encoding / 倒排列表
//!
//! A posting list is a strictly increasing list of record ordinals. On disk
//! it is stored as LEB128 varints of the gaps between consecutive entries.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::error::IndexError;

pub type Ordinal = u32;

/// Append `value` as an unsigned LEB128 varint.
#[inline]
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Read one varint starting at `*pos`, advancing it.
#[inline]
pub fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, IndexError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| IndexError::corrupt("truncated varint"))?;
        *pos += 1;
        if shift >= 64 {
            return Err(IndexError::corrupt("varint overflow"));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Delta-encode a strictly increasing list.
pub fn encode(postings: &[Ordinal], out: &mut Vec<u8>) {
    let mut prev = 0u32;
    for (i, &ord) in postings.iter().enumerate() {
        let delta = if i == 0 { ord } else { ord - prev };
        write_varint(out, u64::from(delta));
        prev = ord;
    }
}

/// Decode `count` entries. Rejects lists that are not strictly increasing
/// or that reference an ordinal outside `0..universe`.
pub fn decode(buf: &[u8], count: usize, universe: u32) -> Result<Vec<Ordinal>, IndexError> {
    let mut out = Vec::with_capacity(count.min(buf.len()));
    let mut pos = 0usize;
    let mut prev: u64 = 0;
    for i in 0..count {
        let delta = read_varint(buf, &mut pos)?;
        let ord = if i == 0 {
            delta
        } else {
            if delta == 0 {
                return Err(IndexError::corrupt("posting list is not strictly increasing"));
            }
            prev.checked_add(delta)
                .ok_or_else(|| IndexError::corrupt("posting delta overflow"))?
        };
        if ord >= u64::from(universe) {
            return Err(IndexError::corrupt(format!(
                "posting {} out of range (records: {})",
                ord, universe
            )));
        }
        out.push(ord as Ordinal);
        prev = ord;
    }
    Ok(out)
}

/// Intersection of two sorted lists (merge join).
pub fn intersect(a: &[Ordinal], b: &[Ordinal]) -> Vec<Ordinal> {
    let (mut i, mut j) = (0usize, 0usize);
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Intersect many lists, smallest first; stops as soon as the result is empty.
pub fn intersect_all(mut lists: Vec<Vec<Ordinal>>) -> Vec<Ordinal> {
    if lists.is_empty() {
        return Vec::new();
    }
    lists.sort_by_key(Vec::len);
    let mut iter = lists.into_iter();
    let mut acc = iter.next().unwrap_or_default();
    for list in iter {
        if acc.is_empty() {
            break;
        }
        acc = intersect(&acc, &list);
    }
    acc
}

/// k-way union of sorted lists; duplicates collapse.
pub fn union_all(lists: &[Vec<Ordinal>]) -> Vec<Ordinal> {
    match lists.len() {
        0 => return Vec::new(),
        1 => return lists[0].clone(),
        _ => {}
    }
    let mut heap = BinaryHeap::with_capacity(lists.len());
    for (list_idx, list) in lists.iter().enumerate() {
        if let Some(&first) = list.first() {
            heap.push(Reverse((first, list_idx, 0usize)));
        }
    }
    let mut out: Vec<Ordinal> = Vec::new();
    while let Some(Reverse((ord, list_idx, pos))) = heap.pop() {
        if out.last() != Some(&ord) {
            out.push(ord);
        }
        if let Some(&next) = lists[list_idx].get(pos + 1) {
            heap.push(Reverse((next, list_idx, pos + 1)));
        }
    }
    out
}
