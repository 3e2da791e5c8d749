//! Compression codecs for sources and record blocks / 压缩编解码
//!
//! Sources are decompressed as streams (LZ4 frame, Zstandard stream).
//! Record store blocks use the raw block APIs; their uncompressed length is
//! kept in the block table, not in the block.

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::IndexError;

const ZSTD_LEVEL: i32 = 3;

/// Compressor / 压缩算法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Lz4,
    #[default]
    Zstd,
}

impl Compression {
    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        }
    }

    /// Tag stored in the index header.
    pub fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
            Compression::Zstd => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, IndexError> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            2 => Ok(Compression::Zstd),
            other => Err(IndexError::corrupt(format!("unknown compressor tag {}", other))),
        }
    }

    /// Detect from a file extension such as `lz4` or `zst`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "lz4" => Some(Compression::Lz4),
            "zst" | "zstd" => Some(Compression::Zstd),
            _ => None,
        }
    }

    pub fn compress_block(self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Lz4 => lz4::block::compress(data, None, false),
            Compression::Zstd => zstd::bulk::compress(data, ZSTD_LEVEL),
        }
    }

    pub fn decompress_block(self, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>, IndexError> {
        let out = match self {
            Compression::None => data.to_vec(),
            Compression::Lz4 => {
                let len = i32::try_from(uncompressed_len)
                    .map_err(|_| IndexError::corrupt("record block too large"))?;
                lz4::block::decompress(data, Some(len))
                    .map_err(|e| IndexError::corrupt(format!("lz4 block: {}", e)))?
            }
            Compression::Zstd => zstd::bulk::decompress(data, uncompressed_len)
                .map_err(|e| IndexError::corrupt(format!("zstd block: {}", e)))?,
        };
        if out.len() != uncompressed_len {
            return Err(IndexError::corrupt(format!(
                "record block length {} != {}",
                out.len(),
                uncompressed_len
            )));
        }
        Ok(out)
    }

    /// Wrap a reader with the matching stream decoder.
    pub fn stream_decoder<'a, R: Read + 'a>(self, reader: R) -> io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => Box::new(reader),
            Compression::Lz4 => Box::new(lz4::Decoder::new(reader)?),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
        })
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compression {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd),
            other => Err(IndexError::UnknownCompressor(other.to_string())),
        }
    }
}
