//! Column codec: typed values ⇄ compressed, seekable column blocks.
//!
//! Three schemes are available:
//!
//! - [`Scheme::Generic`]: LZ4-compressed frames, any type.
//! - [`Scheme::Bitmap`]: value dictionary + roaring bitmaps, for
//!   low-cardinality columns.
//! - [`Scheme::Trie`]: front-coded strings with restart points and an
//!   optional suffix index for constant-bounded random access.
//!
//! The chosen scheme is written into the block header, so decoding never
//! repeats the encoder's heuristics.
//!
//! # Architecture
//!
//! ```text
//! ColumnBlock (Bytes)
//! ├── header: magic, version, scheme, type, flags, rows, payload len, crc32
//! └── payload: scheme-specific (see generic.rs / bitmap.rs / trie.rs)
//! ```

mod bitmap;
mod bytes;
mod generic;
mod header;
#[cfg(test)]
mod tests;
mod trie;

pub use generic::FRAME_ROWS;
pub use header::{BlockHeader, BLOCK_MAGIC, BLOCK_VERSION, HEADER_LEN};

use crate::config::CodecConfig;
use crate::error::{Error, Result};
use crate::index::BitmapIndex;
use crate::value::{ColumnType, Value};
use ::bytes::Bytes;
use header::{FLAG_CHECKSUM, FLAG_SUFFIX_INDEX};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Concrete block encoding, recorded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// LZ4-compressed frames.
    Generic,
    /// Dictionary + per-value bitmaps.
    Bitmap,
    /// Prefix-trie (front coding) for strings.
    Trie,
}

impl Scheme {
    const fn tag(self) -> u8 {
        match self {
            Self::Generic => 1,
            Self::Bitmap => 2,
            Self::Trie => 3,
        }
    }

    const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Generic),
            2 => Some(Self::Bitmap),
            3 => Some(Self::Trie),
            _ => None,
        }
    }
}

/// Encoding requested for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Let the codec pick from the data.
    #[default]
    Auto,
    /// Always use the generic scheme.
    Generic,
    /// Always use the bitmap scheme.
    Bitmap,
    /// Always use the prefix-trie scheme (string columns only).
    Trie,
}

impl Encoding {
    /// The pinned scheme, `None` for `Auto`.
    #[must_use]
    pub const fn fixed(self) -> Option<Scheme> {
        match self {
            Self::Auto => None,
            Self::Generic => Some(Scheme::Generic),
            Self::Bitmap => Some(Scheme::Bitmap),
            Self::Trie => Some(Scheme::Trie),
        }
    }

    /// Whether this encoding can store a column of type `ty`.
    #[must_use]
    pub const fn supports(self, ty: ColumnType) -> bool {
        !matches!(self, Self::Trie) || matches!(ty, ColumnType::String)
    }
}

/// Picks a scheme for `values`.
///
/// Deterministic for identical input and config:
///
/// 1. no rows → generic
/// 2. `distinct <= ratio * rows` → bitmap
/// 3. string column that is sorted or shares long prefixes → trie
/// 4. otherwise → generic
#[must_use]
pub fn select_scheme(values: &[Value], column_type: ColumnType, config: &CodecConfig) -> Scheme {
    if values.is_empty() {
        return Scheme::Generic;
    }

    let distinct: FxHashSet<&Value> = values.iter().collect();
    if distinct.len() as f64 <= config.bitmap_cardinality_ratio * values.len() as f64 {
        return Scheme::Bitmap;
    }

    if column_type == ColumnType::String {
        let sorted = values
            .windows(2)
            .all(|pair| pair[0].is_null() || pair[1].is_null() || pair[0] <= pair[1]);
        if sorted || trie::average_shared_prefix(values) >= config.trie_min_shared_prefix {
            return Scheme::Trie;
        }
    }

    Scheme::Generic
}

/// One encoded column of one partition.
///
/// Construction through [`ColumnBlock::parse`] validates the header and
/// checksum once; afterwards decoding only checks structural bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBlock {
    header: BlockHeader,
    bytes: Bytes,
}

impl ColumnBlock {
    /// Parses and verifies an encoded block.
    ///
    /// # Errors
    ///
    /// Returns `CorruptBlock` on a bad header, length mismatch or checksum
    /// mismatch.
    pub fn parse(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        let header = BlockHeader::read(&bytes)?;
        let payload_len = header.payload_len as usize;
        if bytes.len() != HEADER_LEN + payload_len {
            return Err(Error::CorruptBlock(format!(
                "block is {} bytes, header declares {}",
                bytes.len(),
                HEADER_LEN + payload_len
            )));
        }
        if header.has_checksum() {
            let actual = crc32fast::hash(&bytes[HEADER_LEN..]);
            if actual != header.checksum {
                return Err(Error::CorruptBlock(format!(
                    "checksum mismatch: stored {:08x}, computed {actual:08x}",
                    header.checksum
                )));
            }
        }
        Ok(Self { header, bytes })
    }

    /// Block header.
    #[must_use]
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// Scheme used by this block.
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.header.scheme
    }

    /// Column type of the block.
    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        self.header.column_type
    }

    /// Number of encoded values.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.header.row_count as usize
    }

    /// Encoded bytes (header + payload).
    #[must_use]
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a block with no bytes (never the case for a parsed block).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }

    /// Decodes every value, in original row order.
    ///
    /// # Errors
    ///
    /// Returns `CorruptBlock` if the payload is malformed or yields a row
    /// count different from the header's.
    pub fn decode(&self) -> Result<Vec<Value>> {
        let rows = self.row_count();
        let values = match self.header.scheme {
            Scheme::Generic => generic::decode(self.payload(), rows)?,
            Scheme::Bitmap => bitmap::decode(self.payload(), rows)?,
            Scheme::Trie => trie::decode(self.payload(), rows, self.header.has_suffix_index())?,
        };
        if values.len() != rows {
            return Err(Error::CorruptBlock(format!(
                "decoded {} values, header declares {rows}",
                values.len()
            )));
        }
        if let Some(bad) = values.iter().find(|v| !v.fits(self.header.column_type)) {
            return Err(Error::CorruptBlock(format!(
                "{} value inside a {} block",
                bad.type_name(),
                self.header.column_type
            )));
        }
        Ok(values)
    }

    /// Decodes the value at `position` without decoding the whole block.
    ///
    /// # Errors
    ///
    /// Returns `PositionOutOfBounds` past the last row and `CorruptBlock`
    /// if the payload is malformed.
    pub fn decode_at(&self, position: usize) -> Result<Value> {
        let rows = self.row_count();
        if position >= rows {
            return Err(Error::PositionOutOfBounds {
                position,
                row_count: rows,
            });
        }
        match self.header.scheme {
            Scheme::Generic => generic::decode_at(self.payload(), rows, position),
            Scheme::Bitmap => bitmap::decode_at(self.payload(), rows, position),
            Scheme::Trie => trie::decode_at(
                self.payload(),
                rows,
                position,
                self.header.has_suffix_index(),
            ),
        }
    }

    /// Decodes the values at `positions`, in the order given.
    ///
    /// Shared structures (frame directory, dictionary, null bitmap) are read
    /// once for the whole batch. Positions may repeat and need not be sorted.
    ///
    /// # Errors
    ///
    /// Returns `PositionOutOfBounds` for any position past the last row and
    /// `CorruptBlock` if the payload is malformed.
    pub fn decode_positions(&self, positions: &[usize]) -> Result<Vec<Value>> {
        let rows = self.row_count();
        if let Some(&position) = positions.iter().find(|&&p| p >= rows) {
            return Err(Error::PositionOutOfBounds {
                position,
                row_count: rows,
            });
        }
        if positions.is_empty() {
            return Ok(Vec::new());
        }
        match self.header.scheme {
            Scheme::Generic => generic::decode_positions(self.payload(), rows, positions),
            Scheme::Bitmap => bitmap::decode_positions(self.payload(), rows, positions),
            Scheme::Trie => trie::decode_positions(
                self.payload(),
                rows,
                positions,
                self.header.has_suffix_index(),
            ),
        }
    }

    /// Dictionary of a bitmap-scheme block, `None` for other schemes.
    ///
    /// # Errors
    ///
    /// Returns `CorruptBlock` if the dictionary cannot be read.
    pub fn dictionary(&self) -> Result<Option<BitmapIndex>> {
        match self.header.scheme {
            Scheme::Bitmap => bitmap::dictionary(self.payload(), self.row_count()).map(Some),
            _ => Ok(None),
        }
    }
}

/// `(position, output slot)` pairs ordered by position.
fn by_position(positions: &[usize]) -> Vec<(usize, usize)> {
    let mut sorted: Vec<(usize, usize)> = positions
        .iter()
        .enumerate()
        .map(|(slot, &position)| (position, slot))
        .collect();
    sorted.sort_unstable();
    sorted
}

/// Encodes a column.
///
/// `encoding` pins a scheme or lets [`select_scheme`] choose.
///
/// # Errors
///
/// Returns `InvalidQuery` for a trie encoding on a non-string column and
/// `Internal` when a value does not match `column_type`.
pub fn encode(
    values: &[Value],
    column_type: ColumnType,
    encoding: Encoding,
    config: &CodecConfig,
) -> Result<ColumnBlock> {
    if !encoding.supports(column_type) {
        return Err(Error::InvalidQuery(format!(
            "{encoding:?} encoding cannot store {column_type} values"
        )));
    }
    if let Some(bad) = values.iter().find(|v| !v.fits(column_type)) {
        return Err(Error::Internal(format!(
            "cannot encode a {} value into a {column_type} column",
            bad.type_name()
        )));
    }

    let row_count = bytes::len_u32(values.len(), "row count")?;
    let scheme = encoding
        .fixed()
        .unwrap_or_else(|| select_scheme(values, column_type, config));

    let mut flags = 0u8;
    let payload = match scheme {
        Scheme::Generic => generic::encode(values)?,
        Scheme::Bitmap => bitmap::encode(values)?,
        Scheme::Trie => {
            if config.trie_suffix_index {
                flags |= FLAG_SUFFIX_INDEX;
            }
            trie::encode(
                values,
                config.trie_restart_interval,
                config.trie_suffix_index,
            )?
        }
    };

    let checksum = if config.checksums {
        flags |= FLAG_CHECKSUM;
        crc32fast::hash(&payload)
    } else {
        0
    };

    let header = BlockHeader {
        scheme,
        column_type,
        flags,
        row_count,
        payload_len: bytes::len_u32(payload.len(), "payload")?,
        checksum,
    };

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    header.write(&mut out);
    out.extend_from_slice(&payload);

    Ok(ColumnBlock {
        header,
        bytes: Bytes::from(out),
    })
}

/// Parses and fully decodes an encoded block.
///
/// # Errors
///
/// Returns `CorruptBlock` on any integrity failure.
pub fn decode(bytes: impl Into<Bytes>) -> Result<Vec<Value>> {
    ColumnBlock::parse(bytes)?.decode()
}

/// Parses an encoded block and decodes a single value.
///
/// # Errors
///
/// Returns `CorruptBlock` on any integrity failure and
/// `PositionOutOfBounds` past the last row.
pub fn decode_at(bytes: impl Into<Bytes>, position: usize) -> Result<Value> {
    ColumnBlock::parse(bytes)?.decode_at(position)
}
