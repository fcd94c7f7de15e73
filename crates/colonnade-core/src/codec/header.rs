//! Column block header.
//!
//! ```text
//! [Magic: "CLNB" 4 bytes]
//! [Version: 1 byte]
//! [Scheme: 1 byte]
//! [Value type: 1 byte]
//! [Flags: 1 byte]          bit 0 = checksum present, bit 1 = suffix index present
//! [Row count: u32]
//! [Payload length: u32]
//! [CRC32 of payload: u32]  zero when the checksum flag is clear
//! ```

use super::bytes::ByteReader;
use super::Scheme;
use crate::error::{Error, Result};
use crate::value::ColumnType;

/// Block magic bytes.
pub const BLOCK_MAGIC: &[u8; 4] = b"CLNB";

/// Current block format version.
pub const BLOCK_VERSION: u8 = 1;

/// Encoded header size in bytes.
pub const HEADER_LEN: usize = 20;

pub(crate) const FLAG_CHECKSUM: u8 = 0b01;
pub(crate) const FLAG_SUFFIX_INDEX: u8 = 0b10;

/// Decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Scheme the payload was encoded with.
    pub scheme: Scheme,
    /// Type of the column.
    pub column_type: ColumnType,
    /// Raw flag bits.
    pub flags: u8,
    /// Number of values in the block.
    pub row_count: u32,
    /// Payload length following the header.
    pub payload_len: u32,
    /// CRC32 of the payload (zero when absent).
    pub checksum: u32,
}

impl BlockHeader {
    /// True when a payload checksum is recorded.
    #[must_use]
    pub fn has_checksum(&self) -> bool {
        self.flags & FLAG_CHECKSUM != 0
    }

    /// True when a prefix-trie block carries its suffix index.
    #[must_use]
    pub fn has_suffix_index(&self) -> bool {
        self.flags & FLAG_SUFFIX_INDEX != 0
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(BLOCK_MAGIC);
        out.push(BLOCK_VERSION);
        out.push(self.scheme.tag());
        out.push(self.column_type.tag());
        out.push(self.flags);
        out.extend_from_slice(&self.row_count.to_le_bytes());
        out.extend_from_slice(&self.payload_len.to_le_bytes());
        out.extend_from_slice(&self.checksum.to_le_bytes());
    }

    pub(crate) fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::CorruptBlock(format!(
                "block of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        let mut reader = ByteReader::new(bytes);
        if reader.take(4)? != BLOCK_MAGIC {
            return Err(Error::CorruptBlock("bad block magic".to_string()));
        }
        let version = reader.u8()?;
        if version != BLOCK_VERSION {
            return Err(Error::CorruptBlock(format!(
                "unsupported block version {version}"
            )));
        }
        let scheme_tag = reader.u8()?;
        let scheme = Scheme::from_tag(scheme_tag)
            .ok_or_else(|| Error::CorruptBlock(format!("unknown scheme tag {scheme_tag}")))?;
        let type_tag = reader.u8()?;
        let column_type = ColumnType::from_tag(type_tag)
            .ok_or_else(|| Error::CorruptBlock(format!("unknown value type tag {type_tag}")))?;
        Ok(Self {
            scheme,
            column_type,
            flags: reader.u8()?,
            row_count: reader.u32()?,
            payload_len: reader.u32()?,
            checksum: reader.u32()?,
        })
    }
}
