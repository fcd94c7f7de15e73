//! Prefix-trie scheme for string columns (front coding).
//!
//! Each entry stores the length of the prefix it shares with the previous
//! entry followed by its remaining suffix. Every `restart_interval`-th entry
//! is a restart point that shares nothing, so decoding can begin there.
//!
//! With the suffix index (one offset per entry) a single value is rebuilt
//! from its restart point in at most `restart_interval` steps. Without it,
//! random access degrades to a sequential scan from the first entry.
//!
//! ```text
//! payload: [restart_interval: u32]
//!          [null bitmap length: u32][roaring null bitmap]
//!          [entry offsets: u32 × row_count]       (suffix index only)
//!          [entries: varint shared, varint suffix_len, suffix bytes]
//! ```
//!
//! Null rows are recorded in the null bitmap and stored as empty entries.

use super::bytes::{len_u32, put_u32, put_varint, ByteReader};
use crate::error::{Error, Result};
use crate::value::Value;
use roaring::RoaringBitmap;

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Average shared-prefix length between neighbours, used by scheme selection.
pub(crate) fn average_shared_prefix(values: &[Value]) -> usize {
    let strings: Vec<&[u8]> = values
        .iter()
        .filter_map(|v| v.as_str().map(str::as_bytes))
        .collect();
    if strings.len() < 2 {
        return 0;
    }
    let total: usize = strings
        .windows(2)
        .map(|pair| shared_prefix_len(pair[0], pair[1]))
        .sum();
    total / (strings.len() - 1)
}

pub(crate) fn encode(values: &[Value], restart_interval: usize, suffix_index: bool) -> Result<Vec<u8>> {
    let restart_interval = restart_interval.max(1);
    let mut nulls = RoaringBitmap::new();
    let mut offsets = Vec::with_capacity(if suffix_index { values.len() } else { 0 });
    let mut entries = Vec::new();
    let mut prev: &[u8] = &[];

    for (idx, value) in values.iter().enumerate() {
        let current: &[u8] = match value {
            Value::String(s) => s.as_bytes(),
            Value::Null => {
                nulls.insert(len_u32(idx, "row position")?);
                &[]
            }
            other => {
                return Err(Error::Internal(format!(
                    "prefix-trie encoding got a {} value",
                    other.type_name()
                )))
            }
        };
        if suffix_index {
            offsets.push(len_u32(entries.len(), "entry offset")?);
        }
        let shared = if idx % restart_interval == 0 {
            0
        } else {
            shared_prefix_len(prev, current)
        };
        put_varint(&mut entries, shared as u64);
        put_varint(&mut entries, (current.len() - shared) as u64);
        entries.extend_from_slice(&current[shared..]);
        prev = current;
    }

    let mut null_bytes = Vec::with_capacity(nulls.serialized_size());
    nulls.serialize_into(&mut null_bytes)?;

    let mut out = Vec::with_capacity(8 + null_bytes.len() + offsets.len() * 4 + entries.len());
    put_u32(&mut out, len_u32(restart_interval, "restart interval")?);
    put_u32(&mut out, len_u32(null_bytes.len(), "null bitmap")?);
    out.extend_from_slice(&null_bytes);
    for offset in offsets {
        put_u32(&mut out, offset);
    }
    out.extend_from_slice(&entries);
    Ok(out)
}

struct Layout<'a> {
    restart_interval: usize,
    nulls: RoaringBitmap,
    offsets_at: Option<usize>,
    entries: &'a [u8],
    payload: &'a [u8],
}

fn read_layout(payload: &[u8], row_count: usize, suffix_index: bool) -> Result<Layout<'_>> {
    let mut reader = ByteReader::new(payload);
    let restart_interval = reader.u32()? as usize;
    if restart_interval == 0 {
        return Err(Error::CorruptBlock("trie block with zero restart interval".to_string()));
    }
    let null_len = reader.u32()? as usize;
    let nulls = RoaringBitmap::deserialize_from(reader.take(null_len)?)
        .map_err(|e| Error::CorruptBlock(format!("trie null bitmap: {e}")))?;
    let offsets_at = if suffix_index {
        let at = reader.position();
        reader.take(row_count * 4)?;
        Some(at)
    } else {
        None
    };
    let entries = &payload[reader.position()..];
    Ok(Layout {
        restart_interval,
        nulls,
        offsets_at,
        entries,
        payload,
    })
}

fn next_entry(reader: &mut ByteReader<'_>, prev: &mut Vec<u8>) -> Result<()> {
    let shared = reader.varint_usize()?;
    let suffix_len = reader.varint_usize()?;
    if shared > prev.len() {
        return Err(Error::CorruptBlock(format!(
            "trie entry shares {shared} bytes with a {}-byte predecessor",
            prev.len()
        )));
    }
    prev.truncate(shared);
    prev.extend_from_slice(reader.take(suffix_len)?);
    Ok(())
}

fn to_value(bytes: &[u8], is_null: bool) -> Result<Value> {
    if is_null {
        return Ok(Value::Null);
    }
    std::str::from_utf8(bytes)
        .map(|s| Value::String(s.to_string()))
        .map_err(|e| Error::CorruptBlock(format!("invalid utf-8 in trie entry: {e}")))
}

pub(crate) fn decode(payload: &[u8], row_count: usize, suffix_index: bool) -> Result<Vec<Value>> {
    let layout = read_layout(payload, row_count, suffix_index)?;
    let mut reader = ByteReader::new(layout.entries);
    let mut current = Vec::new();
    let mut values = Vec::with_capacity(row_count);
    for idx in 0..row_count {
        next_entry(&mut reader, &mut current)?;
        values.push(to_value(&current, layout.nulls.contains(idx as u32))?);
    }
    if !reader.is_exhausted() {
        return Err(Error::CorruptBlock(format!(
            "trie block holds more than the declared {row_count} entries"
        )));
    }
    Ok(values)
}

pub(crate) fn decode_at(
    payload: &[u8],
    row_count: usize,
    position: usize,
    suffix_index: bool,
) -> Result<Value> {
    let layout = read_layout(payload, row_count, suffix_index)?;
    if layout.nulls.contains(position as u32) {
        return Ok(Value::Null);
    }

    let start = match layout.offsets_at {
        Some(offsets_at) => {
            let restart = position - position % layout.restart_interval;
            let mut offsets = ByteReader::at(layout.payload, offsets_at + restart * 4)?;
            let entry_offset = offsets.u32()? as usize;
            (restart, entry_offset)
        }
        None => (0, 0),
    };

    let mut reader = ByteReader::at(layout.entries, start.1)?;
    let mut current = Vec::new();
    for _ in start.0..=position {
        next_entry(&mut reader, &mut current)?;
    }
    to_value(&current, false)
}

/// Reads the layout once and walks forward through sorted positions,
/// jumping to a restart point only when it lies ahead of the cursor.
pub(crate) fn decode_positions(
    payload: &[u8],
    row_count: usize,
    positions: &[usize],
    suffix_index: bool,
) -> Result<Vec<Value>> {
    let layout = read_layout(payload, row_count, suffix_index)?;
    let mut out = vec![Value::Null; positions.len()];
    let mut reader = ByteReader::new(layout.entries);
    let mut current = Vec::new();
    let mut next = 0usize;

    for (position, slot) in super::by_position(positions) {
        if layout.nulls.contains(position as u32) {
            continue;
        }
        if let Some(offsets_at) = layout.offsets_at {
            let restart = position - position % layout.restart_interval;
            if next < restart || next > position + 1 {
                let mut offsets = ByteReader::at(layout.payload, offsets_at + restart * 4)?;
                reader = ByteReader::at(layout.entries, offsets.u32()? as usize)?;
                current.clear();
                next = restart;
            }
        }
        while next <= position {
            next_entry(&mut reader, &mut current)?;
            next += 1;
        }
        out[slot] = to_value(&current, false)?;
    }
    Ok(out)
}
