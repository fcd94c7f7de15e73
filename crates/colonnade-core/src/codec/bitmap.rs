//! Bitmap scheme: value dictionary plus one roaring bitmap per value.
//!
//! The payload is a serialized [`BitmapIndex`]. Roaring run containers give
//! run-length compression over sorted row positions, which is what makes
//! this scheme pay off on low-cardinality columns.

use crate::error::{Error, Result};
use crate::index::BitmapIndex;
use crate::value::Value;
use roaring::RoaringBitmap;

pub(crate) fn encode(values: &[Value]) -> Result<Vec<u8>> {
    BitmapIndex::build(values)?.to_bytes()
}

fn load(payload: &[u8], row_count: usize) -> Result<BitmapIndex> {
    let index = BitmapIndex::from_bytes(payload)?;
    if index.row_count() != row_count {
        return Err(Error::CorruptBlock(format!(
            "bitmap block declares {row_count} rows but indexes {}",
            index.row_count()
        )));
    }
    Ok(index)
}

pub(crate) fn decode(payload: &[u8], row_count: usize) -> Result<Vec<Value>> {
    let index = load(payload, row_count)?;
    let mut values = vec![Value::Null; row_count];
    for (value, rows) in index.entries() {
        for pos in rows {
            values[pos as usize] = value.clone();
        }
    }
    Ok(values)
}

pub(crate) fn decode_at(payload: &[u8], row_count: usize, position: usize) -> Result<Value> {
    let index = load(payload, row_count)?;
    let pos = u32::try_from(position)
        .map_err(|_| Error::CorruptBlock(format!("row {position} exceeds u32")))?;
    index
        .value_at(pos)
        .cloned()
        .ok_or_else(|| Error::CorruptBlock(format!("row {position} missing from every bitmap")))
}

/// Loads the dictionary once and resolves every position against it.
pub(crate) fn decode_positions(
    payload: &[u8],
    row_count: usize,
    positions: &[usize],
) -> Result<Vec<Value>> {
    let index = load(payload, row_count)?;
    let sorted = super::by_position(positions);
    let mut wanted = RoaringBitmap::new();
    for &(position, _) in &sorted {
        let pos = u32::try_from(position)
            .map_err(|_| Error::CorruptBlock(format!("row {position} exceeds u32")))?;
        wanted.insert(pos);
    }

    let mut out: Vec<Option<Value>> = vec![None; positions.len()];
    for (value, rows) in index.entries() {
        for pos in rows & &wanted {
            let pos = pos as usize;
            let first = sorted.partition_point(|&(p, _)| p < pos);
            for &(_, slot) in sorted[first..].iter().take_while(|&&(p, _)| p == pos) {
                out[slot] = Some(value.clone());
            }
        }
    }
    out.into_iter()
        .zip(positions)
        .map(|(value, position)| {
            value.ok_or_else(|| {
                Error::CorruptBlock(format!("row {position} missing from every bitmap"))
            })
        })
        .collect()
}

/// Loads the dictionary of a bitmap block without materializing rows.
pub(crate) fn dictionary(payload: &[u8], row_count: usize) -> Result<BitmapIndex> {
    load(payload, row_count)
}
