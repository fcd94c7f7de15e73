//! Generic scheme: LZ4-compressed frames of tagged values.
//!
//! Values are grouped into frames of [`FRAME_ROWS`]. Each frame is
//! compressed on its own, so random access decompresses a single frame.
//!
//! ```text
//! payload: [frame_rows: u32][frame_count: u32]
//!          [(offset: u32, len: u32) × frame_count]
//!          [compressed frames]
//! frame:   [value offsets: u32 × n][tagged values]   (before compression)
//! ```

use super::bytes::{len_u32, put_u32, put_value, ByteReader};
use crate::error::{Error, Result};
use crate::value::Value;

/// Values per compressed frame.
pub const FRAME_ROWS: usize = 4096;

pub(crate) fn encode(values: &[Value]) -> Result<Vec<u8>> {
    let frames: Vec<Vec<u8>> = values
        .chunks(FRAME_ROWS)
        .map(encode_frame)
        .collect::<Result<_>>()?;

    let mut out = Vec::new();
    put_u32(&mut out, len_u32(FRAME_ROWS, "frame rows")?);
    put_u32(&mut out, len_u32(frames.len(), "frame count")?);

    let mut offset = 0usize;
    for frame in &frames {
        put_u32(&mut out, len_u32(offset, "frame offset")?);
        put_u32(&mut out, len_u32(frame.len(), "frame length")?);
        offset += frame.len();
    }
    for frame in frames {
        out.extend_from_slice(&frame);
    }
    Ok(out)
}

fn encode_frame(chunk: &[Value]) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(chunk.len() * 4);
    for value in chunk {
        put_value(&mut body, value);
    }

    let mut frame = Vec::with_capacity(chunk.len() * 4 + body.len());
    let mut offset = 0usize;
    let mut scratch = Vec::with_capacity(16);
    for value in chunk {
        put_u32(&mut frame, len_u32(offset, "value offset")?);
        scratch.clear();
        put_value(&mut scratch, value);
        offset += scratch.len();
    }
    frame.extend_from_slice(&body);
    Ok(lz4_flex::compress_prepend_size(&frame))
}

struct Directory<'a> {
    frame_rows: usize,
    frames: Vec<(usize, usize)>,
    data: &'a [u8],
}

fn read_directory(payload: &[u8]) -> Result<Directory<'_>> {
    let mut reader = ByteReader::new(payload);
    let frame_rows = reader.u32()? as usize;
    if frame_rows == 0 {
        return Err(Error::CorruptBlock("generic block with zero frame size".to_string()));
    }
    let frame_count = reader.u32()? as usize;
    let mut frames = Vec::with_capacity(frame_count.min(1 << 16));
    for _ in 0..frame_count {
        let offset = reader.u32()? as usize;
        let len = reader.u32()? as usize;
        frames.push((offset, len));
    }
    let data = &payload[reader.position()..];
    Ok(Directory {
        frame_rows,
        frames,
        data,
    })
}

fn decompress_frame(dir: &Directory<'_>, frame_idx: usize) -> Result<Vec<u8>> {
    let (offset, len) = dir.frames[frame_idx];
    let compressed = offset
        .checked_add(len)
        .and_then(|end| dir.data.get(offset..end))
        .ok_or_else(|| Error::CorruptBlock(format!("frame {frame_idx} out of range")))?;
    lz4_flex::decompress_size_prepended(compressed)
        .map_err(|e| Error::CorruptBlock(format!("frame {frame_idx}: {e}")))
}

fn frame_len(dir: &Directory<'_>, frame_idx: usize, row_count: usize) -> usize {
    let start = frame_idx * dir.frame_rows;
    (row_count - start).min(dir.frame_rows)
}

pub(crate) fn decode(payload: &[u8], row_count: usize) -> Result<Vec<Value>> {
    let dir = read_directory(payload)?;
    let expected_frames = row_count.div_ceil(dir.frame_rows);
    if dir.frames.len() != expected_frames {
        return Err(Error::CorruptBlock(format!(
            "generic block declares {row_count} rows but holds {} frames",
            dir.frames.len()
        )));
    }

    let mut values = Vec::with_capacity(row_count);
    for frame_idx in 0..dir.frames.len() {
        let frame = decompress_frame(&dir, frame_idx)?;
        let n = frame_len(&dir, frame_idx, row_count);
        let mut reader = ByteReader::at(&frame, n * 4)?;
        for _ in 0..n {
            values.push(reader.value()?);
        }
        if !reader.is_exhausted() {
            return Err(Error::CorruptBlock(format!(
                "frame {frame_idx} holds more values than declared"
            )));
        }
    }
    Ok(values)
}

fn value_in_frame(frame: &[u8], n: usize, frame_rows: usize, position: usize) -> Result<Value> {
    let slot = position % frame_rows;
    if slot >= n {
        return Err(Error::CorruptBlock(format!("row {position} beyond frame end")));
    }
    let mut offsets = ByteReader::at(frame, slot * 4)?;
    let value_offset = offsets.u32()? as usize;
    let mut reader = ByteReader::at(frame, n * 4 + value_offset)?;
    reader.value()
}

fn check_frame(dir: &Directory<'_>, position: usize) -> Result<usize> {
    let frame_idx = position / dir.frame_rows;
    if frame_idx >= dir.frames.len() {
        return Err(Error::CorruptBlock(format!(
            "row {position} falls outside the frame directory"
        )));
    }
    Ok(frame_idx)
}

pub(crate) fn decode_at(payload: &[u8], row_count: usize, position: usize) -> Result<Value> {
    let dir = read_directory(payload)?;
    let frame_idx = check_frame(&dir, position)?;
    let frame = decompress_frame(&dir, frame_idx)?;
    let n = frame_len(&dir, frame_idx, row_count);
    value_in_frame(&frame, n, dir.frame_rows, position)
}

/// Reads the directory once and decompresses each touched frame once.
pub(crate) fn decode_positions(
    payload: &[u8],
    row_count: usize,
    positions: &[usize],
) -> Result<Vec<Value>> {
    let dir = read_directory(payload)?;
    let mut out = vec![Value::Null; positions.len()];
    let mut loaded = None;
    let mut frame = Vec::new();
    let mut n = 0;
    for (position, slot) in super::by_position(positions) {
        let frame_idx = check_frame(&dir, position)?;
        if loaded != Some(frame_idx) {
            frame = decompress_frame(&dir, frame_idx)?;
            n = frame_len(&dir, frame_idx, row_count);
            loaded = Some(frame_idx);
        }
        out[slot] = value_in_frame(&frame, n, dir.frame_rows, position)?;
    }
    Ok(out)
}
