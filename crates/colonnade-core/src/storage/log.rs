//! Append-only log store.
//!
//! Every mutation is one record appended to `colonnade.log`. An in-memory
//! index maps each live key to the file offset of its value. Opening the
//! store replays the log to rebuild the index.
//!
//! # Record Format
//!
//! ```text
//! [Marker: 1 byte]      1 = batch put, 2 = batch delete
//! [Body length: u32]
//! [CRC32 of body: u32]
//! [Body]
//!
//! put body:    [count: u32] ([key len: u32][key][value len: u32][value]) × count
//! delete body: [count: u32] ([key len: u32][key]) × count
//! ```
//!
//! A batch is a single record, so a crash mid-write loses the whole batch
//! or nothing. A truncated or corrupt tail is cut off on open.

use super::KvStore;
use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Log file name inside the data directory.
pub const LOG_FILE_NAME: &str = "colonnade.log";

const MARKER_PUT: u8 = 1;
const MARKER_DELETE: u8 = 2;
const RECORD_HEADER_LEN: u64 = 9;

/// Location of a value inside the log.
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    len: u32,
}

struct LogWriter {
    file: File,
    position: u64,
}

/// Durable [`KvStore`] backed by an append-only log file.
pub struct LogKvStore {
    path: PathBuf,
    index: RwLock<BTreeMap<String, Slot>>,
    writer: Mutex<LogWriter>,
    reader: Mutex<File>,
    sync_writes: bool,
}

impl LogKvStore {
    /// Opens the store in `dir`, creating it when absent.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory or log file cannot be opened.
    pub fn open<P: AsRef<Path>>(dir: P, sync_writes: bool) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        let file_len = file.metadata()?.len();

        let (index, valid_len) = Self::replay(&path, file_len)?;
        if valid_len < file_len {
            tracing::warn!(
                path = %path.display(),
                discarded = file_len - valid_len,
                "Truncating torn tail of log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let mut append = file;
        append.seek(SeekFrom::Start(valid_len))?;
        let reader = File::open(&path)?;

        tracing::debug!(
            path = %path.display(),
            keys = index.len(),
            bytes = valid_len,
            "Opened log store"
        );

        Ok(Self {
            path,
            index: RwLock::new(index),
            writer: Mutex::new(LogWriter {
                file: append,
                position: valid_len,
            }),
            reader: Mutex::new(reader),
            sync_writes,
        })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// True when no key is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Replays the log, returning the index and the length of the valid prefix.
    fn replay(path: &Path, file_len: u64) -> Result<(BTreeMap<String, Slot>, u64)> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;

        let mut index = BTreeMap::new();
        let mut pos = 0usize;
        while (pos as u64) < file_len {
            let Some((marker, body, next)) = read_record(&data, pos) else {
                break;
            };
            let body_offset = (pos as u64) + RECORD_HEADER_LEN;
            match marker {
                MARKER_PUT => {
                    let Some(entries) = parse_put(body) else { break };
                    for (key, value_at, len) in entries {
                        index.insert(
                            key,
                            Slot {
                                offset: body_offset + value_at as u64,
                                len,
                            },
                        );
                    }
                }
                MARKER_DELETE => {
                    let Some(keys) = parse_delete(body) else { break };
                    for key in keys {
                        index.remove(&key);
                    }
                }
                _ => break,
            }
            pos = next;
        }
        Ok((index, pos as u64))
    }

    /// Appends one record, then runs `publish` with the offset of its body.
    ///
    /// `publish` runs before the append lock is released, so index updates
    /// apply in log order.
    fn append(&self, marker: u8, body: &[u8], publish: impl FnOnce(u64)) -> Result<()> {
        let body_len = u32::try_from(body.len())
            .map_err(|_| Error::Storage(format!("record of {} bytes too large", body.len())))?;
        let mut record = Vec::with_capacity(RECORD_HEADER_LEN as usize + body.len());
        record.push(marker);
        record.extend_from_slice(&body_len.to_le_bytes());
        record.extend_from_slice(&crc32fast::hash(body).to_le_bytes());
        record.extend_from_slice(body);

        let mut writer = self.writer.lock();
        let start = writer.position;
        if let Err(e) = writer.file.write_all(&record) {
            // Drop whatever part of the record reached the file.
            let _ = writer.file.set_len(start);
            let _ = writer.file.seek(SeekFrom::Start(start));
            return Err(e.into());
        }
        if self.sync_writes {
            writer.file.sync_data()?;
        }

        writer.position = start + RECORD_HEADER_LEN + u64::from(body_len);
        publish(start + RECORD_HEADER_LEN);
        Ok(())
    }

    fn read_slot(&self, slot: Slot) -> Result<Bytes> {
        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(slot.offset))?;
        let mut buf = vec![0u8; slot.len as usize];
        reader.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

impl KvStore for LogKvStore {
    fn put_batch(&self, entries: Vec<(String, Bytes)>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut body = Vec::new();
        let mut value_offsets = Vec::with_capacity(entries.len());
        put_len(&mut body, entries.len())?;
        for (key, value) in &entries {
            put_len(&mut body, key.len())?;
            body.extend_from_slice(key.as_bytes());
            put_len(&mut body, value.len())?;
            value_offsets.push(body.len() as u64);
            body.extend_from_slice(value);
        }

        self.append(MARKER_PUT, &body, |body_offset| {
            let mut index = self.index.write();
            for ((key, value), value_at) in entries.into_iter().zip(value_offsets) {
                index.insert(
                    key,
                    Slot {
                        offset: body_offset + value_at,
                        len: value.len() as u32,
                    },
                );
            }
        })
    }

    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let slot = self.index.read().get(key).copied();
        slot.map(|slot| self.read_slot(slot)).transpose()
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Bytes)>> {
        let slots: Vec<(String, Slot)> = self
            .index
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, slot)| (key.clone(), *slot))
            .collect();
        slots
            .into_iter()
            .map(|(key, slot)| Ok((key, self.read_slot(slot)?)))
            .collect()
    }

    fn delete_batch(&self, keys: &[String]) -> Result<()> {
        let live: Vec<&String> = {
            let index = self.index.read();
            keys.iter().filter(|k| index.contains_key(k.as_str())).collect()
        };
        if live.is_empty() {
            return Ok(());
        }

        let mut body = Vec::new();
        put_len(&mut body, live.len())?;
        for key in &live {
            put_len(&mut body, key.len())?;
            body.extend_from_slice(key.as_bytes());
        }
        self.append(MARKER_DELETE, &body, |_| {
            let mut index = self.index.write();
            for key in live {
                index.remove(key);
            }
        })
    }
}

impl std::fmt::Debug for LogKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogKvStore")
            .field("path", &self.path)
            .field("keys", &self.len())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

fn put_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| Error::Storage(format!("length {len} exceeds u32")))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    let raw = data.get(pos..pos.checked_add(4)?)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

/// Reads a whole record at `pos`. `None` means a torn or corrupt record.
fn read_record(data: &[u8], pos: usize) -> Option<(u8, &[u8], usize)> {
    let marker = *data.get(pos)?;
    let body_len = read_u32(data, pos + 1)? as usize;
    let crc = read_u32(data, pos + 5)?;
    let start = pos + RECORD_HEADER_LEN as usize;
    let end = start.checked_add(body_len)?;
    let body = data.get(start..end)?;
    (crc32fast::hash(body) == crc).then_some((marker, body, end))
}

fn read_key(body: &[u8], pos: &mut usize) -> Option<String> {
    let len = read_u32(body, *pos)? as usize;
    *pos += 4;
    let raw = body.get(*pos..pos.checked_add(len)?)?;
    *pos += len;
    String::from_utf8(raw.to_vec()).ok()
}

/// Parses a put body into `(key, value offset within body, value len)`.
fn parse_put(body: &[u8]) -> Option<Vec<(String, usize, u32)>> {
    let count = read_u32(body, 0)? as usize;
    let mut pos = 4;
    let mut entries = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        let key = read_key(body, &mut pos)?;
        let len = read_u32(body, pos)?;
        pos += 4;
        let value_at = pos;
        pos = pos.checked_add(len as usize)?;
        if pos > body.len() {
            return None;
        }
        entries.push((key, value_at, len));
    }
    Some(entries)
}

fn parse_delete(body: &[u8]) -> Option<Vec<String>> {
    let count = read_u32(body, 0)? as usize;
    let mut pos = 4;
    let mut keys = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        keys.push(read_key(body, &mut pos)?);
    }
    Some(keys)
}
