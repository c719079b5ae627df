//! A single collection: its append-only log file, write buffer, and
//! in-memory key -> latest-value index.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value as JsonValue;

use crate::error::{KvError, Result};
use crate::types::{Entry, Record};

/// Buffer size for the collection's append writer, matching the "buffered
/// append then flush on every record" durability contract.
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

struct Inner {
    writer: BufWriter<File>,
    index: HashMap<String, Entry>,
    lines: usize,
    last_flush: Instant,
}

/// One named, independent key space: its own log file and index, guarded by
/// its own reader/writer lock. Writers are strictly exclusive; readers may
/// run concurrently with each other.
pub struct Collection {
    name: String,
    state: RwLock<Inner>,
}

impl Collection {
    /// Open (creating if absent) the log file at `dir/<name>.jsonl`, replay
    /// it to rebuild the in-memory index, and seek to end for appending.
    ///
    /// Malformed lines are silently skipped: they are tolerated, not
    /// repaired.
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        let path = log_path(dir, name);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        file.seek(SeekFrom::Start(0))?;
        let mut index = HashMap::new();
        let mut lines = 0usize;
        let reader = BufReader::new(&file);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if record.tombstone {
                index.remove(&record.key);
            } else {
                index.insert(record.key, Entry { value: record.value });
            }
            lines += 1;
        }

        file.seek(SeekFrom::End(0))?;
        let writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

        Ok(Self {
            name: name.to_string(),
            state: RwLock::new(Inner {
                writer,
                index,
                lines,
                last_flush: Instant::now(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a record for `key`/`value`, flush, then update the index.
    /// The index is only updated after a successful flush, so a reader can
    /// never observe a half-written value.
    pub fn put(&self, key: &str, value: JsonValue) -> Result<()> {
        let record = Record {
            collection: self.name.clone(),
            key: key.to_string(),
            value: value.clone(),
            ts: Utc::now(),
            tombstone: false,
        };
        let line = serde_json::to_string(&record)?;
        if line.contains('\n') {
            // serde_json never emits raw newlines inside a compact
            // encoding, but this is the invariant the on-disk format
            // depends on, so check it rather than silently corrupt the log.
            return Err(KvError::Json(
                "record serialization contained an embedded newline".to_string(),
            ));
        }

        let mut state = self.state.write().unwrap();
        state.writer.write_all(line.as_bytes())?;
        state.writer.write_all(b"\n")?;
        state.writer.flush()?;
        state.last_flush = Instant::now();
        state.index.insert(key.to_string(), Entry { value });
        state.lines += 1;
        Ok(())
    }

    /// Look up the latest value for `key`. Never touches the file.
    pub fn get(&self, key: &str) -> Option<JsonValue> {
        let state = self.state.read().unwrap();
        state.index.get(key).map(|e| e.value.clone())
    }

    /// Every `(key, value)` pair whose key starts with `prefix`. Order is
    /// unspecified (the index is unordered) — an accepted contract.
    pub fn list(&self, prefix: &str) -> Vec<(String, JsonValue)> {
        let state = self.state.read().unwrap();
        state
            .index
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Number of non-blank lines replayed/appended so far. Exposed for
    /// testing the "log line count equals writes plus startup tombstones"
    /// invariant.
    #[cfg(test)]
    pub fn line_count(&self) -> usize {
        self.state.read().unwrap().lines
    }
}

fn log_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.jsonl", name))
}
