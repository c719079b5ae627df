//! Core data types for the key-value store.
//!
//! Values are opaque structured documents (arbitrary JSON); the store never
//! looks inside them. See `Record` for the durable, on-log form of a write
//! and `Entry` for its in-memory counterpart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The reserved collection name used when a caller supplies an empty
/// collection parameter.
pub const DEFAULT_COLLECTION: &str = "default";

/// Normalize an HTTP/RPC-supplied collection name: empty becomes `default`.
pub fn normalize_collection(name: &str) -> &str {
    if name.is_empty() {
        DEFAULT_COLLECTION
    } else {
        name
    }
}

/// One line in a collection's log file: the durable form of a write.
///
/// Written once, never rewritten. Tombstones are read at startup (they
/// delete the key from the in-memory index) but no operation in this store
/// emits one — there is no delete API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub collection: String,
    pub key: String,
    pub value: JsonValue,
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub tombstone: bool,
}

/// The in-memory index's mapping target: the latest value for a key.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: JsonValue,
}
