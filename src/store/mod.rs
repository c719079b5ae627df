//! The append-only collection store and the 2PC transaction table it backs.

pub mod collection;
pub mod txn;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::types::normalize_collection;
use collection::Collection;
use txn::TxnTable;

/// The aggregate: directory path, the collections registry, and the
/// transaction table. The registry and the transaction table each have
/// their own lock; no routine ever holds both, and no routine acquires two
/// collection locks simultaneously.
pub struct Store {
    dir: PathBuf,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    pub txns: Arc<TxnTable>,
}

impl Store {
    /// Open the data directory, discovering every `*.jsonl` file as a
    /// collection, and always ensure `default` exists.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut collections = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let name = match path.file_stem().and_then(|s| s.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            let collection = Collection::open(&dir, &name)?;
            collections.insert(name, Arc::new(collection));
        }

        let store = Arc::new(Self {
            dir,
            collections: RwLock::new(collections),
            txns: TxnTable::new(),
        });
        store.collection(crate::types::DEFAULT_COLLECTION)?;

        txn::spawn_reaper(store.txns.clone());

        Ok(store)
    }

    /// Look up a collection by name, opening (and registering) it on first
    /// reference. The registry lock is held only briefly.
    fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        if let Some(col) = self.collections.read().unwrap().get(name) {
            return Ok(col.clone());
        }
        let mut collections = self.collections.write().unwrap();
        if let Some(col) = collections.get(name) {
            return Ok(col.clone());
        }
        let col = Arc::new(Collection::open(&self.dir, name)?);
        collections.insert(name.to_string(), col.clone());
        Ok(col)
    }

    /// Append a write to `collection` (normalized from empty to `default`).
    pub fn put(&self, collection: &str, key: &str, value: JsonValue) -> Result<()> {
        let name = normalize_collection(collection);
        self.collection(name)?.put(key, value)
    }

    /// Look up the latest value for `key` in `collection`.
    pub fn get(&self, collection: &str, key: &str) -> Option<JsonValue> {
        let name = normalize_collection(collection);
        self.collection(name).ok()?.get(key)
    }

    /// Every `(collection, key, value)` triple across the chosen
    /// collection(s) whose key starts with `prefix`. If `collection` is
    /// empty, every known collection is scanned.
    pub fn list(&self, collection: &str, prefix: &str) -> Vec<(String, String, JsonValue)> {
        let targets: Vec<Arc<Collection>> = if collection.is_empty() {
            self.collections.read().unwrap().values().cloned().collect()
        } else {
            match self.collection(normalize_collection(collection)) {
                Ok(col) => vec![col],
                Err(_) => Vec::new(),
            }
        };

        targets
            .into_iter()
            .flat_map(|col| {
                let name = col.name().to_string();
                col.list(prefix)
                    .into_iter()
                    .map(move |(k, v)| (name.clone(), k, v))
            })
            .collect()
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }
}
