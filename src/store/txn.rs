//! The process-wide transaction table: pending 2PC writes on a participant,
//! and the background reaper that drops stale ones.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;

use crate::error::{KvError, Result};

/// How often the reaper wakes up to sweep stale transactions.
const REAP_INTERVAL: Duration = Duration::from_secs(30);
/// A transaction older than this, regardless of state, is dropped.
const STALE_AGE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Prepared,
    Committed,
}

impl std::fmt::Display for TxnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxnState::Prepared => write!(f, "prepared"),
            TxnState::Committed => write!(f, "committed"),
        }
    }
}

struct Transaction {
    collection: String,
    key: String,
    value: JsonValue,
    state: TxnState,
    created_at: Instant,
}

/// A process-wide mapping from transaction id to pending transaction
/// record. Owned exclusively by this table: the only way its entries are
/// read, mutated, or applied to the store is through `prepare`/`commit`/
/// `abort`/the reaper.
pub struct TxnTable {
    transactions: RwLock<HashMap<String, Transaction>>,
}

impl TxnTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            transactions: RwLock::new(HashMap::new()),
        })
    }

    /// Record a prepared write. A repeated `Prepare` for an id already
    /// `prepared` succeeds idempotently — it tolerates a retransmitted RPC
    /// without the coordinator having to distinguish new from retry. Any
    /// other pre-existing state is a conflict.
    pub fn prepare(&self, id: &str, collection: &str, key: &str, value: JsonValue) -> Result<()> {
        let mut table = self.transactions.write().unwrap();
        match table.get(id) {
            Some(txn) if txn.state == TxnState::Prepared => Ok(()),
            Some(txn) => Err(KvError::Transaction(format!(
                "transaction {} already exists in state {}",
                id, txn.state
            ))),
            None => {
                table.insert(
                    id.to_string(),
                    Transaction {
                        collection: collection.to_string(),
                        key: key.to_string(),
                        value,
                        state: TxnState::Prepared,
                        created_at: Instant::now(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Commit a prepared transaction: mark it `committed`, release the
    /// table lock, then invoke `apply` (the collection store's `put`) with
    /// the saved fields. The table lock is never held across `apply` — that
    /// would hold a global lock across file I/O. On success the entry is
    /// deleted; on failure it is left `committed`, observable only via the
    /// reaper.
    pub fn commit<F>(&self, id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&str, &str, JsonValue) -> Result<()>,
    {
        let (collection, key, value) = {
            let mut table = self.transactions.write().unwrap();
            let txn = table
                .get_mut(id)
                .ok_or_else(|| KvError::Transaction(format!("transaction {} not found", id)))?;
            if txn.state != TxnState::Prepared {
                return Err(KvError::Transaction(format!(
                    "transaction {} not in prepared state (current: {})",
                    id, txn.state
                )));
            }
            txn.state = TxnState::Committed;
            (txn.collection.clone(), txn.key.clone(), txn.value.clone())
        };

        apply(&collection, &key, value)?;

        self.transactions.write().unwrap().remove(id);
        Ok(())
    }

    /// Discard a prepared (or absent) transaction. Idempotent: aborting an
    /// id that doesn't exist succeeds. Never touches the store.
    pub fn abort(&self, id: &str) -> Result<()> {
        self.transactions.write().unwrap().remove(id);
        Ok(())
    }

    #[cfg(test)]
    fn contains(&self, id: &str) -> bool {
        self.transactions.read().unwrap().contains_key(id)
    }

    /// Remove every transaction older than `STALE_AGE`, unconditional on
    /// state. Without this, a crashed coordinator would wedge memory
    /// indefinitely; a legitimate commit racing the reap boundary simply
    /// sees "not found" and the caller retries at a higher level.
    fn reap(&self) {
        let mut table = self.transactions.write().unwrap();
        let before = table.len();
        table.retain(|_, txn| txn.created_at.elapsed() <= STALE_AGE);
        let removed = before - table.len();
        if removed > 0 {
            log::info!("reaped {} stale transaction(s)", removed);
        }
    }
}

/// Spawn the background reaper task on the current Tokio runtime.
pub fn spawn_reaper(table: Arc<TxnTable>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REAP_INTERVAL);
        loop {
            interval.tick().await;
            table.reap();
        }
    })
}
