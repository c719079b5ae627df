//! The primary-side 2PC driver: fans Prepare/Commit/Abort out to every
//! configured backup peer and decides the outcome of each externally
//! accepted write.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tonic::transport::{Channel, Endpoint};

use crate::error::{KvError, Result};
use crate::store::Store;

use super::pb::replication_client::ReplicationClient;
use super::pb::{AbortRequest, CommitRequest, PrepareRequest};

/// Prepare-phase deadline.
const PREPARE_TIMEOUT: Duration = Duration::from_secs(5);
/// Commit-phase deadline.
const COMMIT_TIMEOUT: Duration = Duration::from_secs(5);
/// Abort fan-out deadline.
const ABORT_TIMEOUT: Duration = Duration::from_secs(3);
/// How many times to retry a peer connection at startup.
const CONNECT_ATTEMPTS: u32 = 10;
/// Backoff between connection attempts.
const CONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// The outcome of a successfully-committed local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Number of peers that acknowledged the commit. Best-effort: partial
    /// commit failures do not roll the primary back.
    pub committed_to: usize,
}

/// Drives two-phase commit for every externally accepted write. Owns one
/// connected gRPC channel per live peer; peers that fail every connection
/// attempt at startup are dropped for the process lifetime.
pub struct Coordinator {
    store: Arc<Store>,
    peers: Vec<ReplicationClient<Channel>>,
    started_at: Instant,
}

impl Coordinator {
    /// Connect to every configured peer, retrying each up to
    /// `CONNECT_ATTEMPTS` times. A primary configured with zero peers is
    /// legal and degrades to local-only writes.
    pub async fn connect(store: Arc<Store>, peer_addrs: &[SocketAddr]) -> Self {
        let mut peers = Vec::with_capacity(peer_addrs.len());
        for addr in peer_addrs {
            if let Some(client) = connect_with_retry(*addr).await {
                log::info!("connected to backup peer: {}", addr);
                peers.push(client);
            } else {
                log::warn!("failed to connect to peer {} after retries: excluding it", addr);
            }
        }
        Self {
            store,
            peers,
            started_at: Instant::now(),
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn mint_txn_id(&self) -> String {
        // Monotonic nanoseconds since the coordinator started is sufficient
        // for uniqueness within the primary's lifetime.
        let nanos = self.started_at.elapsed().as_nanos();
        format!("txn-{}", nanos)
    }

    /// Drive 2PC for one write. On success, the write is durable on the
    /// primary and `committed_to` peers. On failure, the primary's state is
    /// unaffected (peer dissent) or was never advanced (local apply
    /// failure).
    pub async fn write(&self, collection: &str, key: &str, value: JsonValue) -> Result<WriteOutcome> {
        let txn_id = self.mint_txn_id();
        log::info!("[2PC] starting transaction {}", txn_id);

        let value_bytes = serde_json::to_vec(&value)?;

        let votes = self.prepare_all(&txn_id, collection, key, &value_bytes).await;
        let all_yes = votes.iter().all(|v| *v);

        if !all_yes {
            log::info!("[2PC] at least one peer voted no, aborting transaction {}", txn_id);
            self.abort_all(&txn_id).await;
            return Err(KvError::PeerDissent(format!(
                "transaction {} aborted: not all replicas agreed",
                txn_id
            )));
        }

        log::info!("[2PC] all peers voted yes, committing transaction {}", txn_id);
        if let Err(e) = self.store.put(collection, key, value) {
            log::info!("[2PC] primary write failed for transaction {}: {}", txn_id, e);
            self.abort_all(&txn_id).await;
            return Err(e);
        }

        let committed_to = self.commit_all(&txn_id).await;
        log::info!("[2PC] transaction {} committed to {} peer(s)", txn_id, committed_to);
        Ok(WriteOutcome { committed_to })
    }

    async fn prepare_all(
        &self,
        txn_id: &str,
        collection: &str,
        key: &str,
        value: &[u8],
    ) -> Vec<bool> {
        let futures = self.peers.iter().cloned().map(|mut client| {
            let request = PrepareRequest {
                transaction_id: txn_id.to_string(),
                collection: collection.to_string(),
                key: key.to_string(),
                value: value.to_vec(),
            };
            async move {
                match tokio::time::timeout(PREPARE_TIMEOUT, client.prepare(request)).await {
                    Ok(Ok(resp)) => resp.into_inner().vote,
                    Ok(Err(status)) => {
                        log::info!("[2PC] prepare RPC failed: {}", status.message());
                        false
                    }
                    Err(_) => {
                        log::info!("[2PC] prepare RPC timed out");
                        false
                    }
                }
            }
        });
        futures::future::join_all(futures).await
    }

    async fn commit_all(&self, txn_id: &str) -> usize {
        let futures = self.peers.iter().cloned().map(|mut client| {
            let request = CommitRequest { transaction_id: txn_id.to_string() };
            async move {
                match tokio::time::timeout(COMMIT_TIMEOUT, client.commit(request)).await {
                    Ok(Ok(resp)) => resp.into_inner().success,
                    Ok(Err(status)) => {
                        log::info!("[2PC] commit RPC failed: {}", status.message());
                        false
                    }
                    Err(_) => {
                        log::info!("[2PC] commit RPC timed out");
                        false
                    }
                }
            }
        });
        futures::future::join_all(futures)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count()
    }

    async fn abort_all(&self, txn_id: &str) {
        let futures = self.peers.iter().cloned().map(|mut client| {
            let request = AbortRequest { transaction_id: txn_id.to_string() };
            async move {
                let _ = tokio::time::timeout(ABORT_TIMEOUT, client.abort(request)).await;
            }
        });
        futures::future::join_all(futures).await;
    }
}

async fn connect_with_retry(addr: SocketAddr) -> Option<ReplicationClient<Channel>> {
    let uri = format!("http://{}", addr);
    for attempt in 1..=CONNECT_ATTEMPTS {
        let endpoint = match Endpoint::from_shared(uri.clone()) {
            Ok(e) => e,
            Err(e) => {
                log::warn!("invalid peer address '{}': {}", addr, e);
                return None;
            }
        };
        match endpoint.connect().await {
            Ok(channel) => return Some(ReplicationClient::new(channel)),
            Err(e) => {
                log::info!("waiting for peer {} to be ready (attempt {}): {}", addr, attempt, e);
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
        }
    }
    None
}
