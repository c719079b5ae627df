//! Error types for the key-value store.
//!
//! A single flat error enum covers every subsystem (store, transaction
//! table, replication, HTTP), the way a small service's error type usually
//! does rather than each module minting its own.

use std::fmt;
use std::io;

/// Unified error type for store, transaction-table, replication, and HTTP
/// operations.
#[derive(Debug)]
pub enum KvError {
    /// I/O error (file operations, network).
    Io(io::Error),
    /// A record or HTTP body failed to (de)serialize as JSON.
    Json(String),
    /// A transaction id was used in a way its current state doesn't allow,
    /// e.g. `Commit` on an id that isn't `prepared`, or a `Prepare` for an
    /// id that's already `committed`/`aborted`.
    Transaction(String),
    /// At least one peer voted no, or an RPC to a peer failed outright,
    /// during the prepare phase.
    PeerDissent(String),
    /// A gRPC channel to a peer could not be used.
    Rpc(String),
}

impl fmt::Display for KvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvError::Io(e) => write!(f, "{}", e),
            KvError::Json(msg) => write!(f, "{}", msg),
            KvError::Transaction(msg) => write!(f, "{}", msg),
            KvError::PeerDissent(msg) => write!(f, "{}", msg),
            KvError::Rpc(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for KvError {}

impl From<io::Error> for KvError {
    fn from(e: io::Error) -> Self {
        KvError::Io(e)
    }
}

impl From<serde_json::Error> for KvError {
    fn from(e: serde_json::Error) -> Self {
        KvError::Json(e.to_string())
    }
}

impl From<tonic::transport::Error> for KvError {
    fn from(e: tonic::transport::Error) -> Self {
        KvError::Rpc(e.to_string())
    }
}

impl From<tonic::Status> for KvError {
    fn from(s: tonic::Status) -> Self {
        KvError::Rpc(s.message().to_string())
    }
}

/// Result type alias for key-value store operations.
pub type Result<T> = std::result::Result<T, KvError>;
