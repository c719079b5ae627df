//! The 2PC replication surface: the participant (backup-side RPC handler)
//! and the coordinator (primary-side protocol driver).

pub mod coordinator;
pub mod participant;

/// Generated gRPC client/server stubs and message types, compiled from
/// `proto/replication.proto` by `build.rs`.
pub mod pb {
    tonic::include_proto!("kvstore.replication");
}
