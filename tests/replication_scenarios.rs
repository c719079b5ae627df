use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kvstore::error::KvError;
use kvstore::replication::coordinator::Coordinator;
use kvstore::replication::participant::Participant;
use kvstore::replication::pb::replication_server::{Replication, ReplicationServer};
use kvstore::replication::pb::{
    AbortRequest, AbortResponse, CommitRequest, CommitResponse, PrepareRequest, PrepareResponse,
    ReplicateRequest, ReplicateResponse,
};
use kvstore::store::Store;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

async fn spawn_backup() -> (TempDir, SocketAddr, Arc<Store>) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let participant = Participant::new(store.clone());
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(ReplicationServer::new(participant))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (dir, addr, store)
}

/// Spawns a bare-bones fake peer speaking the `Replication` service directly
/// (no `Store`/`TxnTable` behind it), for driving the coordinator's
/// peer-fan-out logic into specific vote/ack outcomes that a real
/// `Participant` wouldn't reliably reproduce.
async fn spawn_fake_peer<T: Replication>(service: T) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(ReplicationServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

/// Votes no on every Prepare, regardless of payload.
struct DissentingPeer;

#[tonic::async_trait]
impl Replication for DissentingPeer {
    async fn replicate(
        &self,
        _request: Request<ReplicateRequest>,
    ) -> Result<Response<ReplicateResponse>, Status> {
        Ok(Response::new(ReplicateResponse { success: false, error: "not supported".to_string() }))
    }

    async fn prepare(
        &self,
        _request: Request<PrepareRequest>,
    ) -> Result<Response<PrepareResponse>, Status> {
        Ok(Response::new(PrepareResponse { vote: false, error: "refused by policy".to_string() }))
    }

    async fn commit(
        &self,
        _request: Request<CommitRequest>,
    ) -> Result<Response<CommitResponse>, Status> {
        Ok(Response::new(CommitResponse { success: false, error: "nothing was prepared".to_string() }))
    }

    async fn abort(
        &self,
        _request: Request<AbortRequest>,
    ) -> Result<Response<AbortResponse>, Status> {
        Ok(Response::new(AbortResponse { success: true, error: String::new() }))
    }
}

/// Votes yes on every Prepare, then fails every Commit — simulating a peer
/// that was reachable during the prepare phase but drops out (crash, RPC
/// failure) before acknowledging the commit.
struct CommitFailingPeer;

#[tonic::async_trait]
impl Replication for CommitFailingPeer {
    async fn replicate(
        &self,
        _request: Request<ReplicateRequest>,
    ) -> Result<Response<ReplicateResponse>, Status> {
        Ok(Response::new(ReplicateResponse { success: true, error: String::new() }))
    }

    async fn prepare(
        &self,
        _request: Request<PrepareRequest>,
    ) -> Result<Response<PrepareResponse>, Status> {
        Ok(Response::new(PrepareResponse { vote: true, error: String::new() }))
    }

    async fn commit(
        &self,
        _request: Request<CommitRequest>,
    ) -> Result<Response<CommitResponse>, Status> {
        Err(Status::unavailable("peer vanished between prepare and commit"))
    }

    async fn abort(
        &self,
        _request: Request<AbortRequest>,
    ) -> Result<Response<AbortResponse>, Status> {
        Ok(Response::new(AbortResponse { success: true, error: String::new() }))
    }
}

#[tokio::test]
async fn local_write_no_peers_persists_across_restart() {
    let dir = TempDir::new().unwrap();

    {
        let store = Store::open(dir.path()).unwrap();
        let coordinator = Coordinator::connect(store.clone(), &[]).await;
        let outcome = coordinator
            .write("c1", "a", serde_json::json!({"n": 1}))
            .await
            .unwrap();
        assert_eq!(outcome.committed_to, 0);
        assert_eq!(store.get("c1", "a"), Some(serde_json::json!({"n": 1})));
    }

    let reopened = Store::open(dir.path()).unwrap();
    assert_eq!(reopened.get("c1", "a"), Some(serde_json::json!({"n": 1})));
}

#[tokio::test]
async fn unanimous_commit_reaches_both_backups() {
    let (_d1, addr1, backup1) = spawn_backup().await;
    let (_d2, addr2, backup2) = spawn_backup().await;

    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let coordinator = Coordinator::connect(store.clone(), &[addr1, addr2]).await;

    let outcome = coordinator
        .write("c1", "a", serde_json::json!({"n": 1}))
        .await
        .unwrap();
    assert_eq!(outcome.committed_to, 2);

    assert_eq!(backup1.get("c1", "a"), Some(serde_json::json!({"n": 1})));
    assert_eq!(backup2.get("c1", "a"), Some(serde_json::json!({"n": 1})));
}

/// Scenario 3: one peer votes no in Prepare. The write is aborted
/// everywhere and the primary's own log never advances.
#[tokio::test]
async fn a_dissenting_peer_aborts_the_write_everywhere() {
    let (_d1, addr1, healthy_backup) = spawn_backup().await;
    let dissenter = spawn_fake_peer(DissentingPeer).await;

    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let coordinator = Coordinator::connect(store.clone(), &[addr1, dissenter]).await;
    assert_eq!(coordinator.peer_count(), 2);

    let result = coordinator.write("c1", "a", serde_json::json!({"n": 1})).await;
    assert!(matches!(result, Err(KvError::PeerDissent(_))));

    assert_eq!(store.get("c1", "a"), None);
    assert_eq!(healthy_backup.get("c1", "a"), None);
}

/// Scenario 4: one peer is reachable through Prepare but fails during
/// Commit. The primary still commits locally and reports a partial
/// `committed_to` count; the write is not rolled back.
#[tokio::test]
async fn commit_phase_peer_failure_still_commits_locally_and_reports_partial_count() {
    let (_d1, addr1, healthy_backup) = spawn_backup().await;
    let flaky = spawn_fake_peer(CommitFailingPeer).await;

    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let coordinator = Coordinator::connect(store.clone(), &[addr1, flaky]).await;
    assert_eq!(coordinator.peer_count(), 2);

    let outcome = coordinator
        .write("c1", "a", serde_json::json!({"n": 1}))
        .await
        .unwrap();
    assert_eq!(outcome.committed_to, 1);

    assert_eq!(store.get("c1", "a"), Some(serde_json::json!({"n": 1})));
    assert_eq!(healthy_backup.get("c1", "a"), Some(serde_json::json!({"n": 1})));
}

#[tokio::test]
async fn prefix_list_returns_only_matching_keys() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    store.put("c1", "a/1", serde_json::json!(1)).unwrap();
    store.put("c1", "a/2", serde_json::json!(2)).unwrap();
    store.put("c1", "b/1", serde_json::json!(3)).unwrap();

    let mut matched: Vec<String> = store.list("c1", "a/").into_iter().map(|(_, k, _)| k).collect();
    matched.sort();
    assert_eq!(matched, vec!["a/1".to_string(), "a/2".to_string()]);
}

#[tokio::test]
async fn peer_prepared_then_never_committed_is_invisible_until_reaped() {
    let (_dir, _addr, backup) = spawn_backup().await;
    backup.txns.prepare("t1", "c1", "a", serde_json::json!(1)).unwrap();
    // A prepared-but-uncommitted transaction holds no effect on the index.
    assert_eq!(backup.get("c1", "a"), None);
}
