use std::sync::Arc;

use log::info;
use tokio::task::JoinSet;

pub mod config;
pub mod error;
pub mod http;
pub mod replication;
pub mod store;
pub mod types;

pub use config::Config;

use error::Result;
use replication::coordinator::Coordinator;
use replication::participant::Participant;
use replication::pb::replication_server::ReplicationServer;
use store::Store;

/// The running node: owns the store and, depending on role, a coordinator
/// for driving 2PC. Both the gRPC participant surface and the HTTP façade
/// are always served, regardless of role — a backup still answers
/// Prepare/Commit/Abort, and still serves reads over HTTP.
pub struct Server {
    config: Config,
    store: Arc<Store>,
    coordinator: Option<Arc<Coordinator>>,
}

impl Server {
    /// Open the store and, for a primary, connect to every configured peer.
    pub async fn new(config: Config) -> Result<Self> {
        let store = Store::open(&config.data_dir)?;

        let coordinator = if config.role.is_primary() {
            let coordinator = Coordinator::connect(store.clone(), &config.peers).await;
            info!("connected to {} of {} configured peer(s)", coordinator.peer_count(), config.peers.len());
            Some(Arc::new(coordinator))
        } else {
            None
        };

        Ok(Self { config, store, coordinator })
    }

    /// Run the gRPC participant server and the HTTP façade concurrently.
    /// Returns only if one of them exits (which, barring a bind failure,
    /// means the process should stop).
    pub async fn run(self) -> Result<()> {
        let grpc_addr = format!("0.0.0.0:{}", self.config.grpc_port)
            .parse()
            .map_err(|e| error::KvError::Rpc(format!("invalid grpc bind address: {}", e)))?;
        let http_addr = format!("0.0.0.0:{}", self.config.http_port);

        let participant = Participant::new(self.store.clone());
        let grpc_server = tonic::transport::Server::builder()
            .add_service(ReplicationServer::new(participant))
            .serve(grpc_addr);

        let http_state = Arc::new(http::AppState {
            role: self.config.role,
            store: self.store.clone(),
            coordinator: self.coordinator.clone(),
        });
        let http_router = http::router(http_state);

        info!("gRPC participant listening on {}", grpc_addr);
        info!("HTTP facade listening on {}", http_addr);

        let mut tasks = JoinSet::new();
        tasks.spawn(async move {
            grpc_server.await.map_err(|e| error::KvError::Rpc(e.to_string()))
        });
        tasks.spawn(async move {
            let listener = tokio::net::TcpListener::bind(&http_addr)
                .await
                .map_err(error::KvError::Io)?;
            axum::serve(listener, http_router)
                .await
                .map_err(error::KvError::Io)
        });

        // Either server exiting (they shouldn't, outside of a bind failure or
        // shutdown) ends the process; surface its error.
        if let Some(result) = tasks.join_next().await {
            result.map_err(|e| error::KvError::Rpc(e.to_string()))??;
        }
        Ok(())
    }
}
