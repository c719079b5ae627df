//! kvstore - a small replicated key-value store.
//!
//! A primary node accepts writes over HTTP and disseminates them to a fixed
//! set of backup nodes via two-phase commit. Reads are served locally from
//! an in-memory index backed by a per-collection append-only log.

use log::info;

use kvstore::{Config, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_args(std::env::args()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    info!("starting kvstore as {:?}", config.role);

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
