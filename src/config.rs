//! Startup configuration: node role, listen ports, peer list, data directory.

use std::net::SocketAddr;
use std::path::PathBuf;

/// A node's replication role. Static for the process lifetime — there is no
/// leader election or failover in this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Backup,
}

impl Role {
    pub fn is_primary(&self) -> bool {
        matches!(self, Role::Primary)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Role::Primary),
            "backup" => Ok(Role::Backup),
            other => Err(format!("unknown role '{}': expected 'primary' or 'backup'", other)),
        }
    }
}

/// Server configuration, built from command-line flags (see `Config::from_args`).
#[derive(Debug, Clone)]
pub struct Config {
    /// `primary` or `backup`.
    pub role: Role,
    /// Port for the public HTTP API.
    pub http_port: u16,
    /// Port for inter-node RPC (gRPC).
    pub grpc_port: u16,
    /// `host:port` addresses of backup peers (primary only).
    pub peers: Vec<SocketAddr>,
    /// On-disk directory for collection logs.
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Primary,
            http_port: 8080,
            grpc_port: 50051,
            peers: Vec::new(),
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Config {
    /// Parse `argv`-style flags, overriding defaults. Mirrors the simple
    /// `--flag value` style used throughout this codebase's ancestry rather
    /// than pulling in a flag-parsing crate for five options.
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<Self, String> {
        let mut config = Config::default();
        let args: Vec<String> = args.into_iter().collect();
        let mut i = 1; // args[0] is the binary name
        while i < args.len() {
            match args[i].as_str() {
                "--role" => {
                    i += 1;
                    let value = args.get(i).ok_or("--role requires a value")?;
                    config.role = value.parse()?;
                }
                "--http-port" => {
                    i += 1;
                    let value = args.get(i).ok_or("--http-port requires a value")?;
                    config.http_port = value.parse().map_err(|e| format!("invalid --http-port: {}", e))?;
                }
                "--grpc-port" => {
                    i += 1;
                    let value = args.get(i).ok_or("--grpc-port requires a value")?;
                    config.grpc_port = value.parse().map_err(|e| format!("invalid --grpc-port: {}", e))?;
                }
                "--peers" => {
                    i += 1;
                    let value = args.get(i).ok_or("--peers requires a value")?;
                    config.peers = parse_peers(value)?;
                }
                "--data" => {
                    i += 1;
                    let value = args.get(i).ok_or("--data requires a value")?;
                    config.data_dir = PathBuf::from(value);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                other => return Err(format!("unrecognized argument: {}", other)),
            }
            i += 1;
        }
        Ok(config)
    }
}

fn parse_peers(raw: &str) -> Result<Vec<SocketAddr>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<SocketAddr>()
                .or_else(|_| resolve_host_port(s))
                .map_err(|e| format!("invalid peer address '{}': {}", s, e))
        })
        .collect()
}

/// Peers are configured as `host:port`, which may name a hostname rather
/// than a literal IP (e.g. a container DNS name). Resolve via the standard
/// library's synchronous resolver at startup, matching the one-shot
/// connection-lifecycle model in `replication::coordinator`.
fn resolve_host_port(s: &str) -> std::io::Result<SocketAddr> {
    use std::net::ToSocketAddrs;
    s.to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address found"))
}

fn print_help() {
    println!("kvstore - a replicated key-value store");
    println!();
    println!("Usage: kvstore [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --role ROLE         Node role: primary or backup (default: primary)");
    println!("  --http-port PORT    Port for the public HTTP API (default: 8080)");
    println!("  --grpc-port PORT    Port for inter-node RPC (default: 50051)");
    println!("  --peers LIST        Comma-separated host:port list of backups (primary only)");
    println!("  --data DIR          Data directory (default: ./data)");
    println!("  -h, --help          Show this help");
}
