//! Command line configuration for the queue worker

use clap::Parser;
use std::path::PathBuf;

/// Blockchain task queue worker
#[derive(Parser, Debug, Clone)]
#[command(name = "chain-queue-worker")]
#[command(about = "Batches and submits whitelist, faucet and auto-invest transactions", long_about = None)]
pub struct Config {
    /// Queue and chain configuration file (TOML)
    #[arg(long, env = "QUEUE_CONFIG", default_value = "queue.toml")]
    pub config: PathBuf,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://queue.db")]
    pub database_url: String,

    /// Max pooled database connections
    #[arg(long, env = "MAX_CONNECTIONS", default_value = "5")]
    pub max_connections: u32,

    /// Name this process stamps on the rows it locks. Defaults to a random id.
    #[arg(long, env = "WORKER_ID")]
    pub worker_id: Option<String>,

    /// Timeout for node and relayer requests in seconds
    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value = "30")]
    pub rpc_timeout_secs: u64,
}

impl Config {
    pub fn worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()))
    }
}
