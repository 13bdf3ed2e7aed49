//! Error types for the queue engine

use crate::types::{ChainId, ContractAddress};

/// Errors surfaced by the store, the enqueue path, or a worker tick.
///
/// Gateway failures inside a tick never reach this type; they become
/// state-machine transitions instead.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Chain {0} is not supported by the {1} queue")]
    UnsupportedChain(ChainId, &'static str),
    #[error("{0} queue is disabled")]
    QueueDisabled(&'static str),
    #[error("Campaign {campaign} on chain {chain_id} does not support auto-invest (version: {version})")]
    UnsupportedContractVersion {
        chain_id: ChainId,
        campaign: ContractAddress,
        version: String,
    },
    #[error("Amount overflow for {0}")]
    AmountOverflow(String),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Errors raised by a [`ChainGateway`](crate::gateway::ChainGateway) implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing configuration for chain {0}")]
    MissingConfig(ChainId),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T, E = QueueError> = std::result::Result<T, E>;
