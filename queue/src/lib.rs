//! Durable blockchain task queues
//!
//! Whitelisting, faucet funding and auto-invest requests are accumulated in
//! SQLite, batched into tasks, submitted through a [`ChainGateway`] and
//! tracked until mined. Several worker processes can share one database.

pub mod accumulator;
pub mod auto_invest;
pub mod config;
pub mod db;
pub mod error;
pub mod faucet;
pub mod gateway;
pub mod providers;
pub mod scheduler;
pub mod shutdown;
pub mod task;
pub mod task_store;
pub mod types;
pub mod whitelist;
pub mod worker;

pub use accumulator::PendingItems;
pub use auto_invest::{
    AutoInvestQueue, AutoInvestStatus, AutoInvestStore, AutoInvestTask, AutoInvestTick,
    AutoInvestTransaction, HistoryEntry, HistoryStatus,
};
pub use config::{AutoInvestSettings, ChainConfig, QueueConfig, QueueSettings};
pub use error::{ConfigError, GatewayError, QueueError, Result};
pub use faucet::FaucetQueue;
pub use gateway::{ChainGateway, InvestmentRecord};
pub use providers::{Clock, IdProvider, ManualClock, RandomIds, SequentialIds, SystemClock};
pub use scheduler::{run_scheduled, Schedule};
pub use shutdown::ShutdownSignal;
pub use task::{QueueKind, Task, TaskPayload, TaskStatus};
pub use task_store::TaskStore;
pub use types::{ChainId, ContractAddress, ContractVersion, TokenAmount, TransactionHash, WalletAddress};
pub use whitelist::WhitelistQueue;
pub use worker::{QueueWorker, TaskSubmitter, TickOutcome};
