//! Auto-invest queue.
//!
//! Unlike the batched queues, every (chain, wallet, campaign) has its own row
//! and many rows can ride on one invest transaction. Terminal rows are moved
//! to `auto_invest_task_history` instead of being kept with a FAILED status.

mod queue;
mod store;

pub use queue::{AutoInvestQueue, AutoInvestTick};
pub use store::AutoInvestStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::error::QueueError;
use crate::gateway::InvestmentRecord;
use crate::providers::from_millis;
use crate::types::{ChainId, ContractAddress, TokenAmount, TransactionHash, WalletAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoInvestStatus {
    Pending,
    InProcess,
}

impl AutoInvestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoInvestStatus::Pending => "PENDING",
            AutoInvestStatus::InProcess => "IN_PROCESS",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(AutoInvestStatus::Pending),
            "IN_PROCESS" => Some(AutoInvestStatus::InProcess),
            _ => None,
        }
    }
}

/// Terminal outcome recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryStatus {
    Success,
    Failure,
    Expired,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Success => "SUCCESS",
            HistoryStatus::Failure => "FAILURE",
            HistoryStatus::Expired => "EXPIRED",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "SUCCESS" => Some(HistoryStatus::Success),
            "FAILURE" => Some(HistoryStatus::Failure),
            "EXPIRED" => Some(HistoryStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoInvestTask {
    pub id: Uuid,
    pub chain_id: ChainId,
    pub wallet: WalletAddress,
    pub campaign: ContractAddress,
    pub amount: TokenAmount,
    pub status: AutoInvestStatus,
    pub tx_hash: Option<TransactionHash>,
    pub created_at: DateTime<Utc>,
}

impl AutoInvestTask {
    pub fn record(&self) -> InvestmentRecord {
        InvestmentRecord {
            investor: self.wallet.clone(),
            campaign: self.campaign.clone(),
            amount: self.amount,
        }
    }
}

/// One submitted invest call, shared by every task it carried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoInvestTransaction {
    pub id: Uuid,
    pub chain_id: ChainId,
    pub tx_hash: TransactionHash,
    pub created_at: DateTime<Utc>,
}

/// Ledger row, keyed by the id of the task it replaced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub chain_id: ChainId,
    pub wallet: WalletAddress,
    pub campaign: ContractAddress,
    pub amount: TokenAmount,
    pub status: HistoryStatus,
    pub tx_hash: Option<TransactionHash>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct AutoInvestTaskRow {
    pub id: String,
    pub chain_id: i64,
    pub wallet_address: String,
    pub campaign_address: String,
    pub amount: String,
    pub status: String,
    pub tx_hash: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct AutoInvestTransactionRow {
    pub id: String,
    pub chain_id: i64,
    pub tx_hash: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct HistoryRow {
    pub id: String,
    pub chain_id: i64,
    pub wallet_address: String,
    pub campaign_address: String,
    pub amount: String,
    pub status: String,
    pub tx_hash: Option<String>,
    pub created_at: i64,
    pub completed_at: i64,
}

fn parse_id(value: &str) -> Result<Uuid, QueueError> {
    Uuid::parse_str(value).map_err(|e| QueueError::Corrupt(format!("auto-invest id {}: {}", value, e)))
}

fn parse_amount(id: Uuid, value: &str) -> Result<TokenAmount, QueueError> {
    value
        .parse()
        .map_err(|e| QueueError::Corrupt(format!("auto-invest {}: amount {}: {}", id, value, e)))
}

impl TryFrom<AutoInvestTaskRow> for AutoInvestTask {
    type Error = QueueError;

    fn try_from(row: AutoInvestTaskRow) -> Result<Self, Self::Error> {
        let id = parse_id(&row.id)?;
        let status = AutoInvestStatus::parse(&row.status)
            .ok_or_else(|| QueueError::Corrupt(format!("auto-invest {}: status {}", id, row.status)))?;

        Ok(AutoInvestTask {
            id,
            chain_id: ChainId(row.chain_id),
            wallet: WalletAddress::new(row.wallet_address),
            campaign: ContractAddress::new(row.campaign_address),
            amount: parse_amount(id, &row.amount)?,
            status,
            tx_hash: row.tx_hash.map(TransactionHash::new),
            created_at: from_millis(row.created_at),
        })
    }
}

impl TryFrom<AutoInvestTransactionRow> for AutoInvestTransaction {
    type Error = QueueError;

    fn try_from(row: AutoInvestTransactionRow) -> Result<Self, Self::Error> {
        Ok(AutoInvestTransaction {
            id: parse_id(&row.id)?,
            chain_id: ChainId(row.chain_id),
            tx_hash: TransactionHash::new(row.tx_hash),
            created_at: from_millis(row.created_at),
        })
    }
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = QueueError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let id = parse_id(&row.id)?;
        let status = HistoryStatus::parse(&row.status)
            .ok_or_else(|| QueueError::Corrupt(format!("auto-invest {}: outcome {}", id, row.status)))?;

        Ok(HistoryEntry {
            id,
            chain_id: ChainId(row.chain_id),
            wallet: WalletAddress::new(row.wallet_address),
            campaign: ContractAddress::new(row.campaign_address),
            amount: parse_amount(id, &row.amount)?,
            status,
            tx_hash: row.tx_hash.map(TransactionHash::new),
            created_at: from_millis(row.created_at),
            completed_at: from_millis(row.completed_at),
        })
    }
}
