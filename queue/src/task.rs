//! Task rows and their status state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::error::QueueError;
use crate::providers::from_millis;
use crate::types::{ChainId, TransactionHash};

/// Which queue a row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Whitelist,
    Faucet,
    AutoInvest,
}

impl QueueKind {
    /// Column value
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Whitelist => "whitelist",
            QueueKind::Faucet => "faucet",
            QueueKind::AutoInvest => "auto_invest",
        }
    }

    /// Name used in log lines and scheduler names
    pub fn name(&self) -> &'static str {
        match self {
            QueueKind::Whitelist => "WhitelistQueue",
            QueueKind::Faucet => "FaucetQueue",
            QueueKind::AutoInvest => "AutoInvestQueue",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "whitelist" => Some(QueueKind::Whitelist),
            "faucet" => Some(QueueKind::Faucet),
            "auto_invest" => Some(QueueKind::AutoInvest),
            _ => None,
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    InProcess,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::InProcess => "IN_PROCESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATED" => Some(TaskStatus::Created),
            "IN_PROCESS" => Some(TaskStatus::InProcess),
            "COMPLETED" => Some(TaskStatus::Completed),
            "FAILED" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to resubmit a task
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Batched items, e.g. wallet addresses
    pub items: Vec<String>,
    /// Optional grouping key the batch was flushed under, e.g. an issuer
    pub grouping_key: Option<String>,
}

impl TaskPayload {
    pub fn new(items: Vec<String>, grouping_key: Option<String>) -> Self {
        Self { items, grouping_key }
    }
}

/// Snapshot of one `blockchain_task` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub queue: QueueKind,
    pub payload: TaskPayload,
    pub chain_id: ChainId,
    pub status: TaskStatus,
    pub tx_hash: Option<TransactionHash>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Reference time for the mining timeout
    pub fn last_change(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct TaskRow {
    pub id: String,
    pub queue: String,
    pub items: String,
    pub grouping_key: Option<String>,
    pub chain_id: i64,
    pub status: String,
    pub tx_hash: Option<String>,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

impl TryFrom<TaskRow> for Task {
    type Error = QueueError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| QueueError::Corrupt(format!("task id {}: {}", row.id, e)))?;
        let queue = QueueKind::parse(&row.queue)
            .ok_or_else(|| QueueError::Corrupt(format!("task {}: queue {}", id, row.queue)))?;
        let status = TaskStatus::parse(&row.status)
            .ok_or_else(|| QueueError::Corrupt(format!("task {}: status {}", id, row.status)))?;
        let items: Vec<String> = serde_json::from_str(&row.items)
            .map_err(|e| QueueError::Corrupt(format!("task {}: items: {}", id, e)))?;

        Ok(Task {
            id,
            queue,
            payload: TaskPayload::new(items, row.grouping_key),
            chain_id: ChainId(row.chain_id),
            status,
            tx_hash: row.tx_hash.map(TransactionHash::new),
            created_at: from_millis(row.created_at),
            updated_at: row.updated_at.map(from_millis),
        })
    }
}
