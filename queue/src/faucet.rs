//! Faucet funding queue

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::accumulator::PendingItems;
use crate::error::{GatewayError, QueueError, Result};
use crate::gateway::{submitted, ChainGateway};
use crate::task::{QueueKind, Task};
use crate::types::{ChainId, TransactionHash, WalletAddress};
use crate::worker::TaskSubmitter;

#[derive(Clone)]
pub struct FaucetQueue {
    gateway: Arc<dyn ChainGateway>,
    pending: PendingItems,
    chains: HashSet<ChainId>,
}

impl FaucetQueue {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        pending: PendingItems,
        chains: impl IntoIterator<Item = ChainId>,
    ) -> Self {
        FaucetQueue {
            gateway,
            pending,
            chains: chains.into_iter().collect(),
        }
    }

    /// Queue `address` for funding. Returns false if it is already waiting.
    pub async fn add_address(&self, address: &WalletAddress, chain_id: ChainId) -> Result<bool> {
        if !self.chains.contains(&chain_id) {
            return Err(QueueError::UnsupportedChain(chain_id, QueueKind::Faucet.name()));
        }
        self.pending
            .add_item(QueueKind::Faucet, chain_id, None, address.as_str())
            .await
    }
}

#[async_trait]
impl TaskSubmitter for FaucetQueue {
    fn queue(&self) -> QueueKind {
        QueueKind::Faucet
    }

    async fn submit(&self, task: &Task) -> Result<Option<TransactionHash>, GatewayError> {
        if let Some(key) = &task.payload.grouping_key {
            warn!("[FaucetQueue] Task {} carries grouping key {}, not submitting", task.id, key);
            return Ok(None);
        }

        let addresses: Vec<WalletAddress> = task.payload.items.iter().map(WalletAddress::new).collect();
        let hash = self.gateway.send_faucet_funds(&addresses, task.chain_id).await?;
        Ok(submitted(hash))
    }

    async fn is_mined(&self, hash: &TransactionHash, chain_id: ChainId) -> Result<bool, GatewayError> {
        self.gateway.is_mined(hash, chain_id).await
    }
}
