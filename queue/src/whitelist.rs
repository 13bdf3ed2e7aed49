//! Wallet whitelisting queue.
//!
//! Addresses accumulate per (chain, issuer) and are whitelisted on the
//! issuer contract in batches.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::accumulator::PendingItems;
use crate::error::{GatewayError, QueueError, Result};
use crate::gateway::{submitted, ChainGateway};
use crate::task::{QueueKind, Task};
use crate::types::{ChainId, ContractAddress, TransactionHash, WalletAddress};
use crate::worker::TaskSubmitter;

#[derive(Clone)]
pub struct WhitelistQueue {
    gateway: Arc<dyn ChainGateway>,
    pending: PendingItems,
    chains: HashSet<ChainId>,
}

impl WhitelistQueue {
    /// `chains` are the chain ids that enable whitelisting
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        pending: PendingItems,
        chains: impl IntoIterator<Item = ChainId>,
    ) -> Self {
        WhitelistQueue {
            gateway,
            pending,
            chains: chains.into_iter().collect(),
        }
    }

    /// Queue `address` for whitelisting on `issuer`. Returns false when the
    /// address is already whitelisted or already waiting.
    pub async fn add_address(
        &self,
        address: &WalletAddress,
        issuer: &ContractAddress,
        chain_id: ChainId,
    ) -> Result<bool> {
        if !self.chains.contains(&chain_id) {
            return Err(QueueError::UnsupportedChain(chain_id, QueueKind::Whitelist.name()));
        }

        if self.gateway.is_whitelisted(address, issuer, chain_id).await? {
            debug!(
                "[WhitelistQueue] {} already whitelisted on {} (chain {})",
                address, issuer, chain_id
            );
            return Ok(false);
        }

        self.pending
            .add_item(QueueKind::Whitelist, chain_id, Some(issuer.as_str()), address.as_str())
            .await
    }
}

#[async_trait]
impl TaskSubmitter for WhitelistQueue {
    fn queue(&self) -> QueueKind {
        QueueKind::Whitelist
    }

    async fn submit(&self, task: &Task) -> Result<Option<TransactionHash>, GatewayError> {
        let Some(issuer) = task.payload.grouping_key.as_deref() else {
            warn!("[WhitelistQueue] Task {} has no issuer, not submitting", task.id);
            return Ok(None);
        };

        let addresses: Vec<WalletAddress> = task.payload.items.iter().map(WalletAddress::new).collect();
        let hash = self
            .gateway
            .whitelist_addresses(&addresses, &ContractAddress::new(issuer), task.chain_id)
            .await?;
        Ok(submitted(hash))
    }

    async fn is_mined(&self, hash: &TransactionHash, chain_id: ChainId) -> Result<bool, GatewayError> {
        self.gateway.is_mined(hash, chain_id).await
    }
}
