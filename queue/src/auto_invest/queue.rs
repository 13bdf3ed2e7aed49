use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{AutoInvestStatus, AutoInvestStore, AutoInvestTask, HistoryStatus};
use crate::config::AutoInvestSettings;
use crate::error::{ConfigError, QueueError, Result};
use crate::gateway::{submitted, ChainGateway, InvestmentRecord};
use crate::task::QueueKind;
use crate::types::{ChainId, ContractAddress, TokenAmount, TransactionHash, WalletAddress};

const NAME: &str = "AutoInvestQueue";

/// Counts of what one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoInvestTick {
    pub succeeded: usize,
    pub failed: usize,
    pub expired: usize,
    pub invested: usize,
}

#[derive(Clone)]
pub struct AutoInvestQueue {
    store: AutoInvestStore,
    gateway: Arc<dyn ChainGateway>,
    settings: AutoInvestSettings,
    chains: HashSet<ChainId>,
}

impl AutoInvestQueue {
    /// Fails when the queue is disabled or no chain enables auto-invest
    pub fn new(
        store: AutoInvestStore,
        gateway: Arc<dyn ChainGateway>,
        settings: AutoInvestSettings,
        chains: impl IntoIterator<Item = ChainId>,
    ) -> Result<Self> {
        if !settings.queue.enabled {
            return Err(QueueError::QueueDisabled(NAME));
        }
        let chains: HashSet<ChainId> = chains.into_iter().collect();
        if chains.is_empty() {
            return Err(ConfigError::Invalid(format!("no chain enables the {} queue", NAME)).into());
        }

        Ok(AutoInvestQueue {
            store,
            gateway,
            settings,
            chains,
        })
    }

    pub fn store(&self) -> &AutoInvestStore {
        &self.store
    }

    pub fn settings(&self) -> &AutoInvestSettings {
        &self.settings
    }

    /// Create a PENDING task or top up an existing one. `None` means the key
    /// is already being invested and nothing changed.
    pub async fn create_or_update_task(
        &self,
        wallet: &WalletAddress,
        campaign: &ContractAddress,
        chain_id: ChainId,
        amount: TokenAmount,
    ) -> Result<Option<AutoInvestTask>> {
        if !self.chains.contains(&chain_id) {
            return Err(QueueError::UnsupportedChain(chain_id, QueueKind::AutoInvest.name()));
        }

        let version = self.gateway.contract_version(campaign, chain_id).await?;
        let supported = version
            .as_ref()
            .is_some_and(|v| *v >= self.settings.min_version());
        if !supported {
            return Err(QueueError::UnsupportedContractVersion {
                chain_id,
                campaign: campaign.clone(),
                version: version.map_or_else(|| "missing".to_string(), |v| v.as_str().to_string()),
            });
        }

        let task = self
            .store
            .create_or_update(chain_id, wallet, campaign, amount)
            .await?;
        match &task {
            Some(task) => info!(
                "[{}] Submitted auto-invest task {}: {} into {} on chain {} (amount: {})",
                NAME, task.id, wallet, campaign, chain_id, task.amount
            ),
            None => warn!(
                "[{}] Auto-invest already in process for {} into {} on chain {}",
                NAME, wallet, campaign, chain_id
            ),
        }
        Ok(task)
    }

    /// Settle in-process hashes, then expire and invest pending tasks.
    ///
    /// Gateway errors are logged per chain and leave that chain's rows for
    /// the next tick. Storage errors abort the tick.
    pub async fn tick(&self) -> Result<AutoInvestTick> {
        let lease = self.settings.queue.lock_timeout();
        let mut outcome = AutoInvestTick::default();

        let in_process = self.store.lock_by_status(AutoInvestStatus::InProcess, lease).await?;
        for (chain_id, tasks) in by_chain(in_process) {
            let handled = self.settle_in_process(chain_id, tasks, &mut outcome).await;
            self.absorb_gateway_error(chain_id, "in process", handled)?;
        }

        let pending = self.store.lock_by_status(AutoInvestStatus::Pending, lease).await?;
        for (chain_id, tasks) in by_chain(pending) {
            let handled = self.process_pending(chain_id, tasks, &mut outcome).await;
            self.absorb_gateway_error(chain_id, "pending", handled)?;
        }

        self.store.release_locks().await?;
        Ok(outcome)
    }

    fn absorb_gateway_error(&self, chain_id: ChainId, stage: &str, handled: Result<()>) -> Result<()> {
        match handled {
            Err(QueueError::Gateway(e)) => {
                error!(
                    "[{}] Failed to handle {} tasks (chain {}): {}",
                    NAME, stage, chain_id, e
                );
                Ok(())
            }
            other => other,
        }
    }

    async fn settle_in_process(
        &self,
        chain_id: ChainId,
        tasks: Vec<AutoInvestTask>,
        outcome: &mut AutoInvestTick,
    ) -> Result<()> {
        debug!("[{}] Checking {} in process task(s) on chain {}", NAME, tasks.len(), chain_id);

        let mut by_hash: BTreeMap<String, Vec<AutoInvestTask>> = BTreeMap::new();
        for task in tasks {
            let key = task
                .tx_hash
                .as_ref()
                .filter(|h| !h.is_empty())
                .map(|h| h.as_str().to_string());
            match key {
                Some(key) => by_hash.entry(key).or_default().push(task),
                None => warn!("[{}] Task {} is in process without a transaction hash", NAME, task.id),
            }
        }

        for (hash, group) in by_hash {
            let hash = TransactionHash::new(hash);
            let ids: Vec<_> = group.iter().map(|t| t.id).collect();

            if self.gateway.is_mined(&hash, chain_id).await? {
                let moved = self.store.complete_tasks(&ids, HistoryStatus::Success).await?;
                info!("[{}] Transaction {} mined, completed {} task(s)", NAME, hash, moved);
                outcome.succeeded += moved as usize;
                continue;
            }

            let sent_at = match self.store.find_transaction(chain_id, &hash).await? {
                Some(record) => record.created_at,
                None => match group.iter().map(|t| t.created_at).min() {
                    Some(oldest) => oldest,
                    None => continue,
                },
            };

            if sent_at < self.store.now() - self.settings.queue.mining_period() {
                warn!(
                    "[{}] Waiting for transaction {} exceeded {}s",
                    NAME, hash, self.settings.queue.mining_period_secs
                );
                let moved = self.store.complete_tasks(&ids, HistoryStatus::Failure).await?;
                outcome.failed += moved as usize;
            } else {
                debug!("[{}] Waiting for transaction {} to be mined", NAME, hash);
            }
        }
        Ok(())
    }

    async fn process_pending(
        &self,
        chain_id: ChainId,
        tasks: Vec<AutoInvestTask>,
        outcome: &mut AutoInvestTick,
    ) -> Result<()> {
        debug!("[{}] Processing {} pending task(s) on chain {}", NAME, tasks.len(), chain_id);

        let cutoff = self.store.now() - self.settings.task_timeout();
        let (expired, active): (Vec<_>, Vec<_>) =
            tasks.into_iter().partition(|t| t.created_at < cutoff);

        if !expired.is_empty() {
            let ids: Vec<_> = expired.iter().map(|t| t.id).collect();
            let moved = self.store.complete_tasks(&ids, HistoryStatus::Expired).await?;
            info!("[{}] Expired {} task(s) on chain {}", NAME, moved, chain_id);
            outcome.expired += moved as usize;
        }

        if active.is_empty() {
            return Ok(());
        }

        let records: Vec<InvestmentRecord> = active.iter().map(AutoInvestTask::record).collect();
        let readiness = self.gateway.investment_readiness(&records, chain_id).await?;
        if readiness.len() < records.len() {
            warn!(
                "[{}] Readiness answered {} of {} record(s) on chain {}",
                NAME,
                readiness.len(),
                records.len(),
                chain_id
            );
        }

        let ready: Vec<AutoInvestTask> = active
            .into_iter()
            .zip(readiness)
            .filter(|(_, ready)| *ready)
            .map(|(task, _)| task)
            .collect();
        if ready.is_empty() {
            return Ok(());
        }

        let ready_records: Vec<InvestmentRecord> = ready.iter().map(AutoInvestTask::record).collect();
        let Some(hash) = submitted(self.gateway.invest(&ready_records, chain_id).await?) else {
            warn!("[{}] No hash returned for auto-invest on chain {}", NAME, chain_id);
            return Ok(());
        };

        let moved = self.store.mark_invested(chain_id, &ready, &hash).await? as usize;
        if moved < ready.len() {
            warn!(
                "[{}] {} task(s) changed while being invested on chain {}, left pending",
                NAME,
                ready.len() - moved,
                chain_id
            );
        }
        info!(
            "[{}] Auto-invested {} task(s) on chain {}: {}",
            NAME, moved, chain_id, hash
        );
        outcome.invested += moved;
        Ok(())
    }
}

fn by_chain(tasks: Vec<AutoInvestTask>) -> BTreeMap<ChainId, Vec<AutoInvestTask>> {
    let mut grouped: BTreeMap<ChainId, Vec<AutoInvestTask>> = BTreeMap::new();
    for task in tasks {
        grouped.entry(task.chain_id).or_default().push(task);
    }
    grouped
}
