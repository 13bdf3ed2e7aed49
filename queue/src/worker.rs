//! Generic batched queue worker.
//!
//! One tick: flush pending items, then advance a single task. An IN_PROCESS
//! task is always looked at before a CREATED one.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::accumulator::PendingItems;
use crate::config::{QueueConfig, QueueSettings};
use crate::error::{ConfigError, GatewayError, QueueError, Result};
use crate::task::{QueueKind, Task, TaskStatus};
use crate::task_store::TaskStore;
use crate::types::{ChainId, TransactionHash};

/// What a queue needs from the chain to drive its tasks
#[async_trait]
pub trait TaskSubmitter: Send + Sync {
    fn queue(&self) -> QueueKind;

    /// Submit the task's payload. `Ok(None)` means "not ready yet" and is not
    /// a failure.
    async fn submit(&self, task: &Task) -> Result<Option<TransactionHash>, GatewayError>;

    async fn is_mined(&self, hash: &TransactionHash, chain_id: ChainId) -> Result<bool, GatewayError>;
}

/// Result of one tick, mostly for logs and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    MissingHash(Uuid),
    StillMining(Uuid),
    Completed(Uuid),
    Submitted { id: Uuid, hash: TransactionHash },
    NotReady(Uuid),
    Retried { failed: Uuid, replacement: Uuid },
}

pub struct QueueWorker<S> {
    submitter: S,
    store: TaskStore,
    pending: PendingItems,
    settings: QueueSettings,
}

impl<S: TaskSubmitter> QueueWorker<S> {
    /// Fails when the queue is disabled or no configured chain enables it
    pub fn new(
        submitter: S,
        store: TaskStore,
        pending: PendingItems,
        config: &QueueConfig,
    ) -> Result<Self> {
        let queue = submitter.queue();
        let settings = config.settings(queue).clone();
        if !settings.enabled {
            return Err(QueueError::QueueDisabled(queue.name()));
        }
        if config.chains_for(queue).is_empty() {
            return Err(ConfigError::Invalid(format!("no chain enables the {} queue", queue.name())).into());
        }

        Ok(QueueWorker {
            submitter,
            store,
            pending,
            settings,
        })
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn submitter(&self) -> &S {
        &self.submitter
    }

    pub async fn tick(&self) -> Result<TickOutcome> {
        let queue = self.submitter.queue();
        let lease = self.settings.lock_timeout();

        self.pending.flush_all(queue, self.settings.max_batch_size).await?;

        if let Some(task) = self.store.lock_next_in_process(queue, lease).await? {
            return self.advance_in_process(task).await;
        }
        if let Some(task) = self.store.lock_next_pending(queue, lease).await? {
            return self.advance_pending(task).await;
        }
        Ok(TickOutcome::Idle)
    }

    async fn advance_in_process(&self, task: Task) -> Result<TickOutcome> {
        let name = self.submitter.queue().name();

        let Some(hash) = task.tx_hash.clone().filter(|h| !h.is_empty()) else {
            warn!("[{}] Task {} is in process without a transaction hash", name, task.id);
            self.store.release(task.id).await?;
            return Ok(TickOutcome::MissingHash(task.id));
        };

        match self.submitter.is_mined(&hash, task.chain_id).await {
            Ok(true) => {
                self.store.set_status(task.id, TaskStatus::Completed, None).await?;
                info!("[{}] Task {} mined: {}", name, task.id, hash);
                Ok(TickOutcome::Completed(task.id))
            }
            Ok(false) => {
                let deadline = task.last_change() + self.settings.mining_period();
                if self.store.now() > deadline {
                    warn!(
                        "[{}] Task {} not mined within {}s: {}",
                        name, task.id, self.settings.mining_period_secs, hash
                    );
                    self.retry(&task).await
                } else {
                    debug!("[{}] Waiting for task {} to be mined: {}", name, task.id, hash);
                    self.store.release(task.id).await?;
                    Ok(TickOutcome::StillMining(task.id))
                }
            }
            Err(e) => {
                error!("[{}] Mining check failed for task {}: {}", name, task.id, e);
                self.retry(&task).await
            }
        }
    }

    async fn advance_pending(&self, task: Task) -> Result<TickOutcome> {
        let name = self.submitter.queue().name();

        match self.submitter.submit(&task).await {
            Ok(Some(hash)) if !hash.is_empty() => {
                self.store
                    .set_status(task.id, TaskStatus::InProcess, Some(&hash))
                    .await?;
                info!(
                    "[{}] Submitted task {} ({} item(s)) on chain {}: {}",
                    name,
                    task.id,
                    task.payload.items.len(),
                    task.chain_id,
                    hash
                );
                Ok(TickOutcome::Submitted { id: task.id, hash })
            }
            Ok(_) => {
                debug!("[{}] Task {} not ready for submission", name, task.id);
                self.store.release(task.id).await?;
                Ok(TickOutcome::NotReady(task.id))
            }
            Err(e) => {
                error!("[{}] Submission failed for task {}: {}", name, task.id, e);
                self.retry(&task).await
            }
        }
    }

    async fn retry(&self, task: &Task) -> Result<TickOutcome> {
        let replacement = self.store.mark_failed_and_retry(task).await?;
        info!(
            "[{}] Task {} failed, retrying as {}",
            self.submitter.queue().name(),
            task.id,
            replacement.id
        );
        Ok(TickOutcome::Retried {
            failed: task.id,
            replacement: replacement.id,
        })
    }
}
