//! Pending-item accumulator and batch flusher.
//!
//! Items wait in `pending_item` keyed by (queue, chain, grouping key) until
//! a worker tick folds them into a CREATED task. Draining the items and
//! inserting the task happen in one transaction, so an item is either still
//! pending or inside exactly one task.

use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use crate::db::warn_if_slow;
use crate::error::Result;
use crate::providers::{to_millis, Clock};
use crate::task::{QueueKind, Task, TaskPayload};
use crate::task_store::{insert_task, TaskStore};
use crate::types::ChainId;

#[derive(Clone)]
pub struct PendingItems {
    pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
    tasks: TaskStore,
}

impl PendingItems {
    pub fn new(pool: Pool<Sqlite>, clock: Arc<dyn Clock>, tasks: TaskStore) -> Self {
        PendingItems { pool, clock, tasks }
    }

    /// Record `item` for a later flush. Returns false when the same item is
    /// already waiting under the same key.
    pub async fn add_item(
        &self,
        queue: QueueKind,
        chain_id: ChainId,
        grouping_key: Option<&str>,
        item: &str,
    ) -> Result<bool> {
        let now = Instant::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO pending_item (queue, chain_id, grouping_key, item, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (queue, chain_id, grouping_key, item) DO NOTHING
            "#,
        )
        .bind(queue.as_str())
        .bind(chain_id.0)
        .bind(grouping_key.unwrap_or_default())
        .bind(item)
        .bind(to_millis(self.clock.now()))
        .execute(&self.pool)
        .await?;
        warn_if_slow("Pending item inserted", now);

        Ok(inserted.rows_affected() > 0)
    }

    /// Distinct (chain, grouping key) pairs with items waiting
    pub async fn pending_keys(&self, queue: QueueKind) -> Result<Vec<(ChainId, Option<String>)>> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            r#"
            SELECT chain_id, grouping_key FROM pending_item
            WHERE queue = ?
            GROUP BY chain_id, grouping_key
            ORDER BY MIN(rowid)
            "#,
        )
        .bind(queue.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(chain, key)| (ChainId(chain), (!key.is_empty()).then_some(key)))
            .collect())
    }

    /// Drain up to `max_batch` items for one key into a new CREATED task.
    /// Returns `None` when nothing was waiting.
    pub async fn flush(
        &self,
        queue: QueueKind,
        chain_id: ChainId,
        grouping_key: Option<&str>,
        max_batch: u32,
    ) -> Result<Option<Task>> {
        let now = Instant::now();
        let mut tx = self.pool.begin().await?;

        let drained: Vec<String> = sqlx::query_scalar(
            r#"
            DELETE FROM pending_item
            WHERE rowid IN (
                SELECT rowid FROM pending_item
                WHERE queue = ? AND chain_id = ? AND grouping_key = ?
                ORDER BY rowid ASC
                LIMIT ?
            )
            RETURNING item
            "#,
        )
        .bind(queue.as_str())
        .bind(chain_id.0)
        .bind(grouping_key.unwrap_or_default())
        .bind(max_batch as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut seen = HashSet::new();
        let items: Vec<String> = drained
            .into_iter()
            .filter(|item| seen.insert(item.clone()))
            .collect();

        if items.is_empty() {
            tx.rollback().await?;
            return Ok(None);
        }

        let payload = TaskPayload::new(items, grouping_key.map(str::to_string));
        let task = self.tasks.new_task(queue, payload, chain_id);
        insert_task(&mut *tx, &task).await?;
        tx.commit().await?;
        warn_if_slow("Pending items flushed", now);

        debug!(
            "[{}] flushed {} item(s) on chain {} into task {}",
            queue.name(),
            task.payload.items.len(),
            chain_id,
            task.id
        );
        Ok(Some(task))
    }

    /// Flush every key with items waiting. A key holding more than
    /// `max_batch` items yields one task now and keeps the rest for the next
    /// call.
    pub async fn flush_all(&self, queue: QueueKind, max_batch: u32) -> Result<Vec<Task>> {
        let mut created = Vec::new();
        for (chain_id, key) in self.pending_keys(queue).await? {
            if let Some(task) = self.flush(queue, chain_id, key.as_deref(), max_batch).await? {
                created.push(task);
            }
        }
        Ok(created)
    }

    /// Items waiting on `chain_id`
    pub async fn count(&self, queue: QueueKind, chain_id: ChainId) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM pending_item WHERE queue = ? AND chain_id = ?",
        )
        .bind(queue.as_str())
        .bind(chain_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
