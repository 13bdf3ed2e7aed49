//! Durable task table shared by the batched queues.
//!
//! Rows are claimed with a lease (`locked_by` / `locked_until`) set in the
//! same UPDATE that selects them, so two workers against one database never
//! pick the same row. A lease that outlives its owner simply expires.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::db::warn_if_slow;
use crate::error::{QueueError, Result};
use crate::providers::{to_millis, Clock, IdProvider};
use crate::task::{QueueKind, Task, TaskPayload, TaskRow, TaskStatus};
use crate::types::{ChainId, TransactionHash};

const TASK_COLUMNS: &str =
    "id, queue, items, grouping_key, chain_id, status, tx_hash, created_at, updated_at";

#[derive(Clone)]
pub struct TaskStore {
    pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdProvider>,
    owner: String,
}

impl TaskStore {
    pub fn new(
        pool: Pool<Sqlite>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdProvider>,
        owner: impl Into<String>,
    ) -> Self {
        TaskStore {
            pool,
            clock,
            ids,
            owner: owner.into(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Lease owner written to `locked_by`
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Insert a fresh CREATED task
    pub async fn enqueue(
        &self,
        queue: QueueKind,
        payload: TaskPayload,
        chain_id: ChainId,
    ) -> Result<Task> {
        let task = self.new_task(queue, payload, chain_id);
        let now = Instant::now();
        insert_task(&self.pool, &task).await?;
        warn_if_slow("Task enqueued", now);
        Ok(task)
    }

    pub(crate) fn new_task(&self, queue: QueueKind, payload: TaskPayload, chain_id: ChainId) -> Task {
        Task {
            id: self.ids.next_id(),
            queue,
            payload,
            chain_id,
            status: TaskStatus::Created,
            tx_hash: None,
            created_at: self.clock.now(),
            updated_at: None,
        }
    }

    /// Claim the oldest unleased IN_PROCESS task of `queue`
    pub async fn lock_next_in_process(
        &self,
        queue: QueueKind,
        lease: chrono::Duration,
    ) -> Result<Option<Task>> {
        self.lock_next(queue, TaskStatus::InProcess, lease).await
    }

    /// Claim the oldest unleased CREATED task of `queue`
    pub async fn lock_next_pending(
        &self,
        queue: QueueKind,
        lease: chrono::Duration,
    ) -> Result<Option<Task>> {
        self.lock_next(queue, TaskStatus::Created, lease).await
    }

    async fn lock_next(
        &self,
        queue: QueueKind,
        status: TaskStatus,
        lease: chrono::Duration,
    ) -> Result<Option<Task>> {
        let now = self.clock.now();
        let started = Instant::now();
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE blockchain_task
            SET locked_by = ?, locked_until = ?
            WHERE id = (
                SELECT id FROM blockchain_task
                WHERE queue = ? AND status = ?
                  AND (locked_until IS NULL OR locked_until <= ?)
                ORDER BY created_at ASC, rowid ASC
                LIMIT 1
            )
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(&self.owner)
        .bind(to_millis(now + lease))
        .bind(queue.as_str())
        .bind(status.as_str())
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await?;
        warn_if_slow("Task locked", started);

        row.map(Task::try_from).transpose()
    }

    /// Drop our lease without changing the row
    pub async fn release(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE blockchain_task
            SET locked_by = NULL, locked_until = NULL
            WHERE id = ? AND locked_by = ?
            "#,
        )
        .bind(id.to_string())
        .bind(&self.owner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a task to `status`, stamping `updated_at` and releasing the lease.
    /// The payload is left untouched. When `tx_hash` is `None` the stored hash
    /// is kept.
    pub async fn set_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        tx_hash: Option<&TransactionHash>,
    ) -> Result<Task> {
        let now = Instant::now();
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE blockchain_task
            SET status = ?,
                tx_hash = COALESCE(?, tx_hash),
                updated_at = ?,
                locked_by = NULL,
                locked_until = NULL
            WHERE id = ?
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(status.as_str())
        .bind(tx_hash.map(|h| h.as_str()))
        .bind(to_millis(self.clock.now()))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        warn_if_slow("Task status updated", now);

        match row {
            Some(row) => Task::try_from(row),
            None => Err(QueueError::Corrupt(format!("task {} vanished", id))),
        }
    }

    /// Mark `task` FAILED (keeping its hash) and insert a CREATED replacement
    /// with the same payload, in one transaction. Returns the replacement.
    pub async fn mark_failed_and_retry(&self, task: &Task) -> Result<Task> {
        let replacement = self.new_task(task.queue, task.payload.clone(), task.chain_id);

        let now = Instant::now();
        let mut tx = self.pool.begin().await?;

        let failed = sqlx::query(
            r#"
            UPDATE blockchain_task
            SET status = ?, updated_at = ?, locked_by = NULL, locked_until = NULL
            WHERE id = ?
            "#,
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(to_millis(replacement.created_at))
        .bind(task.id.to_string())
        .execute(&mut *tx)
        .await?;

        if failed.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(QueueError::Corrupt(format!("task {} vanished", task.id)));
        }

        insert_task(&mut *tx, &replacement).await?;
        tx.commit().await?;
        warn_if_slow("Task failed and retried", now);

        Ok(replacement)
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM blockchain_task WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    /// Tasks of `queue` in `status`, oldest first
    pub async fn list_by_status(&self, queue: QueueKind, status: TaskStatus) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM blockchain_task
            WHERE queue = ? AND status = ?
            ORDER BY created_at ASC, rowid ASC
            "#
        ))
        .bind(queue.as_str())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Task::try_from).collect()
    }

    /// Every task of `queue` on `chain_id` whose batch contains `item`
    pub async fn tasks_for_item(
        &self,
        queue: QueueKind,
        chain_id: ChainId,
        item: &str,
    ) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM blockchain_task
            WHERE queue = ? AND chain_id = ?
              AND EXISTS (SELECT 1 FROM json_each(blockchain_task.items) WHERE value = ?)
            ORDER BY created_at ASC, rowid ASC
            "#
        ))
        .bind(queue.as_str())
        .bind(chain_id.0)
        .bind(item)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Task::try_from).collect()
    }
}

/// Insert a task row on any executor (pool or open transaction)
pub(crate) async fn insert_task<'e, E>(executor: E, task: &Task) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let items = serde_json::to_string(&task.payload.items)
        .map_err(|e| QueueError::Corrupt(format!("task {} items: {}", task.id, e)))?;

    sqlx::query(
        r#"
        INSERT INTO blockchain_task (
            id, queue, items, grouping_key, chain_id, status, tx_hash, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(task.id.to_string())
    .bind(task.queue.as_str())
    .bind(items)
    .bind(task.payload.grouping_key.as_deref())
    .bind(task.chain_id.0)
    .bind(task.status.as_str())
    .bind(task.tx_hash.as_ref().map(|h| h.as_str()))
    .bind(to_millis(task.created_at))
    .bind(task.updated_at.map(to_millis))
    .execute(executor)
    .await?;

    Ok(())
}
