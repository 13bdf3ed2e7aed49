use chrono::{DateTime, Utc};
use sqlx::{Pool, QueryBuilder, Sqlite};
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    AutoInvestStatus, AutoInvestTask, AutoInvestTaskRow, AutoInvestTransaction,
    AutoInvestTransactionRow, HistoryEntry, HistoryRow, HistoryStatus,
};
use crate::db::warn_if_slow;
use crate::error::{QueueError, Result};
use crate::providers::{to_millis, Clock, IdProvider};
use crate::types::{ChainId, ContractAddress, TokenAmount, TransactionHash, WalletAddress};

const TASK_COLUMNS: &str =
    "id, chain_id, wallet_address, campaign_address, amount, status, tx_hash, created_at";

const HISTORY_COLUMNS: &str =
    "id, chain_id, wallet_address, campaign_address, amount, status, tx_hash, created_at, completed_at";

#[derive(Clone)]
pub struct AutoInvestStore {
    pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdProvider>,
    owner: String,
}

impl AutoInvestStore {
    pub fn new(
        pool: Pool<Sqlite>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdProvider>,
        owner: impl Into<String>,
    ) -> Self {
        AutoInvestStore {
            pool,
            clock,
            ids,
            owner: owner.into(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Insert a PENDING task, or add `amount` to an existing PENDING one and
    /// refresh its `created_at`. Returns `None` when the key is IN_PROCESS or
    /// leased by a running tick.
    pub async fn create_or_update(
        &self,
        chain_id: ChainId,
        wallet: &WalletAddress,
        campaign: &ContractAddress,
        amount: TokenAmount,
    ) -> Result<Option<AutoInvestTask>> {
        let task = AutoInvestTask {
            id: self.ids.next_id(),
            chain_id,
            wallet: wallet.clone(),
            campaign: campaign.clone(),
            amount,
            status: AutoInvestStatus::Pending,
            tx_hash: None,
            created_at: self.clock.now(),
        };

        let now = Instant::now();
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock for the read below
        let inserted = sqlx::query(
            r#"
            INSERT INTO auto_invest_task (
                id, chain_id, wallet_address, campaign_address, amount, status, tx_hash, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, NULL, ?)
            ON CONFLICT (chain_id, wallet_address, campaign_address) DO NOTHING
            "#,
        )
        .bind(task.id.to_string())
        .bind(chain_id.0)
        .bind(wallet.as_str())
        .bind(campaign.as_str())
        .bind(amount.to_string())
        .bind(task.status.as_str())
        .bind(to_millis(task.created_at))
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() > 0 {
            tx.commit().await?;
            warn_if_slow("Auto-invest task inserted", now);
            return Ok(Some(task));
        }

        let existing = sqlx::query_as::<_, AutoInvestTaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM auto_invest_task
            WHERE chain_id = ? AND wallet_address = ? AND campaign_address = ?
            "#
        ))
        .bind(chain_id.0)
        .bind(wallet.as_str())
        .bind(campaign.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let existing = AutoInvestTask::try_from(existing)?;

        let locked_until: Option<i64> =
            sqlx::query_scalar("SELECT locked_until FROM auto_invest_task WHERE id = ?")
                .bind(existing.id.to_string())
                .fetch_one(&mut *tx)
                .await?;
        let leased = locked_until.is_some_and(|until| until > to_millis(task.created_at));

        if existing.status != AutoInvestStatus::Pending || leased {
            tx.rollback().await?;
            return Ok(None);
        }

        let total = existing.amount.checked_add(amount).ok_or_else(|| {
            QueueError::AmountOverflow(format!("{} / {} on chain {}", wallet, campaign, chain_id))
        })?;

        sqlx::query("UPDATE auto_invest_task SET amount = ?, created_at = ? WHERE id = ?")
            .bind(total.to_string())
            .bind(to_millis(task.created_at))
            .bind(existing.id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        warn_if_slow("Auto-invest task updated", now);

        Ok(Some(AutoInvestTask {
            amount: total,
            created_at: task.created_at,
            ..existing
        }))
    }

    /// Lease every unleased task in `status`, oldest first
    pub async fn lock_by_status(
        &self,
        status: AutoInvestStatus,
        lease: chrono::Duration,
    ) -> Result<Vec<AutoInvestTask>> {
        let now = self.clock.now();
        let started = Instant::now();
        let rows = sqlx::query_as::<_, AutoInvestTaskRow>(&format!(
            r#"
            UPDATE auto_invest_task
            SET locked_by = ?, locked_until = ?
            WHERE status = ? AND (locked_until IS NULL OR locked_until <= ?)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(&self.owner)
        .bind(to_millis(now + lease))
        .bind(status.as_str())
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await?;
        warn_if_slow("Auto-invest tasks locked", started);

        let mut tasks = rows
            .into_iter()
            .map(AutoInvestTask::try_from)
            .collect::<Result<Vec<_>>>()?;
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    /// Release every lease this store still holds
    pub async fn release_locks(&self) -> Result<()> {
        sqlx::query(
            "UPDATE auto_invest_task SET locked_by = NULL, locked_until = NULL WHERE locked_by = ?",
        )
        .bind(&self.owner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_status_and_hash(
        &self,
        ids: &[Uuid],
        status: AutoInvestStatus,
        hash: &TransactionHash,
    ) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        update_status_and_hash(&mut *conn, ids, status, hash).await
    }

    /// Move the invested `tasks` to IN_PROCESS under `hash` and record the
    /// transaction, in one storage transaction.
    ///
    /// A row only moves if its amount and `created_at` still match the
    /// invested snapshot; a row topped up in the meantime stays PENDING.
    /// Returns how many rows moved.
    pub async fn mark_invested(
        &self,
        chain_id: ChainId,
        tasks: &[AutoInvestTask],
        hash: &TransactionHash,
    ) -> Result<u64> {
        let record = self.new_transaction(chain_id, hash);

        let now = Instant::now();
        let mut tx = self.pool.begin().await?;
        let mut moved = 0;
        for task in tasks {
            let updated = sqlx::query(
                r#"
                UPDATE auto_invest_task
                SET status = ?, tx_hash = ?, locked_by = NULL, locked_until = NULL
                WHERE id = ? AND status = ? AND amount = ? AND created_at = ?
                "#,
            )
            .bind(AutoInvestStatus::InProcess.as_str())
            .bind(hash.as_str())
            .bind(task.id.to_string())
            .bind(AutoInvestStatus::Pending.as_str())
            .bind(task.amount.to_string())
            .bind(to_millis(task.created_at))
            .execute(&mut *tx)
            .await?;
            moved += updated.rows_affected();
        }
        insert_transaction(&mut *tx, &record).await?;
        tx.commit().await?;
        warn_if_slow("Auto-invest transaction saved", now);

        Ok(moved)
    }

    fn new_transaction(&self, chain_id: ChainId, hash: &TransactionHash) -> AutoInvestTransaction {
        AutoInvestTransaction {
            id: self.ids.next_id(),
            chain_id,
            tx_hash: hash.clone(),
            created_at: self.clock.now(),
        }
    }

    /// Delete `ids` into the ledger under `status`. Returns how many rows
    /// were moved.
    pub async fn complete_tasks(&self, ids: &[Uuid], status: HistoryStatus) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let completed_at = to_millis(self.clock.now());

        let now = Instant::now();
        let mut tx = self.pool.begin().await?;

        let mut insert = QueryBuilder::<Sqlite>::new(
            r#"
            INSERT INTO auto_invest_task_history (
                id, chain_id, wallet_address, campaign_address, amount, status, tx_hash, created_at, completed_at
            )
            SELECT id, chain_id, wallet_address, campaign_address, amount, "#,
        );
        insert
            .push_bind(status.as_str())
            .push(", tx_hash, created_at, ")
            .push_bind(completed_at)
            .push(" FROM auto_invest_task");
        push_id_filter(&mut insert, ids);
        insert.build().execute(&mut *tx).await?;

        let mut delete = QueryBuilder::<Sqlite>::new("DELETE FROM auto_invest_task");
        push_id_filter(&mut delete, ids);
        let deleted = delete.build().execute(&mut *tx).await?;

        tx.commit().await?;
        warn_if_slow("Auto-invest tasks completed", now);

        Ok(deleted.rows_affected())
    }

    pub async fn find(
        &self,
        chain_id: ChainId,
        wallet: &WalletAddress,
        campaign: &ContractAddress,
    ) -> Result<Option<AutoInvestTask>> {
        let row = sqlx::query_as::<_, AutoInvestTaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM auto_invest_task
            WHERE chain_id = ? AND wallet_address = ? AND campaign_address = ?
            "#
        ))
        .bind(chain_id.0)
        .bind(wallet.as_str())
        .bind(campaign.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(AutoInvestTask::try_from).transpose()
    }

    /// Newest first
    pub async fn find_by_wallet(
        &self,
        chain_id: ChainId,
        wallet: &WalletAddress,
    ) -> Result<Vec<AutoInvestTask>> {
        let rows = sqlx::query_as::<_, AutoInvestTaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM auto_invest_task
            WHERE chain_id = ? AND wallet_address = ?
            ORDER BY created_at DESC
            "#
        ))
        .bind(chain_id.0)
        .bind(wallet.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AutoInvestTask::try_from).collect()
    }

    /// Newest first
    pub async fn find_by_campaign(
        &self,
        chain_id: ChainId,
        campaign: &ContractAddress,
    ) -> Result<Vec<AutoInvestTask>> {
        let rows = sqlx::query_as::<_, AutoInvestTaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM auto_invest_task
            WHERE chain_id = ? AND campaign_address = ?
            ORDER BY created_at DESC
            "#
        ))
        .bind(chain_id.0)
        .bind(campaign.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AutoInvestTask::try_from).collect()
    }

    pub async fn find_transaction(
        &self,
        chain_id: ChainId,
        hash: &TransactionHash,
    ) -> Result<Option<AutoInvestTransaction>> {
        let row = sqlx::query_as::<_, AutoInvestTransactionRow>(
            r#"
            SELECT id, chain_id, tx_hash, created_at FROM auto_invest_transaction
            WHERE chain_id = ? AND tx_hash = ?
            "#,
        )
        .bind(chain_id.0)
        .bind(hash.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(AutoInvestTransaction::try_from).transpose()
    }

    /// Ledger entry for the task that had `id`
    pub async fn history_entry(&self, id: Uuid) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM auto_invest_task_history WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(HistoryEntry::try_from).transpose()
    }

    pub async fn history_by_status(&self, status: HistoryStatus) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            r#"
            SELECT {HISTORY_COLUMNS} FROM auto_invest_task_history
            WHERE status = ?
            ORDER BY completed_at ASC, rowid ASC
            "#
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryEntry::try_from).collect()
    }
}

fn push_id_filter(query: &mut QueryBuilder<'_, Sqlite>, ids: &[Uuid]) {
    query.push(" WHERE id IN (");
    let mut list = query.separated(", ");
    for id in ids {
        list.push_bind(id.to_string());
    }
    list.push_unseparated(")");
}

async fn update_status_and_hash(
    conn: &mut sqlx::SqliteConnection,
    ids: &[Uuid],
    status: AutoInvestStatus,
    hash: &TransactionHash,
) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let mut query = QueryBuilder::<Sqlite>::new("UPDATE auto_invest_task SET status = ");
    query
        .push_bind(status.as_str())
        .push(", tx_hash = ")
        .push_bind(hash.as_str().to_string())
        .push(", locked_by = NULL, locked_until = NULL");
    push_id_filter(&mut query, ids);
    let updated = query.build().execute(&mut *conn).await?;

    Ok(updated.rows_affected())
}

async fn insert_transaction(
    conn: &mut sqlx::SqliteConnection,
    record: &AutoInvestTransaction,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO auto_invest_transaction (id, chain_id, tx_hash, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (chain_id, tx_hash) DO NOTHING
        "#,
    )
    .bind(record.id.to_string())
    .bind(record.chain_id.0)
    .bind(record.tx_hash.as_str())
    .bind(to_millis(record.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}
