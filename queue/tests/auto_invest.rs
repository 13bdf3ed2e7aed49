mod common;

use chain_queue::{
    AutoInvestQueue, AutoInvestStatus, AutoInvestTick, ChainId, Clock, ContractAddress,
    HistoryStatus, QueueError, QueueKind, TokenAmount, TransactionHash,
};
use chrono::Duration;
use common::{harness, wallet, TopUp, CAMPAIGN, CHAIN, UNKNOWN_CHAIN};

fn campaign() -> ContractAddress {
    ContractAddress::new(CAMPAIGN)
}

// ============================================================================
// Upsert
// ============================================================================

#[tokio::test]
async fn test_upsert_adds_amount_and_refreshes_created_at() {
    let h = harness().await;
    let queue = h.auto_invest_queue();

    let first = queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(100))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, AutoInvestStatus::Pending);

    h.clock.advance(Duration::seconds(30));
    let second = queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(250))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.amount, TokenAmount(350));
    assert_eq!(second.created_at, first.created_at + Duration::seconds(30));

    let stored = queue.store().find(CHAIN, &wallet(1), &campaign()).await.unwrap().unwrap();
    assert_eq!(stored, second);
}

#[tokio::test]
async fn test_upsert_on_in_process_task_is_rejected() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    let task = queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(100))
        .await
        .unwrap()
        .unwrap();
    queue
        .store()
        .update_status_and_hash(&[task.id], AutoInvestStatus::InProcess, &TransactionHash::new("0x01"))
        .await
        .unwrap();

    let result = queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(5))
        .await
        .unwrap();
    assert!(result.is_none());

    let stored = queue.store().find(CHAIN, &wallet(1), &campaign()).await.unwrap().unwrap();
    assert_eq!(stored.amount, TokenAmount(100));
    assert_eq!(stored.status, AutoInvestStatus::InProcess);
}

#[tokio::test]
async fn test_amount_overflow_is_an_error() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(u128::MAX))
        .await
        .unwrap();

    let err = queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(1))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::AmountOverflow(_)));
}

#[tokio::test]
async fn test_old_or_unversioned_campaign_is_rejected() {
    let h = harness().await;
    let queue = h.auto_invest_queue();

    h.gateway.update(|s| s.version = Some("1.0.19".into()));
    let err = queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(1))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::UnsupportedContractVersion { ref version, .. } if version == "1.0.19"));

    h.gateway.update(|s| s.version = None);
    let err = queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(1))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::UnsupportedContractVersion { .. }));

    h.gateway.update(|s| s.version = Some("1.1.0".into()));
    assert!(queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(1))
        .await
        .unwrap()
        .is_some());

    let err = queue
        .create_or_update_task(&wallet(1), &campaign(), UNKNOWN_CHAIN, TokenAmount(1))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::UnsupportedChain(..)));
}

// ============================================================================
// Construction
// ============================================================================

#[tokio::test]
async fn test_disabled_auto_invest_fails_at_construction() {
    let mut h = harness().await;
    h.config.auto_invest.queue.enabled = false;

    let result = AutoInvestQueue::new(
        h.auto_invest_store("worker-a"),
        h.gateway(),
        h.config.auto_invest.clone(),
        h.config.chains_for(QueueKind::AutoInvest),
    );
    assert!(matches!(result, Err(QueueError::QueueDisabled(_))));
}

#[tokio::test]
async fn test_auto_invest_without_chains_fails_at_construction() {
    let h = harness().await;

    let result = AutoInvestQueue::new(
        h.auto_invest_store("worker-a"),
        h.gateway(),
        h.config.auto_invest.clone(),
        Vec::<ChainId>::new(),
    );
    assert!(matches!(result, Err(QueueError::Config(_))));
}

// ============================================================================
// Status queries
// ============================================================================

#[tokio::test]
async fn test_queries_by_wallet_and_campaign_are_newest_first() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    let other_campaign = ContractAddress::new("0x00000000000000000000000000000000000ca112");

    let older = queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(1))
        .await
        .unwrap()
        .unwrap();
    h.clock.advance(Duration::seconds(10));
    let newer = queue
        .create_or_update_task(&wallet(1), &other_campaign, CHAIN, TokenAmount(2))
        .await
        .unwrap()
        .unwrap();
    h.clock.advance(Duration::seconds(10));
    let newest = queue
        .create_or_update_task(&wallet(2), &campaign(), CHAIN, TokenAmount(3))
        .await
        .unwrap()
        .unwrap();

    let by_wallet = queue.store().find_by_wallet(CHAIN, &wallet(1)).await.unwrap();
    let ids: Vec<_> = by_wallet.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![newer.id, older.id]);

    let by_campaign = queue.store().find_by_campaign(CHAIN, &campaign()).await.unwrap();
    let ids: Vec<_> = by_campaign.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![newest.id, older.id]);

    assert!(queue.store().find_by_wallet(UNKNOWN_CHAIN, &wallet(1)).await.unwrap().is_empty());
    assert!(queue.store().find_by_wallet(CHAIN, &wallet(3)).await.unwrap().is_empty());
}

// ============================================================================
// Pending tasks
// ============================================================================

#[tokio::test]
async fn test_ready_tasks_share_one_transaction() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    for n in 1..=3 {
        queue
            .create_or_update_task(&wallet(n), &campaign(), CHAIN, TokenAmount(10 * n as u128))
            .await
            .unwrap();
        h.clock.advance(Duration::seconds(1));
    }
    h.gateway.update(|s| s.readiness = Some(vec![true, false, true]));

    let tick = queue.tick().await.unwrap();
    assert_eq!(tick, AutoInvestTick { invested: 2, ..Default::default() });

    let invested = h.gateway.read(|s| s.invest_calls.clone());
    assert_eq!(invested.len(), 1);
    let investors: Vec<_> = invested[0].iter().map(|r| r.investor.clone()).collect();
    assert_eq!(investors, vec![wallet(1), wallet(3)]);

    let hash = TransactionHash::new("0xinvest");
    for n in [1, 3] {
        let task = queue.store().find(CHAIN, &wallet(n), &campaign()).await.unwrap().unwrap();
        assert_eq!(task.status, AutoInvestStatus::InProcess);
        assert_eq!(task.tx_hash, Some(hash.clone()));
    }
    let waiting = queue.store().find(CHAIN, &wallet(2), &campaign()).await.unwrap().unwrap();
    assert_eq!(waiting.status, AutoInvestStatus::Pending);

    let record = queue.store().find_transaction(CHAIN, &hash).await.unwrap().unwrap();
    assert_eq!(record.created_at, h.clock.now());
}

#[tokio::test]
async fn test_short_readiness_answer_leaves_rest_pending() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    for n in 1..=3 {
        queue
            .create_or_update_task(&wallet(n), &campaign(), CHAIN, TokenAmount(1))
            .await
            .unwrap();
    }
    h.gateway.update(|s| s.readiness = Some(vec![true]));

    assert_eq!(queue.tick().await.unwrap().invested, 1);
    let pending = queue.store().find_by_campaign(CHAIN, &campaign()).await.unwrap();
    assert_eq!(
        pending.iter().filter(|t| t.status == AutoInvestStatus::Pending).count(),
        2
    );
}

#[tokio::test]
async fn test_expired_task_goes_to_ledger_even_when_ready() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    let old = queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(1))
        .await
        .unwrap()
        .unwrap();

    h.clock.advance(Duration::seconds(3601));
    let fresh = queue
        .create_or_update_task(&wallet(2), &campaign(), CHAIN, TokenAmount(1))
        .await
        .unwrap()
        .unwrap();

    let tick = queue.tick().await.unwrap();
    assert_eq!(tick.expired, 1);
    assert_eq!(tick.invested, 1);

    assert!(queue.store().find(CHAIN, &wallet(1), &campaign()).await.unwrap().is_none());
    let entry = queue.store().history_entry(old.id).await.unwrap().unwrap();
    assert_eq!(entry.status, HistoryStatus::Expired);
    assert_eq!(entry.wallet, wallet(1));
    assert_eq!(entry.completed_at, h.clock.now());

    // only the fresh task was sent for readiness and investment
    let checked = h.gateway.read(|s| s.readiness_calls.clone());
    assert_eq!(checked.len(), 1);
    assert_eq!(checked[0].len(), 1);
    assert_eq!(checked[0][0].investor, fresh.wallet);
}

#[tokio::test]
async fn test_readiness_error_leaves_rows_untouched() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(1))
        .await
        .unwrap();
    h.gateway.update(|s| s.readiness_fails = true);

    assert_eq!(queue.tick().await.unwrap(), AutoInvestTick::default());
    let task = queue.store().find(CHAIN, &wallet(1), &campaign()).await.unwrap().unwrap();
    assert_eq!(task.status, AutoInvestStatus::Pending);

    // leases were released, so the next tick sees the row again
    h.gateway.update(|s| s.readiness_fails = false);
    assert_eq!(queue.tick().await.unwrap().invested, 1);
}

#[tokio::test]
async fn test_missing_invest_hash_keeps_tasks_pending() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(1))
        .await
        .unwrap();
    h.gateway.update(|s| s.invest_hash = Some(String::new()));

    assert_eq!(queue.tick().await.unwrap().invested, 0);
    let task = queue.store().find(CHAIN, &wallet(1), &campaign()).await.unwrap().unwrap();
    assert_eq!(task.status, AutoInvestStatus::Pending);
    assert!(task.tx_hash.is_none());
}

#[tokio::test]
async fn test_top_up_during_invest_waits_for_the_tick() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(100))
        .await
        .unwrap()
        .unwrap();

    let api = h.auto_invest_store("api");
    h.gateway.update(|s| {
        s.top_up_during_invest = Some(TopUp {
            store: api,
            wallet: wallet(1),
            campaign: campaign(),
            amount: TokenAmount(50),
        })
    });

    assert_eq!(queue.tick().await.unwrap().invested, 1);
    assert_eq!(h.gateway.read(|s| s.top_up_results.clone()), vec![None]);

    let task = queue.store().find(CHAIN, &wallet(1), &campaign()).await.unwrap().unwrap();
    assert_eq!(task.status, AutoInvestStatus::InProcess);
    assert_eq!(task.amount, TokenAmount(100));

    h.gateway.update(|s| s.mined = true);
    assert_eq!(queue.tick().await.unwrap().succeeded, 1);

    // the ledger matches what was actually sent on chain
    let sent = h.gateway.read(|s| s.invest_calls[0][0].amount);
    let entry = queue.store().history_entry(task.id).await.unwrap().unwrap();
    assert_eq!(entry.status, HistoryStatus::Success);
    assert_eq!(entry.amount, sent);

    // once settled, the key takes new money again
    let again = queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.amount, TokenAmount(50));
    assert_eq!(again.status, AutoInvestStatus::Pending);
}

#[tokio::test]
async fn test_task_changed_after_lease_expiry_stays_pending() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(100))
        .await
        .unwrap()
        .unwrap();

    let store = queue.store();
    let lease = Duration::seconds(30);
    let snapshot = store.lock_by_status(AutoInvestStatus::Pending, lease).await.unwrap();
    assert_eq!(snapshot.len(), 1);

    // a slow gateway call outlives the lease and the client tops up
    h.clock.advance(Duration::seconds(31));
    let topped = h
        .auto_invest_store("api")
        .create_or_update(CHAIN, &wallet(1), &campaign(), TokenAmount(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(topped.amount, TokenAmount(150));

    let hash = TransactionHash::new("0xstale");
    assert_eq!(store.mark_invested(CHAIN, &snapshot, &hash).await.unwrap(), 0);

    let task = store.find(CHAIN, &wallet(1), &campaign()).await.unwrap().unwrap();
    assert_eq!(task.status, AutoInvestStatus::Pending);
    assert_eq!(task.amount, TokenAmount(150));
    assert!(task.tx_hash.is_none());

    // a fresh snapshot goes through
    store.release_locks().await.unwrap();
    let snapshot = store.lock_by_status(AutoInvestStatus::Pending, lease).await.unwrap();
    assert_eq!(store.mark_invested(CHAIN, &snapshot, &hash).await.unwrap(), 1);
}

// ============================================================================
// In-process tasks
// ============================================================================

#[tokio::test]
async fn test_mined_hash_completes_every_task_sharing_it() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    let mut ids = Vec::new();
    for n in 1..=2 {
        let task = queue
            .create_or_update_task(&wallet(n), &campaign(), CHAIN, TokenAmount(1))
            .await
            .unwrap()
            .unwrap();
        ids.push(task.id);
    }
    queue.tick().await.unwrap();

    h.gateway.update(|s| s.mined = true);
    let tick = queue.tick().await.unwrap();
    assert_eq!(tick.succeeded, 2);

    // one mining check for the shared hash
    assert_eq!(h.gateway.read(|s| s.mined_calls.clone()), vec!["0xinvest".to_string()]);

    let succeeded = queue.store().history_by_status(HistoryStatus::Success).await.unwrap();
    let mut found: Vec<_> = succeeded.iter().map(|e| e.id).collect();
    found.sort();
    ids.sort();
    assert_eq!(found, ids);
    assert!(succeeded
        .iter()
        .all(|e| e.tx_hash == Some(TransactionHash::new("0xinvest"))));
    assert!(queue.store().find_by_wallet(CHAIN, &wallet(1)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unmined_transaction_fails_after_mining_period() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    let task = queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(1))
        .await
        .unwrap()
        .unwrap();
    queue.tick().await.unwrap();

    h.clock.advance(Duration::seconds(60));
    assert_eq!(queue.tick().await.unwrap(), AutoInvestTick::default());

    h.clock.advance(Duration::seconds(1));
    assert_eq!(queue.tick().await.unwrap().failed, 1);

    let entry = queue.store().history_entry(task.id).await.unwrap().unwrap();
    assert_eq!(entry.status, HistoryStatus::Failure);
    assert_eq!(entry.tx_hash, Some(TransactionHash::new("0xinvest")));
}

#[tokio::test]
async fn test_missing_transaction_record_uses_oldest_task() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    let task = queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(1))
        .await
        .unwrap()
        .unwrap();
    queue
        .store()
        .update_status_and_hash(&[task.id], AutoInvestStatus::InProcess, &TransactionHash::new("0xorphan"))
        .await
        .unwrap();

    h.clock.advance(Duration::seconds(61));
    assert_eq!(queue.tick().await.unwrap().failed, 1);
    assert_eq!(
        queue.store().history_by_status(HistoryStatus::Failure).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_mining_check_error_leaves_tasks_in_process() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(1))
        .await
        .unwrap();
    queue.tick().await.unwrap();

    h.gateway.update(|s| s.mined_fails = true);
    h.clock.advance(Duration::seconds(600));
    assert_eq!(queue.tick().await.unwrap(), AutoInvestTick::default());

    let task = queue.store().find(CHAIN, &wallet(1), &campaign()).await.unwrap().unwrap();
    assert_eq!(task.status, AutoInvestStatus::InProcess);
}

#[tokio::test]
async fn test_other_worker_skips_leased_tasks() {
    let h = harness().await;
    let queue = h.auto_invest_queue();
    queue
        .create_or_update_task(&wallet(1), &campaign(), CHAIN, TokenAmount(1))
        .await
        .unwrap();

    let mine = h.auto_invest_store("worker-a");
    let other = h.auto_invest_store("worker-b");
    let lease = Duration::seconds(30);

    assert_eq!(mine.lock_by_status(AutoInvestStatus::Pending, lease).await.unwrap().len(), 1);
    assert!(other.lock_by_status(AutoInvestStatus::Pending, lease).await.unwrap().is_empty());

    mine.release_locks().await.unwrap();
    assert_eq!(other.lock_by_status(AutoInvestStatus::Pending, lease).await.unwrap().len(), 1);
}
