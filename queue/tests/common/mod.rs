#![allow(dead_code)]

use async_trait::async_trait;
use chain_queue::{
    db, AutoInvestQueue, AutoInvestStore, ChainGateway, ChainId, ContractAddress,
    ContractVersion, FaucetQueue, GatewayError, InvestmentRecord, ManualClock, PendingItems,
    QueueConfig, QueueKind, QueueWorker, SequentialIds, TaskStore, TokenAmount, TransactionHash,
    WalletAddress, WhitelistQueue,
};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

// ============================================================================
// Constants
// ============================================================================

pub const CHAIN: ChainId = ChainId(1);
pub const WHITELIST_ONLY_CHAIN: ChainId = ChainId(2);
pub const UNKNOWN_CHAIN: ChainId = ChainId(99);
pub const ISSUER: &str = "0x00000000000000000000000000000000000155e4";
pub const CAMPAIGN: &str = "0x00000000000000000000000000000000000ca111";

const CONFIG: &str = r#"
    [whitelist]
    mining_period_secs = 60
    max_batch_size = 2

    [faucet]
    mining_period_secs = 60
    max_batch_size = 2

    [auto_invest]
    mining_period_secs = 60
    task_timeout_secs = 3600

    [[chains]]
    id = 1
    name = "local"
    rpc_url = "http://localhost:8545"
    relayer_url = "http://localhost:9000"
    whitelist = true
    faucet = true
    auto_invest = true

    [[chains]]
    id = 2
    rpc_url = "http://localhost:8546"
    relayer_url = "http://localhost:9001"
    whitelist = true
"#;

pub fn wallet(n: u32) -> WalletAddress {
    WalletAddress::new(format!("0x{:040x}", n))
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
}

// ============================================================================
// Mock Chain Gateway
// ============================================================================

/// A client top-up fired from inside `invest`, while the tick holds its leases
pub struct TopUp {
    pub store: AutoInvestStore,
    pub wallet: WalletAddress,
    pub campaign: ContractAddress,
    pub amount: TokenAmount,
}

impl fmt::Debug for TopUp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopUp")
            .field("wallet", &self.wallet)
            .field("campaign", &self.campaign)
            .field("amount", &self.amount)
            .finish()
    }
}

/// Scripted answers plus a log of every call
#[derive(Debug, Default)]
pub struct MockState {
    pub submit_hash: Option<String>,
    pub submit_fails: bool,
    pub mined: bool,
    pub mined_fails: bool,
    pub whitelisted: HashSet<String>,
    pub whitelist_check_fails: bool,
    pub readiness: Option<Vec<bool>>,
    pub readiness_fails: bool,
    pub invest_hash: Option<String>,
    pub version: Option<String>,
    pub top_up_during_invest: Option<TopUp>,

    pub whitelist_calls: Vec<(String, Vec<String>)>,
    pub faucet_calls: Vec<Vec<String>>,
    pub mined_calls: Vec<String>,
    pub readiness_calls: Vec<Vec<InvestmentRecord>>,
    pub invest_calls: Vec<Vec<InvestmentRecord>>,
    /// Amount each top-up left on the task, `None` when it was refused
    pub top_up_results: Vec<Option<TokenAmount>>,
}

#[derive(Debug)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    /// Submissions return `0xhash`, nothing is mined, every campaign is 1.0.20
    pub fn new() -> Arc<Self> {
        Arc::new(MockGateway {
            state: Mutex::new(MockState {
                submit_hash: Some("0xhash".to_string()),
                invest_hash: Some("0xinvest".to_string()),
                version: Some("1.0.20".to_string()),
                ..Default::default()
            }),
        })
    }

    pub fn update(&self, f: impl FnOnce(&mut MockState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn read<R>(&self, f: impl FnOnce(&MockState) -> R) -> R {
        f(&self.state.lock().unwrap())
    }
}

fn strings(addresses: &[WalletAddress]) -> Vec<String> {
    addresses.iter().map(|a| a.as_str().to_string()).collect()
}

fn failure(what: &str) -> GatewayError {
    GatewayError::Network(format!("{what} unavailable"))
}

#[async_trait]
impl ChainGateway for MockGateway {
    async fn whitelist_addresses(
        &self,
        addresses: &[WalletAddress],
        issuer: &ContractAddress,
        _chain_id: ChainId,
    ) -> Result<Option<TransactionHash>, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state
            .whitelist_calls
            .push((issuer.as_str().to_string(), strings(addresses)));
        if state.submit_fails {
            return Err(failure("relayer"));
        }
        Ok(state.submit_hash.clone().map(TransactionHash::new))
    }

    async fn is_whitelisted(
        &self,
        address: &WalletAddress,
        _issuer: &ContractAddress,
        _chain_id: ChainId,
    ) -> Result<bool, GatewayError> {
        let state = self.state.lock().unwrap();
        if state.whitelist_check_fails {
            return Err(failure("relayer"));
        }
        Ok(state.whitelisted.contains(address.as_str()))
    }

    async fn send_faucet_funds(
        &self,
        addresses: &[WalletAddress],
        _chain_id: ChainId,
    ) -> Result<Option<TransactionHash>, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.faucet_calls.push(strings(addresses));
        if state.submit_fails {
            return Err(failure("relayer"));
        }
        Ok(state.submit_hash.clone().map(TransactionHash::new))
    }

    async fn is_mined(&self, hash: &TransactionHash, _chain_id: ChainId) -> Result<bool, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.mined_calls.push(hash.as_str().to_string());
        if state.mined_fails {
            return Err(failure("node"));
        }
        Ok(state.mined)
    }

    async fn investment_readiness(
        &self,
        records: &[InvestmentRecord],
        _chain_id: ChainId,
    ) -> Result<Vec<bool>, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.readiness_calls.push(records.to_vec());
        if state.readiness_fails {
            return Err(failure("relayer"));
        }
        Ok(state
            .readiness
            .clone()
            .unwrap_or_else(|| vec![true; records.len()]))
    }

    async fn invest(
        &self,
        records: &[InvestmentRecord],
        chain_id: ChainId,
    ) -> Result<Option<TransactionHash>, GatewayError> {
        let top_up = {
            let mut state = self.state.lock().unwrap();
            state.invest_calls.push(records.to_vec());
            state.top_up_during_invest.take()
        };

        if let Some(top_up) = top_up {
            let result = top_up
                .store
                .create_or_update(chain_id, &top_up.wallet, &top_up.campaign, top_up.amount)
                .await
                .unwrap();
            self.state
                .lock()
                .unwrap()
                .top_up_results
                .push(result.map(|t| t.amount));
        }

        let state = self.state.lock().unwrap();
        Ok(state.invest_hash.clone().map(TransactionHash::new))
    }

    async fn contract_version(
        &self,
        _campaign: &ContractAddress,
        _chain_id: ChainId,
    ) -> Result<Option<ContractVersion>, GatewayError> {
        let state = self.state.lock().unwrap();
        Ok(state.version.clone().map(ContractVersion::new))
    }
}

// ============================================================================
// Test Setup
// ============================================================================

pub struct Harness {
    pub pool: Pool<Sqlite>,
    pub clock: ManualClock,
    pub ids: Arc<SequentialIds>,
    pub tasks: TaskStore,
    pub pending: PendingItems,
    pub gateway: Arc<MockGateway>,
    pub config: QueueConfig,
}

/// Fresh in-memory database, clock pinned to [`start_time`]
pub async fn harness() -> Harness {
    let pool = db::init_memory_db().await.unwrap();
    let clock = ManualClock::new(start_time());
    let ids = Arc::new(SequentialIds::new());
    let tasks = TaskStore::new(pool.clone(), Arc::new(clock.clone()), ids.clone(), "worker-a");
    let pending = PendingItems::new(pool.clone(), Arc::new(clock.clone()), tasks.clone());

    Harness {
        pool,
        clock,
        ids,
        tasks,
        pending,
        gateway: MockGateway::new(),
        config: QueueConfig::from_toml(CONFIG).unwrap(),
    }
}

impl Harness {
    pub fn gateway(&self) -> Arc<dyn ChainGateway> {
        self.gateway.clone()
    }

    /// Another worker process sharing the same database
    pub fn task_store(&self, owner: &str) -> TaskStore {
        TaskStore::new(self.pool.clone(), Arc::new(self.clock.clone()), self.ids.clone(), owner)
    }

    pub fn whitelist_queue(&self) -> WhitelistQueue {
        WhitelistQueue::new(
            self.gateway(),
            self.pending.clone(),
            self.config.chains_for(QueueKind::Whitelist),
        )
    }

    pub fn faucet_queue(&self) -> FaucetQueue {
        FaucetQueue::new(
            self.gateway(),
            self.pending.clone(),
            self.config.chains_for(QueueKind::Faucet),
        )
    }

    pub fn whitelist_worker(&self) -> QueueWorker<WhitelistQueue> {
        QueueWorker::new(self.whitelist_queue(), self.tasks.clone(), self.pending.clone(), &self.config)
            .unwrap()
    }

    pub fn faucet_worker(&self) -> QueueWorker<FaucetQueue> {
        QueueWorker::new(self.faucet_queue(), self.tasks.clone(), self.pending.clone(), &self.config)
            .unwrap()
    }

    pub fn auto_invest_store(&self, owner: &str) -> AutoInvestStore {
        AutoInvestStore::new(self.pool.clone(), Arc::new(self.clock.clone()), self.ids.clone(), owner)
    }

    pub fn auto_invest_queue(&self) -> AutoInvestQueue {
        AutoInvestQueue::new(
            self.auto_invest_store("worker-a"),
            self.gateway(),
            self.config.auto_invest.clone(),
            self.config.chains_for(QueueKind::AutoInvest),
        )
        .unwrap()
    }
}
