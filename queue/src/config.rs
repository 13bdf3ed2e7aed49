//! Queue Configuration
//!
//! Loaded from a TOML file. Every schedule knob is per queue kind so the
//! mining window and batch size can be tuned independently.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{ChainId, ContractVersion};
use crate::QueueKind;

/// Scheduling and batching parameters for one queue kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Run this queue at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Interval between ticks (ms)
    #[serde(default = "default_polling_ms")]
    pub polling_ms: u64,

    /// Delay before the first tick (ms)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// How long a submitted transaction may stay unmined (seconds)
    #[serde(default = "default_mining_period_secs")]
    pub mining_period_secs: u64,

    /// Max distinct items folded into one task per flush
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,

    /// Lease length on a locked row; must outlive the slowest gateway call
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_polling_ms() -> u64 {
    5_000
}

fn default_initial_delay_ms() -> u64 {
    15_000
}

fn default_mining_period_secs() -> u64 {
    600
}

fn default_max_batch_size() -> u32 {
    100
}

fn default_lock_timeout_secs() -> u64 {
    120
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            polling_ms: default_polling_ms(),
            initial_delay_ms: default_initial_delay_ms(),
            mining_period_secs: default_mining_period_secs(),
            max_batch_size: default_max_batch_size(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

impl QueueSettings {
    pub fn polling(&self) -> Duration {
        Duration::from_millis(self.polling_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn mining_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.mining_period_secs as i64)
    }

    pub fn lock_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lock_timeout_secs as i64)
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.polling_ms == 0 {
            return Err(ConfigError::Invalid(format!("{name}.polling_ms must be > 0")));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid(format!("{name}.max_batch_size must be > 0")));
        }
        if self.lock_timeout_secs == 0 {
            return Err(ConfigError::Invalid(format!("{name}.lock_timeout_secs must be > 0")));
        }
        Ok(())
    }
}

/// Auto-invest queue parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoInvestSettings {
    #[serde(flatten)]
    pub queue: QueueSettings,

    /// Pending tasks older than this are expired (seconds)
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Oldest campaign contract version that supports auto-invest
    #[serde(default = "default_min_contract_version")]
    pub min_contract_version: String,
}

fn default_task_timeout_secs() -> u64 {
    86_400
}

fn default_min_contract_version() -> String {
    "1.0.20".to_string()
}

impl Default for AutoInvestSettings {
    fn default() -> Self {
        Self {
            queue: QueueSettings::default(),
            task_timeout_secs: default_task_timeout_secs(),
            min_contract_version: default_min_contract_version(),
        }
    }
}

impl AutoInvestSettings {
    pub fn task_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.task_timeout_secs as i64)
    }

    pub fn min_version(&self) -> ContractVersion {
        ContractVersion::new(self.min_contract_version.clone())
    }
}

/// A chain the service can talk to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub id: ChainId,

    #[serde(default)]
    pub name: String,

    /// Node JSON-RPC endpoint
    pub rpc_url: String,

    /// Signing relayer endpoint for state-changing calls
    pub relayer_url: String,

    /// Queue feature flags. Every flag is off unless set.
    #[serde(default)]
    pub whitelist: bool,

    #[serde(default)]
    pub faucet: bool,

    #[serde(default)]
    pub auto_invest: bool,
}

impl ChainConfig {
    /// Whether this chain accepts work for the given queue kind
    pub fn supports(&self, kind: QueueKind) -> bool {
        match kind {
            QueueKind::Whitelist => self.whitelist,
            QueueKind::Faucet => self.faucet,
            QueueKind::AutoInvest => self.auto_invest,
        }
    }
}

/// Root configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub whitelist: QueueSettings,

    #[serde(default)]
    pub faucet: QueueSettings,

    #[serde(default)]
    pub auto_invest: AutoInvestSettings,

    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

impl QueueConfig {
    /// Load and validate config from a TOML file
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.whitelist.validate("whitelist")?;
        self.faucet.validate("faucet")?;
        self.auto_invest.queue.validate("auto_invest")?;

        if self.chains.is_empty() {
            return Err(ConfigError::Invalid("at least one [[chains]] entry is required".into()));
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.id) {
                return Err(ConfigError::Invalid(format!("duplicate chain id {}", chain.id)));
            }
        }
        Ok(())
    }

    pub fn chain(&self, id: ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.id == id)
    }

    pub fn settings(&self, kind: QueueKind) -> &QueueSettings {
        match kind {
            QueueKind::Whitelist => &self.whitelist,
            QueueKind::Faucet => &self.faucet,
            QueueKind::AutoInvest => &self.auto_invest.queue,
        }
    }

    /// Chain ids that accept work for `kind`
    pub fn chains_for(&self, kind: QueueKind) -> Vec<ChainId> {
        self.chains
            .iter()
            .filter(|c| c.supports(kind))
            .map(|c| c.id)
            .collect()
    }
}
