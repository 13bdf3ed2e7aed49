//! Chain Gateway interface.
//!
//! Everything that signs, submits, or reads chain state sits behind this
//! trait. The queue never holds a database transaction open across a call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::types::{ChainId, ContractAddress, ContractVersion, TokenAmount, TransactionHash, WalletAddress};

/// One investment the relayer makes on behalf of a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestmentRecord {
    pub investor: WalletAddress,
    pub campaign: ContractAddress,
    pub amount: TokenAmount,
}

#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Whitelist `addresses` on the issuer contract. `None` means nothing was
    /// submitted yet and the caller should try again later.
    async fn whitelist_addresses(
        &self,
        addresses: &[WalletAddress],
        issuer: &ContractAddress,
        chain_id: ChainId,
    ) -> Result<Option<TransactionHash>, GatewayError>;

    async fn is_whitelisted(
        &self,
        address: &WalletAddress,
        issuer: &ContractAddress,
        chain_id: ChainId,
    ) -> Result<bool, GatewayError>;

    async fn send_faucet_funds(
        &self,
        addresses: &[WalletAddress],
        chain_id: ChainId,
    ) -> Result<Option<TransactionHash>, GatewayError>;

    async fn is_mined(&self, hash: &TransactionHash, chain_id: ChainId) -> Result<bool, GatewayError>;

    /// One answer per record, in order
    async fn investment_readiness(
        &self,
        records: &[InvestmentRecord],
        chain_id: ChainId,
    ) -> Result<Vec<bool>, GatewayError>;

    async fn invest(
        &self,
        records: &[InvestmentRecord],
        chain_id: ChainId,
    ) -> Result<Option<TransactionHash>, GatewayError>;

    /// Campaign contract version, `None` for contracts that predate versioning
    async fn contract_version(
        &self,
        campaign: &ContractAddress,
        chain_id: ChainId,
    ) -> Result<Option<ContractVersion>, GatewayError>;
}

/// An empty hash is the same answer as no hash
pub fn submitted(hash: Option<TransactionHash>) -> Option<TransactionHash> {
    hash.filter(|h| !h.is_empty())
}
