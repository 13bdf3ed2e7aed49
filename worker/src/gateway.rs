//! JSON-RPC Chain Gateway
//!
//! Mining checks go straight to the chain node. Everything that needs a
//! signature or a contract read goes to the chain's relayer.

use async_trait::async_trait;
use chain_queue::{
    ChainConfig, ChainGateway, ChainId, ContractAddress, ContractVersion, GatewayError,
    InvestmentRecord, TransactionHash, WalletAddress,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Endpoints for one chain
#[derive(Debug, Clone)]
struct Endpoints {
    rpc_url: String,
    relayer_url: String,
}

pub struct JsonRpcGateway {
    client: reqwest::Client,
    chains: HashMap<ChainId, Endpoints>,
}

impl JsonRpcGateway {
    pub fn new(chains: &[ChainConfig], timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let chains = chains
            .iter()
            .map(|c| {
                (
                    c.id,
                    Endpoints {
                        rpc_url: c.rpc_url.clone(),
                        relayer_url: c.relayer_url.clone(),
                    },
                )
            })
            .collect();

        Ok(Self { client, chains })
    }

    fn endpoints(&self, chain_id: ChainId) -> Result<&Endpoints, GatewayError> {
        self.chains
            .get(&chain_id)
            .ok_or(GatewayError::MissingConfig(chain_id))
    }

    async fn call(&self, url: &str, method: &str, params: Value) -> Result<Value, GatewayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!("JSON-RPC {} -> {}", method, url);

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;

        into_result(json)
    }

    async fn relayer(&self, chain_id: ChainId, method: &str, params: Value) -> Result<Value, GatewayError> {
        let url = self.endpoints(chain_id)?.relayer_url.clone();
        self.call(&url, method, params).await
    }
}

// =============================================================================
// Response parsing
// =============================================================================

/// Pull `result` out of a JSON-RPC envelope
fn into_result(mut json: Value) -> Result<Value, GatewayError> {
    if let Some(error) = json.get("error") {
        if !error.is_null() {
            return Err(GatewayError::Rpc(error.to_string()));
        }
    }
    match json.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(GatewayError::Parse("No result in response".to_string())),
    }
}

/// Null or blank means nothing was submitted
fn parse_hash(result: &Value) -> Result<Option<TransactionHash>, GatewayError> {
    match result {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(TransactionHash::new(s.clone()))),
        other => Err(GatewayError::Parse(format!("Expected tx hash, got {}", other))),
    }
}

fn parse_bool(result: &Value) -> Result<bool, GatewayError> {
    result
        .as_bool()
        .ok_or_else(|| GatewayError::Parse(format!("Expected bool, got {}", result)))
}

fn parse_bools(result: &Value) -> Result<Vec<bool>, GatewayError> {
    let items = result
        .as_array()
        .ok_or_else(|| GatewayError::Parse(format!("Expected array, got {}", result)))?;
    items.iter().map(parse_bool).collect()
}

fn parse_version(result: &Value) -> Result<Option<ContractVersion>, GatewayError> {
    match result {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(ContractVersion::new(s.trim()))),
        other => Err(GatewayError::Parse(format!("Expected version, got {}", other))),
    }
}

fn addresses(list: &[WalletAddress]) -> Vec<&str> {
    list.iter().map(|a| a.as_str()).collect()
}

fn records(list: &[InvestmentRecord]) -> Result<Value, GatewayError> {
    serde_json::to_value(list).map_err(|e| GatewayError::Parse(e.to_string()))
}

#[async_trait]
impl ChainGateway for JsonRpcGateway {
    async fn whitelist_addresses(
        &self,
        addresses_to_add: &[WalletAddress],
        issuer: &ContractAddress,
        chain_id: ChainId,
    ) -> Result<Option<TransactionHash>, GatewayError> {
        let params = json!([issuer.as_str(), addresses(addresses_to_add)]);
        let result = self.relayer(chain_id, "relayer_whitelistAddresses", params).await?;
        parse_hash(&result)
    }

    async fn is_whitelisted(
        &self,
        address: &WalletAddress,
        issuer: &ContractAddress,
        chain_id: ChainId,
    ) -> Result<bool, GatewayError> {
        let params = json!([issuer.as_str(), address.as_str()]);
        let result = self.relayer(chain_id, "relayer_isWhitelisted", params).await?;
        parse_bool(&result)
    }

    async fn send_faucet_funds(
        &self,
        recipients: &[WalletAddress],
        chain_id: ChainId,
    ) -> Result<Option<TransactionHash>, GatewayError> {
        let params = json!([addresses(recipients)]);
        let result = self.relayer(chain_id, "relayer_sendFaucetFunds", params).await?;
        parse_hash(&result)
    }

    async fn is_mined(&self, hash: &TransactionHash, chain_id: ChainId) -> Result<bool, GatewayError> {
        let url = self.endpoints(chain_id)?.rpc_url.clone();
        let receipt = self
            .call(&url, "eth_getTransactionReceipt", json!([hash.as_str()]))
            .await?;
        Ok(!receipt.is_null())
    }

    async fn investment_readiness(
        &self,
        batch: &[InvestmentRecord],
        chain_id: ChainId,
    ) -> Result<Vec<bool>, GatewayError> {
        let params = json!([records(batch)?]);
        let result = self.relayer(chain_id, "relayer_investmentStatus", params).await?;
        parse_bools(&result)
    }

    async fn invest(
        &self,
        batch: &[InvestmentRecord],
        chain_id: ChainId,
    ) -> Result<Option<TransactionHash>, GatewayError> {
        let params = json!([records(batch)?]);
        let result = self.relayer(chain_id, "relayer_investFor", params).await?;
        parse_hash(&result)
    }

    async fn contract_version(
        &self,
        campaign: &ContractAddress,
        chain_id: ChainId,
    ) -> Result<Option<ContractVersion>, GatewayError> {
        let result = self
            .relayer(chain_id, "relayer_contractVersion", json!([campaign.as_str()]))
            .await?;
        parse_version(&result)
    }
}
