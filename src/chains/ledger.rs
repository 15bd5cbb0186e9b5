//! Ledger helpers
//!
//! One helper per ledger family, speaking the family's JSON-RPC dialect to
//! the configured node. Helpers cover the wallet capability set (balance,
//! transfer) plus a health probe; the lifecycle calls themselves go through
//! the ledger gateway.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::chains::traits::{
    Address, Amount, Asset, ChainType, LedgerError, LedgerResult, LedgerType, WalletProvider,
};
use crate::logging::mask_address;

/// ERC-20 `balanceOf(address)` selector
const BALANCE_OF_SELECTOR: &str = "70a08231";

#[derive(Debug, Clone, Copy)]
pub struct RpcTimeouts {
    pub request: Duration,
    /// Upper bound on waiting for a submitted transaction to be mined
    pub confirmation: Duration,
    pub poll_interval: Duration,
}

impl Default for RpcTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            confirmation: Duration::from_secs(300),
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcHealth {
    pub is_healthy: bool,
    pub rpc_url: String,
    pub response_time_ms: u64,
    pub last_check: String,
    pub error_message: Option<String>,
}

// ============================================================================
// JSON-RPC transport
// ============================================================================

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone)]
struct JsonRpcClient {
    http_client: Client,
    url: String,
    request_timeout: Duration,
}

impl JsonRpcClient {
    fn new(url: &str, request_timeout: Duration) -> LedgerResult<Self> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(LedgerError::config_error(format!(
                "RPC endpoint must be an http(s) URL: {}",
                url
            )));
        }

        let http_client = Client::builder()
            .timeout(request_timeout)
            .user_agent("Operate-Backend/1.0")
            .build()
            .map_err(|e| LedgerError::config_error(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            url: url.trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    /// Raw `result` of a call; `null` results come back as `JsonValue::Null`
    async fn call_raw(&self, method: &str, params: JsonValue) -> LedgerResult<JsonValue> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!(method = method, rpc = %self.url, "JSON-RPC request");

        let response = timeout(
            self.request_timeout,
            self.http_client.post(&self.url).json(&body).send(),
        )
        .await
        .map_err(|_| LedgerError::Timeout {
            seconds: self.request_timeout.as_secs(),
        })?
        .map_err(|e| {
            if e.is_timeout() {
                LedgerError::Timeout {
                    seconds: self.request_timeout.as_secs(),
                }
            } else {
                LedgerError::network_error(format!("RPC request failed: {}", e))
            }
        })?;

        let response = response
            .error_for_status()
            .map_err(|e| LedgerError::network_error(format!("RPC HTTP error: {}", e)))?;

        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|e| LedgerError::invalid_response(format!("JSON parsing error: {}", e)))?;

        if let Some(err) = envelope.error {
            warn!(method = method, code = err.code, message = %err.message, "JSON-RPC error");
            return Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        Ok(envelope.result.unwrap_or(JsonValue::Null))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: JsonValue) -> LedgerResult<T> {
        let result = self.call_raw(method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| LedgerError::invalid_response(format!("{}: {}", method, e)))
    }

    async fn health_check(&self, method: &str) -> RpcHealth {
        let start_time = Instant::now();
        let result = self.call_raw(method, json!([])).await;
        let response_time_ms = start_time.elapsed().as_millis() as u64;

        match result {
            Ok(_) => {
                info!(rpc = %self.url, response_time_ms, "RPC health check passed");
                RpcHealth {
                    is_healthy: true,
                    rpc_url: self.url.clone(),
                    response_time_ms,
                    last_check: chrono::Utc::now().to_rfc3339(),
                    error_message: None,
                }
            }
            Err(e) => {
                error!(rpc = %self.url, error = %e, "RPC health check failed");
                RpcHealth {
                    is_healthy: false,
                    rpc_url: self.url.clone(),
                    response_time_ms,
                    last_check: chrono::Utc::now().to_rfc3339(),
                    error_message: Some(e.to_string()),
                }
            }
        }
    }
}

/// Parse an Ethereum hex quantity (`0x1bc16d674ec80000`)
fn parse_quantity(value: &str) -> LedgerResult<Amount> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::invalid_response(format!("not a hex quantity: {}", value)))?;
    if digits.is_empty() {
        return Err(LedgerError::invalid_response("empty hex quantity"));
    }
    Amount::from_str_radix(digits, 16)
        .map_err(|e| LedgerError::invalid_response(format!("bad quantity {}: {}", value, e)))
}

/// Decode a 32-byte ABI word into an amount
fn decode_uint256(value: &str) -> LedgerResult<Amount> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    let padded = format!("{:0>64}", digits);
    let bytes = hex::decode(&padded)
        .map_err(|e| LedgerError::invalid_response(format!("bad ABI word {}: {}", value, e)))?;
    if bytes.len() != 32 {
        return Err(LedgerError::invalid_response(format!(
            "ABI word has {} bytes",
            bytes.len()
        )));
    }
    if bytes[..16].iter().any(|b| *b != 0) {
        return Err(LedgerError::invalid_response("token balance exceeds 128 bits"));
    }
    let mut low = [0_u8; 16];
    low.copy_from_slice(&bytes[16..]);
    Ok(Amount::from_be_bytes(low))
}

fn balance_of_calldata(owner: &Address) -> String {
    let owner = owner.as_str().trim_start_matches("0x").to_lowercase();
    format!("0x{}{:0>64}", BALANCE_OF_SELECTOR, owner)
}

// ============================================================================
// Ethereum family
// ============================================================================

#[derive(Debug, Deserialize)]
struct TransactionReceipt {
    status: Option<String>,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EthereumLedger {
    rpc: JsonRpcClient,
    timeouts: RpcTimeouts,
}

impl EthereumLedger {
    pub fn new(rpc: &str, timeouts: RpcTimeouts) -> LedgerResult<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(rpc, timeouts.request)?,
            timeouts,
        })
    }

    pub async fn balance(&self, address: &Address, asset: &Asset) -> LedgerResult<Amount> {
        address.validate(LedgerType::Ethereum)?;
        match asset {
            Asset::Native => {
                let quantity: String = self
                    .rpc
                    .call("eth_getBalance", json!([address.as_str(), "latest"]))
                    .await?;
                parse_quantity(&quantity)
            }
            Asset::Token(contract) => {
                contract.validate(LedgerType::Ethereum)?;
                let word: String = self
                    .rpc
                    .call(
                        "eth_call",
                        json!([
                            { "to": contract.as_str(), "data": balance_of_calldata(address) },
                            "latest"
                        ]),
                    )
                    .await?;
                decode_uint256(&word)
            }
        }
    }

    /// Send native currency from a node-managed account and wait for the receipt
    pub async fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> LedgerResult<String> {
        to.validate(LedgerType::Ethereum)?;

        let tx_hash: String = self
            .rpc
            .call(
                "eth_sendTransaction",
                json!([{
                    "from": from.as_str(),
                    "to": to.as_str(),
                    "value": format!("0x{:x}", amount),
                }]),
            )
            .await?;

        info!(
            tx_hash = %tx_hash,
            to = %mask_address(to.as_str()),
            amount = %amount,
            "Transfer submitted"
        );

        self.wait_for_receipt(&tx_hash).await?;
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> LedgerResult<()> {
        timeout(self.timeouts.confirmation, self.poll_receipt(tx_hash))
            .await
            .map_err(|_| LedgerError::Timeout {
                seconds: self.timeouts.confirmation.as_secs(),
            })?
    }

    async fn poll_receipt(&self, tx_hash: &str) -> LedgerResult<()> {
        loop {
            let receipt = self
                .rpc
                .call_raw("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;

            if !receipt.is_null() {
                let receipt: TransactionReceipt = serde_json::from_value(receipt)
                    .map_err(|e| LedgerError::invalid_response(format!("receipt: {}", e)))?;
                return match receipt.status.as_deref() {
                    Some("0x1") => {
                        debug!(
                            tx_hash = %tx_hash,
                            block = receipt.block_number.as_deref().unwrap_or("unknown"),
                            "Transaction confirmed"
                        );
                        Ok(())
                    }
                    status => Err(LedgerError::transaction_failed(format!(
                        "{} reverted with status {}",
                        tx_hash,
                        status.unwrap_or("none")
                    ))),
                };
            }

            tokio::time::sleep(self.timeouts.poll_interval).await;
        }
    }

    pub async fn chain_id(&self) -> LedgerResult<u64> {
        let quantity: String = self.rpc.call("eth_chainId", json!([])).await?;
        let id = parse_quantity(&quantity)?;
        u64::try_from(id).map_err(|_| LedgerError::invalid_response("chain id out of range"))
    }
}

// ============================================================================
// Solana family
// ============================================================================

#[derive(Debug, Deserialize)]
struct SolanaBalance {
    value: u64,
}

#[derive(Debug, Clone)]
pub struct SolanaLedger {
    rpc: JsonRpcClient,
}

impl SolanaLedger {
    pub fn new(rpc: &str, timeouts: RpcTimeouts) -> LedgerResult<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(rpc, timeouts.request)?,
        })
    }

    pub async fn balance(&self, address: &Address, asset: &Asset) -> LedgerResult<Amount> {
        address.validate(LedgerType::Solana)?;
        match asset {
            Asset::Native => {
                let balance: SolanaBalance =
                    self.rpc.call("getBalance", json!([address.as_str()])).await?;
                Ok(Amount::from(balance.value))
            }
            Asset::Token(_) => Err(LedgerError::Unsupported {
                operation: "token balance",
                ledger: LedgerType::Solana,
            }),
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Capability set of one ledger family
#[derive(Debug, Clone)]
pub enum LedgerHelper {
    Ethereum(EthereumLedger),
    Solana(SolanaLedger),
}

impl LedgerHelper {
    pub fn for_ledger(ledger_type: LedgerType, rpc: &str, timeouts: RpcTimeouts) -> LedgerResult<Self> {
        match ledger_type {
            LedgerType::Ethereum => Ok(LedgerHelper::Ethereum(EthereumLedger::new(rpc, timeouts)?)),
            LedgerType::Solana => Ok(LedgerHelper::Solana(SolanaLedger::new(rpc, timeouts)?)),
        }
    }

    pub fn ledger_type(&self) -> LedgerType {
        match self {
            LedgerHelper::Ethereum(_) => LedgerType::Ethereum,
            LedgerHelper::Solana(_) => LedgerType::Solana,
        }
    }

    /// Endpoint the helper talks to
    pub fn rpc_url(&self) -> &str {
        match self {
            LedgerHelper::Ethereum(ledger) => &ledger.rpc.url,
            LedgerHelper::Solana(ledger) => &ledger.rpc.url,
        }
    }

    pub async fn balance(&self, address: &Address, asset: &Asset) -> LedgerResult<Amount> {
        match self {
            LedgerHelper::Ethereum(ledger) => ledger.balance(address, asset).await,
            LedgerHelper::Solana(ledger) => ledger.balance(address, asset).await,
        }
    }

    pub async fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> LedgerResult<()> {
        match self {
            LedgerHelper::Ethereum(ledger) => ledger.transfer(from, to, amount).await.map(|_| ()),
            LedgerHelper::Solana(_) => Err(LedgerError::Unsupported {
                operation: "transfer",
                ledger: LedgerType::Solana,
            }),
        }
    }

    pub async fn health_check(&self) -> RpcHealth {
        match self {
            LedgerHelper::Ethereum(ledger) => ledger.rpc.health_check("eth_chainId").await,
            LedgerHelper::Solana(ledger) => ledger.rpc.health_check("getHealth").await,
        }
    }
}

// ============================================================================
// Master wallet
// ============================================================================

/// The operator's wallet on one ledger family, with a helper per chain
#[derive(Debug, Clone)]
pub struct MasterWallet {
    address: Address,
    safe: Option<Address>,
    ledger_type: LedgerType,
    helpers: HashMap<ChainType, LedgerHelper>,
}

impl MasterWallet {
    pub fn new(address: Address, safe: Option<Address>, ledger_type: LedgerType) -> Self {
        Self {
            address,
            safe,
            ledger_type,
            helpers: HashMap::new(),
        }
    }

    pub fn with_chain(mut self, chain: ChainType, helper: LedgerHelper) -> LedgerResult<Self> {
        if helper.ledger_type() != self.ledger_type || chain.ledger_type() != self.ledger_type {
            return Err(LedgerError::config_error(format!(
                "{} wallet cannot serve chain {}",
                self.ledger_type, chain
            )));
        }
        self.helpers.insert(chain, helper);
        Ok(self)
    }

    pub fn ledger_type(&self) -> LedgerType {
        self.ledger_type
    }

    pub fn helpers(&self) -> impl Iterator<Item = (&ChainType, &LedgerHelper)> {
        self.helpers.iter()
    }

    fn helper(&self, chain: ChainType) -> LedgerResult<&LedgerHelper> {
        self.helpers.get(&chain).ok_or_else(|| {
            LedgerError::config_error(format!("master wallet has no RPC for chain {}", chain))
        })
    }
}

#[async_trait]
impl WalletProvider for MasterWallet {
    fn address(&self) -> &Address {
        &self.address
    }

    fn safe_address(&self) -> Option<&Address> {
        self.safe.as_ref()
    }

    async fn balance(
        &self,
        chain: ChainType,
        address: &Address,
        asset: &Asset,
    ) -> LedgerResult<Amount> {
        self.helper(chain)?.balance(address, asset).await
    }

    async fn transfer(&self, chain: ChainType, to: &Address, amount: Amount) -> LedgerResult<()> {
        self.helper(chain)?.transfer(&self.address, to, amount).await
    }
}
