use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use crate::config::ChainProfile;
use crate::services::record::LedgerConfig;

/// Amounts are always expressed in the chain's smallest unit (wei, lamports, ...).
pub type Amount = u128;

/// ChainType enumeration for ledger dispatching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    /// Ethereum mainnet
    Ethereum,
    /// Gnosis chain (xDai)
    Gnosis,
    /// Goerli testnet
    Goerli,
    /// Solana mainnet-beta
    Solana,
}

impl ChainType {
    pub const ALL: [ChainType; 4] = [
        ChainType::Ethereum,
        ChainType::Gnosis,
        ChainType::Goerli,
        ChainType::Solana,
    ];

    /// Get chain identifier string
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainType::Ethereum => "ethereum",
            ChainType::Gnosis => "gnosis",
            ChainType::Goerli => "goerli",
            ChainType::Solana => "solana",
        }
    }

    /// Ledger family the chain belongs to
    pub fn ledger_type(&self) -> LedgerType {
        match self {
            ChainType::Solana => LedgerType::Solana,
            ChainType::Ethereum | ChainType::Gnosis | ChainType::Goerli => LedgerType::Ethereum,
        }
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChainType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ethereum" | "eth" | "mainnet" => Ok(ChainType::Ethereum),
            "gnosis" | "xdai" => Ok(ChainType::Gnosis),
            "goerli" => Ok(ChainType::Goerli),
            "solana" | "sol" => Ok(ChainType::Solana),
            other => Err(LedgerError::config_error(format!("unknown chain: {}", other))),
        }
    }
}

/// Ledger family; one helper implementation exists per family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LedgerType {
    Ethereum,
    Solana,
}

impl LedgerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerType::Ethereum => "ethereum",
            LedgerType::Solana => "solana",
        }
    }
}

impl fmt::Display for LedgerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LedgerType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ethereum" | "evm" => Ok(LedgerType::Ethereum),
            "solana" => Ok(LedgerType::Solana),
            other => Err(LedgerError::config_error(format!(
                "unknown ledger type: {}",
                other
            ))),
        }
    }
}

fn evm_address_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid regex"))
}

fn solana_address_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("valid regex"))
}

/// On-chain account address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the address format for the given ledger family
    pub fn validate(&self, ledger: LedgerType) -> LedgerResult<()> {
        let valid = match ledger {
            LedgerType::Ethereum => evm_address_regex().is_match(&self.0),
            LedgerType::Solana => solana_address_regex().is_match(&self.0),
        };
        if valid {
            Ok(())
        } else {
            Err(LedgerError::InvalidAddress {
                address: self.0.clone(),
            })
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// On-chain service id. `-1` marks a service that was never minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub i64);

impl TokenId {
    pub const UNMINTED: TokenId = TokenId(-1);

    pub fn is_minted(&self) -> bool {
        *self != Self::UNMINTED
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::UNMINTED
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asset whose balance is queried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "address", rename_all = "lowercase")]
pub enum Asset {
    /// The chain's native currency
    Native,
    /// A fungible token contract (ERC-20 on Ethereum-family chains)
    Token(Address),
}

/// Private signing material handed out by the key provider.
///
/// Never printed: `Debug` and `Display` are redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Agent key as returned by the key provider
#[derive(Debug, Clone)]
pub struct AgentKey {
    pub address: Address,
    pub credential: Credential,
}

/// Parameters for minting a service package on-chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    /// Reference of the service package (its content hash)
    pub package: String,
    pub agent_id: u32,
    pub number_of_slots: u32,
    pub cost_of_bond: Amount,
    pub threshold: u32,
    pub nft: String,
    /// Token of the superseded service when minting as part of an update
    pub update_token: Option<TokenId>,
    /// Bond token (OLAS) when the service is minted for staking
    pub staking_token: Option<Address>,
}

/// On-chain view of a deployed service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub instances: Vec<Address>,
    pub multisig: Option<Address>,
}

/// Common result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Unified error type for all collaborator (gateway, wallet, key) operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid address: {address}")]
    InvalidAddress { address: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Operation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Transaction failed: {message}")]
    TransactionFailed { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("{operation} is not supported on {ledger} ledgers")]
    Unsupported {
        operation: &'static str,
        ledger: LedgerType,
    },

    #[error("Key not found: {key_id}")]
    KeyNotFound { key_id: String },

    #[error("Config error: {message}")]
    ConfigError { message: String },
}

impl LedgerError {
    pub fn network_error(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn transaction_failed(message: impl Into<String>) -> Self {
        Self::TransactionFailed {
            message: message.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }
}

/// Ledger gateway for one chain/account.
///
/// Performs the on-chain service operations. Every mutating call returns only
/// once the transaction is confirmed (or failed).
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn mint(&self, request: MintRequest) -> LedgerResult<TokenId>;

    async fn activate(&self, token: TokenId, staking_token: Option<&Address>) -> LedgerResult<()>;

    async fn register(
        &self,
        token: TokenId,
        instances: &[Address],
        agent_ids: &[u32],
    ) -> LedgerResult<()>;

    async fn deploy(
        &self,
        token: TokenId,
        reuse_multisig: bool,
        staking_token: Option<&Address>,
    ) -> LedgerResult<()>;

    async fn terminate(&self, token: TokenId, staking_token: Option<&Address>) -> LedgerResult<()>;

    async fn unbond(&self, token: TokenId, staking_token: Option<&Address>) -> LedgerResult<()>;

    async fn stake(
        &self,
        token: TokenId,
        service_registry: &Address,
        staking_contract: &Address,
    ) -> LedgerResult<()>;

    async fn unstake(&self, token: TokenId, staking_contract: &Address) -> LedgerResult<()>;

    /// Hand the service multisig over to `owner`
    async fn swap(
        &self,
        token: TokenId,
        multisig: &Address,
        owner: &Credential,
    ) -> LedgerResult<()>;

    async fn info(&self, token: TokenId) -> LedgerResult<ServiceInfo>;

    async fn staking_slots_available(&self, staking_contract: &Address) -> LedgerResult<bool>;
}

/// Connects a ledger gateway for a service's ledger configuration
pub trait GatewayFactory: Send + Sync {
    fn connect(
        &self,
        ledger: &LedgerConfig,
        profile: &ChainProfile,
    ) -> LedgerResult<Arc<dyn LedgerGateway>>;
}

/// Master wallet of one ledger family
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Address of the wallet's own account
    fn address(&self) -> &Address;

    /// Shared account ("safe") owned by the wallet
    fn safe_address(&self) -> Option<&Address>;

    async fn balance(
        &self,
        chain: ChainType,
        address: &Address,
        asset: &Asset,
    ) -> LedgerResult<Amount>;

    async fn transfer(&self, chain: ChainType, to: &Address, amount: Amount) -> LedgerResult<()>;
}

/// Agent key custody
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Create a new key and return its id
    async fn create(&self) -> LedgerResult<String>;

    async fn get(&self, key_id: &str) -> LedgerResult<AgentKey>;
}
