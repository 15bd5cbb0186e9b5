//! Application configuration module
//! Handles environment variable loading, configuration validation and the
//! per-chain profiles injected into the service manager

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::chains::traits::{Address, ChainType, LedgerType};

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub wallet: WalletConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Service record storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub home: PathBuf,
    /// Optional chain profiles file (TOML or JSON)
    pub chain_profiles: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// External on-chain manager the ledger gateway forwards to
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub request_timeout: u64, // seconds
}

/// Master wallet configuration
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub address: Address,
    pub safe_address: Option<Address>,
    pub ledger_type: LedgerType,
    pub confirmation_timeout: u64, // seconds
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            wallet: WalletConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.storage.validate()?;
        self.logging.validate()?;
        self.gateway.validate()?;
        self.wallet.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(StorageConfig {
            home: env::var("OPERATE_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".operate")),
            chain_profiles: env::var("OPERATE_CHAIN_PROFILES").ok().map(PathBuf::from),
        })
    }

    /// Directory holding one sub-directory per service hash
    pub fn services_dir(&self) -> PathBuf {
        self.home.join("services")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.home.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue("OPERATE_HOME".to_string()));
        }

        if let Some(path) = &self.chain_profiles {
            if !path.exists() {
                return Err(ConfigError::InvalidValue(format!(
                    "OPERATE_CHAIN_PROFILES points to a missing file: {}",
                    path.display()
                )));
            }
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(GatewayConfig {
            url: env::var("LEDGER_GATEWAY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8765".to_string()),
            request_timeout: env::var("LEDGER_GATEWAY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("LEDGER_GATEWAY_TIMEOUT_SECS".to_string())
                })?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "LEDGER_GATEWAY_URL must be a valid URL".to_string(),
            ));
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "LEDGER_GATEWAY_TIMEOUT_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

impl WalletConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WalletConfig {
            address: env::var("MASTER_WALLET_ADDRESS")
                .map(Address::new)
                .map_err(|_| ConfigError::MissingVariable("MASTER_WALLET_ADDRESS".to_string()))?,
            safe_address: env::var("MASTER_SAFE_ADDRESS").ok().map(Address::new),
            ledger_type: env::var("MASTER_WALLET_LEDGER")
                .unwrap_or_else(|_| "ethereum".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MASTER_WALLET_LEDGER".to_string()))?,
            confirmation_timeout: env::var("TX_CONFIRMATION_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("TX_CONFIRMATION_TIMEOUT_SECS".to_string())
                })?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.address
            .validate(self.ledger_type)
            .map_err(|_| ConfigError::InvalidValue("MASTER_WALLET_ADDRESS".to_string()))?;

        if let Some(safe) = &self.safe_address {
            safe.validate(self.ledger_type)
                .map_err(|_| ConfigError::InvalidValue("MASTER_SAFE_ADDRESS".to_string()))?;
        }

        if self.confirmation_timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "TX_CONFIRMATION_TIMEOUT_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Chain profiles
// ============================================================================

/// Protocol contract addresses on one chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractAddresses {
    pub service_registry: Option<Address>,
    pub service_registry_token_utility: Option<Address>,
    pub service_manager: Option<Address>,
}

/// Everything chain-specific the lifecycle needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainProfile {
    pub chain: ChainType,
    pub ledger_type: LedgerType,
    pub default_rpc: String,
    pub currency_denom: String,
    pub contracts: ContractAddresses,
    pub staking_contract: Option<Address>,
    pub olas_token: Option<Address>,
}

impl ChainProfile {
    /// Built-in profile: default RPC and currency, no contracts
    pub fn defaults(chain: ChainType) -> Self {
        let (default_rpc, currency_denom) = match chain {
            ChainType::Ethereum => ("https://ethereum.publicnode.com", "Wei"),
            ChainType::Gnosis => ("https://rpc.gnosischain.com", "xDai"),
            ChainType::Goerli => ("https://ethereum-goerli.publicnode.com", "GWei"),
            ChainType::Solana => ("https://api.mainnet-beta.solana.com", "Lamp"),
        };

        ChainProfile {
            chain,
            ledger_type: chain.ledger_type(),
            default_rpc: default_rpc.to_string(),
            currency_denom: currency_denom.to_string(),
            contracts: ContractAddresses::default(),
            staking_contract: None,
            olas_token: None,
        }
    }

    pub fn service_registry(&self) -> Result<&Address, ConfigError> {
        self.contracts
            .service_registry
            .as_ref()
            .ok_or_else(|| self.missing("contracts.service_registry"))
    }

    pub fn staking_contract(&self) -> Result<&Address, ConfigError> {
        self.staking_contract
            .as_ref()
            .ok_or_else(|| self.missing("staking_contract"))
    }

    pub fn olas_token(&self) -> Result<&Address, ConfigError> {
        self.olas_token
            .as_ref()
            .ok_or_else(|| self.missing("olas_token"))
    }

    fn missing(&self, field: &str) -> ConfigError {
        ConfigError::MissingVariable(format!("{}.{}", self.chain, field))
    }

    fn apply(&mut self, overrides: ProfileOverride) {
        if let Some(rpc) = overrides.default_rpc {
            self.default_rpc = rpc;
        }
        if let Some(denom) = overrides.currency_denom {
            self.currency_denom = denom;
        }
        if let Some(contracts) = overrides.contracts {
            if contracts.service_registry.is_some() {
                self.contracts.service_registry = contracts.service_registry;
            }
            if contracts.service_registry_token_utility.is_some() {
                self.contracts.service_registry_token_utility =
                    contracts.service_registry_token_utility;
            }
            if contracts.service_manager.is_some() {
                self.contracts.service_manager = contracts.service_manager;
            }
        }
        if overrides.staking_contract.is_some() {
            self.staking_contract = overrides.staking_contract;
        }
        if overrides.olas_token.is_some() {
            self.olas_token = overrides.olas_token;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.default_rpc.starts_with("http://") && !self.default_rpc.starts_with("https://") {
            return Err(ConfigError::InvalidValue(format!(
                "{}.default_rpc must be a valid URL",
                self.chain
            )));
        }

        let addresses = [
            ("contracts.service_registry", &self.contracts.service_registry),
            (
                "contracts.service_registry_token_utility",
                &self.contracts.service_registry_token_utility,
            ),
            ("contracts.service_manager", &self.contracts.service_manager),
            ("staking_contract", &self.staking_contract),
            ("olas_token", &self.olas_token),
        ];
        for (field, address) in addresses {
            if let Some(address) = address {
                address.validate(self.ledger_type).map_err(|_| {
                    ConfigError::InvalidValue(format!("{}.{}", self.chain, field))
                })?;
            }
        }

        Ok(())
    }
}

/// Partial profile as read from a profiles file or the environment
#[derive(Debug, Default, Deserialize)]
struct ProfileOverride {
    default_rpc: Option<String>,
    currency_denom: Option<String>,
    contracts: Option<ContractAddresses>,
    staking_contract: Option<Address>,
    olas_token: Option<Address>,
}

/// Chain-keyed configuration map handed to the service manager
#[derive(Debug, Clone, PartialEq)]
pub struct ChainProfiles {
    profiles: HashMap<ChainType, ChainProfile>,
}

impl Default for ChainProfiles {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ChainProfiles {
    /// Defaults for every supported chain
    pub fn builtin() -> Self {
        let profiles = ChainType::ALL
            .iter()
            .map(|chain| (*chain, ChainProfile::defaults(*chain)))
            .collect();
        Self { profiles }
    }

    /// Built-in defaults layered with an optional profiles file and
    /// `OPERATE__<CHAIN>__<FIELD>` environment variables
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let environment = config::Environment::with_prefix("OPERATE")
            .prefix_separator("__")
            .separator("__");
        Self::from_sources(file, environment)
    }

    pub fn from_sources(
        file: Option<&Path>,
        environment: config::Environment,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(environment)
            .build()
            .map_err(|e| ConfigError::ValidationFailed(format!("chain profiles: {}", e)))?;

        let overrides: HashMap<String, ProfileOverride> = settings
            .try_deserialize()
            .map_err(|e| ConfigError::ValidationFailed(format!("chain profiles: {}", e)))?;

        let mut profiles = Self::builtin();
        for (name, profile_override) in overrides {
            let chain: ChainType = name.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("unknown chain in profiles: {}", name))
            })?;
            if let Some(profile) = profiles.profiles.get_mut(&chain) {
                profile.apply(profile_override);
            }
        }

        profiles.validate()?;
        Ok(profiles)
    }

    /// Replace one chain's profile
    pub fn with_profile(mut self, profile: ChainProfile) -> Self {
        self.profiles.insert(profile.chain, profile);
        self
    }

    pub fn get(&self, chain: ChainType) -> Option<&ChainProfile> {
        self.profiles.get(&chain)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainProfile> {
        self.profiles.values()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for profile in self.profiles.values() {
            profile.validate()?;
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<std::num::ParseIntError> for ConfigError {
    fn from(_: std::num::ParseIntError) -> Self {
        ConfigError::InvalidValue("Failed to parse integer value".to_string())
    }
}
