//! Shared fixtures for the lifecycle integration tests
//!
//! Mock collaborators record every call so tests can assert exactly which
//! on-chain operations an orchestrator operation issued.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use operate_backend::chains::traits::{
    Address, AgentKey, Amount, Asset, ChainType, Credential, GatewayFactory, KeyProvider,
    LedgerError, LedgerGateway, LedgerResult, LedgerType, MintRequest, ServiceInfo, TokenId,
    WalletProvider,
};
use operate_backend::config::{ChainProfile, ChainProfiles, ContractAddresses};
use operate_backend::services::{
    FundRequirements, LedgerConfig, ServiceManager, ServiceRequest, UserParams,
};
use operate_backend::storage::FileServiceRepository;

pub const RPC: &str = "http://localhost:8545";
pub const SERVICE_REGISTRY: &str = "0x9338b5153AE39BB89f50468E608eD9d764B755fD";
pub const STAKING_CONTRACT: &str = "0x5add592ce0a1B5DceCebB5Dcac086Cd9F9e3eA5C";
pub const OLAS_TOKEN: &str = "0xcE11e14225575945b8E6Dc0D4F2dD4C570f79d9f";
pub const MULTISIG: &str = "0x5aFE7fD7e7e3A3b3D6C1c9fB7b0b0E0c0a0b0C0d";
pub const WALLET: &str = "0x8ba1f109551bD432803012645Ac136ddd64DBA72";
pub const WALLET_SAFE: &str = "0x71C7656EC7ab88b098defB751B7401B5f6d8976F";

// ============================================================================
// Ledger gateway
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Mint(MintRequest),
    Activate(TokenId),
    Register {
        token: TokenId,
        instances: Vec<Address>,
        agent_ids: Vec<u32>,
    },
    Deploy {
        token: TokenId,
        reuse_multisig: bool,
    },
    Terminate(TokenId),
    Unbond(TokenId),
    Stake(TokenId),
    Unstake(TokenId),
    Swap {
        token: TokenId,
        multisig: Address,
        owner: String,
    },
    Info(TokenId),
    StakingSlots,
}

impl GatewayCall {
    pub fn name(&self) -> &'static str {
        match self {
            GatewayCall::Mint(_) => "mint",
            GatewayCall::Activate(_) => "activate",
            GatewayCall::Register { .. } => "register",
            GatewayCall::Deploy { .. } => "deploy",
            GatewayCall::Terminate(_) => "terminate",
            GatewayCall::Unbond(_) => "unbond",
            GatewayCall::Stake(_) => "stake",
            GatewayCall::Unstake(_) => "unstake",
            GatewayCall::Swap { .. } => "swap",
            GatewayCall::Info(_) => "info",
            GatewayCall::StakingSlots => "staking_slots",
        }
    }
}

/// Records every call; one operation can be made to fail
pub struct MockGateway {
    calls: Mutex<Vec<GatewayCall>>,
    next_token: Mutex<i64>,
    fail_on: Mutex<Option<&'static str>>,
    slots_available: Mutex<bool>,
    registered: Mutex<Vec<Address>>,
    info: Mutex<Option<ServiceInfo>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_token: Mutex::new(1),
            fail_on: Mutex::new(None),
            slots_available: Mutex::new(true),
            registered: Mutex::new(Vec::new()),
            info: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.calls().iter().map(GatewayCall::name).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail_on(&self, operation: Option<&'static str>) {
        *self.fail_on.lock().unwrap() = operation;
    }

    pub fn set_slots_available(&self, available: bool) {
        *self.slots_available.lock().unwrap() = available;
    }

    pub fn set_next_token(&self, token: i64) {
        *self.next_token.lock().unwrap() = token;
    }

    /// Fixed answer for `info`, instead of the last registered instances
    pub fn set_info(&self, info: ServiceInfo) {
        *self.info.lock().unwrap() = Some(info);
    }

    fn record(&self, call: GatewayCall) -> LedgerResult<()> {
        let name = call.name();
        self.calls.lock().unwrap().push(call);
        if *self.fail_on.lock().unwrap() == Some(name) {
            return Err(LedgerError::transaction_failed(format!("{} reverted", name)));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerGateway for MockGateway {
    async fn mint(&self, request: MintRequest) -> LedgerResult<TokenId> {
        self.record(GatewayCall::Mint(request))?;
        let mut next = self.next_token.lock().unwrap();
        let token = TokenId(*next);
        *next += 1;
        Ok(token)
    }

    async fn activate(&self, token: TokenId, _: Option<&Address>) -> LedgerResult<()> {
        self.record(GatewayCall::Activate(token))
    }

    async fn register(
        &self,
        token: TokenId,
        instances: &[Address],
        agent_ids: &[u32],
    ) -> LedgerResult<()> {
        self.record(GatewayCall::Register {
            token,
            instances: instances.to_vec(),
            agent_ids: agent_ids.to_vec(),
        })?;
        *self.registered.lock().unwrap() = instances.to_vec();
        Ok(())
    }

    async fn deploy(
        &self,
        token: TokenId,
        reuse_multisig: bool,
        _: Option<&Address>,
    ) -> LedgerResult<()> {
        self.record(GatewayCall::Deploy {
            token,
            reuse_multisig,
        })
    }

    async fn terminate(&self, token: TokenId, _: Option<&Address>) -> LedgerResult<()> {
        self.record(GatewayCall::Terminate(token))
    }

    async fn unbond(&self, token: TokenId, _: Option<&Address>) -> LedgerResult<()> {
        self.record(GatewayCall::Unbond(token))
    }

    async fn stake(&self, token: TokenId, _: &Address, _: &Address) -> LedgerResult<()> {
        self.record(GatewayCall::Stake(token))
    }

    async fn unstake(&self, token: TokenId, _: &Address) -> LedgerResult<()> {
        self.record(GatewayCall::Unstake(token))
    }

    async fn swap(&self, token: TokenId, multisig: &Address, owner: &Credential) -> LedgerResult<()> {
        self.record(GatewayCall::Swap {
            token,
            multisig: multisig.clone(),
            owner: owner.expose().to_string(),
        })
    }

    async fn info(&self, token: TokenId) -> LedgerResult<ServiceInfo> {
        self.record(GatewayCall::Info(token))?;
        if let Some(info) = self.info.lock().unwrap().clone() {
            return Ok(info);
        }
        Ok(ServiceInfo {
            instances: self.registered.lock().unwrap().clone(),
            multisig: Some(Address::new(MULTISIG)),
        })
    }

    async fn staking_slots_available(&self, _: &Address) -> LedgerResult<bool> {
        self.record(GatewayCall::StakingSlots)?;
        Ok(*self.slots_available.lock().unwrap())
    }
}

pub struct MockFactory {
    pub gateway: Arc<MockGateway>,
}

impl GatewayFactory for MockFactory {
    fn connect(
        &self,
        _: &LedgerConfig,
        _: &ChainProfile,
    ) -> LedgerResult<Arc<dyn LedgerGateway>> {
        let gateway: Arc<dyn LedgerGateway> = self.gateway.clone();
        Ok(gateway)
    }
}

// ============================================================================
// Wallet
// ============================================================================

pub struct MockWallet {
    address: Address,
    safe: Option<Address>,
    native: Mutex<HashMap<Address, Amount>>,
    olas: Mutex<Amount>,
    transfers: Mutex<Vec<(Address, Amount)>>,
}

impl MockWallet {
    pub fn new(olas: Amount) -> Self {
        Self {
            address: Address::new(WALLET),
            safe: Some(Address::new(WALLET_SAFE)),
            native: Mutex::new(HashMap::new()),
            olas: Mutex::new(olas),
            transfers: Mutex::new(Vec::new()),
        }
    }

    pub fn set_native(&self, address: &Address, amount: Amount) {
        self.native.lock().unwrap().insert(address.clone(), amount);
    }

    pub fn set_olas(&self, amount: Amount) {
        *self.olas.lock().unwrap() = amount;
    }

    pub fn transfers(&self) -> Vec<(Address, Amount)> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    fn address(&self) -> &Address {
        &self.address
    }

    fn safe_address(&self) -> Option<&Address> {
        self.safe.as_ref()
    }

    async fn balance(&self, _: ChainType, address: &Address, asset: &Asset) -> LedgerResult<Amount> {
        match asset {
            Asset::Native => Ok(*self.native.lock().unwrap().get(address).unwrap_or(&0)),
            Asset::Token(_) => Ok(*self.olas.lock().unwrap()),
        }
    }

    async fn transfer(&self, _: ChainType, to: &Address, amount: Amount) -> LedgerResult<()> {
        *self.native.lock().unwrap().entry(to.clone()).or_insert(0) += amount;
        self.transfers.lock().unwrap().push((to.clone(), amount));
        Ok(())
    }
}

// ============================================================================
// Keys
// ============================================================================

/// Hands out sequential keys `key-0`, `key-1`, ...
#[derive(Default)]
pub struct MockKeys {
    created: Mutex<u32>,
}

impl MockKeys {
    pub fn created(&self) -> u32 {
        *self.created.lock().unwrap()
    }

    pub fn address_of(index: u32) -> Address {
        Address::new(format!("0x{:040x}", 0xa11ce000 + index as u64))
    }
}

#[async_trait]
impl KeyProvider for MockKeys {
    async fn create(&self) -> LedgerResult<String> {
        let mut created = self.created.lock().unwrap();
        let id = format!("key-{}", *created);
        *created += 1;
        Ok(id)
    }

    async fn get(&self, key_id: &str) -> LedgerResult<AgentKey> {
        let index: u32 = key_id
            .strip_prefix("key-")
            .and_then(|i| i.parse().ok())
            .ok_or_else(|| LedgerError::KeyNotFound {
                key_id: key_id.to_string(),
            })?;
        Ok(AgentKey {
            address: Self::address_of(index),
            credential: Credential::new(format!("secret-{}", index)),
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn profiles() -> ChainProfiles {
    ChainProfiles::builtin().with_profile(ChainProfile {
        contracts: ContractAddresses {
            service_registry: Some(Address::new(SERVICE_REGISTRY)),
            ..ContractAddresses::default()
        },
        staking_contract: Some(Address::new(STAKING_CONTRACT)),
        olas_token: Some(Address::new(OLAS_TOKEN)),
        ..ChainProfile::defaults(ChainType::Gnosis)
    })
}

pub fn user_params(use_staking: bool) -> UserParams {
    UserParams {
        use_staking,
        olas_cost_of_bond: 30,
        olas_required_to_stake: 30,
        cost_of_bond: 1000,
        threshold: 2,
        agent_id: 25,
        nft_reference: "bafybeig64atqaladigoc3ds4arltdu63wkdrk3gesjfvnfdmz35amv7faq".to_string(),
        number_of_agents: 2,
        fund_requirements: FundRequirements {
            agent: 100,
            safe: 500,
        },
    }
}

pub fn request(use_staking: bool) -> ServiceRequest {
    ServiceRequest {
        rpc: Some(RPC.to_string()),
        user_params: Some(user_params(use_staking)),
        chain: Some(ChainType::Gnosis),
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub repository: Arc<FileServiceRepository>,
    pub gateway: Arc<MockGateway>,
    pub wallet: Arc<MockWallet>,
    pub keys: Arc<MockKeys>,
    pub manager: Arc<ServiceManager>,
}

impl Harness {
    pub fn new(olas_balance: Amount) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let repository = Arc::new(FileServiceRepository::new(dir.path()));
        let gateway = Arc::new(MockGateway::new());
        let wallet = Arc::new(MockWallet::new(olas_balance));
        let keys = Arc::new(MockKeys::default());

        let mut wallets: HashMap<LedgerType, Arc<dyn WalletProvider>> = HashMap::new();
        wallets.insert(LedgerType::Ethereum, wallet.clone());

        let manager = Arc::new(ServiceManager::new(
            repository.clone(),
            Arc::new(MockFactory {
                gateway: gateway.clone(),
            }),
            wallets,
            keys.clone(),
            profiles(),
        ));

        Self {
            dir,
            repository,
            gateway,
            wallet,
            keys,
            manager,
        }
    }
}
