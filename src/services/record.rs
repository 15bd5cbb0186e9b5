//! Service record
//!
//! The durable unit of the lifecycle: one record per service package hash,
//! carrying the ledger configuration, the agent key references and everything
//! known about the service on-chain.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chains::traits::{Address, Amount, ChainType, LedgerError, LedgerType, TokenId};
use crate::error::{OperateError, OperateResult};

// ============================================================================
// State machine
// ============================================================================

/// On-chain state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OnChainState {
    NotMinted,
    Minted,
    Activated,
    Registered,
    Deployed,
    Terminated,
    Unbonded,
}

impl OnChainState {
    /// Forward progression order
    pub const ORDER: [OnChainState; 7] = [
        OnChainState::NotMinted,
        OnChainState::Minted,
        OnChainState::Activated,
        OnChainState::Registered,
        OnChainState::Deployed,
        OnChainState::Terminated,
        OnChainState::Unbonded,
    ];

    /// The single state this one may advance to
    pub fn next(&self) -> Option<OnChainState> {
        match self {
            OnChainState::NotMinted => Some(OnChainState::Minted),
            OnChainState::Minted => Some(OnChainState::Activated),
            OnChainState::Activated => Some(OnChainState::Registered),
            OnChainState::Registered => Some(OnChainState::Deployed),
            OnChainState::Deployed => Some(OnChainState::Terminated),
            OnChainState::Terminated => Some(OnChainState::Unbonded),
            OnChainState::Unbonded => None,
        }
    }

    pub fn can_advance_to(&self, target: OnChainState) -> bool {
        self.next() == Some(target)
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OnChainState::NotMinted => "NOTMINTED",
            OnChainState::Minted => "MINTED",
            OnChainState::Activated => "ACTIVATED",
            OnChainState::Registered => "REGISTERED",
            OnChainState::Deployed => "DEPLOYED",
            OnChainState::Terminated => "TERMINATED",
            OnChainState::Unbonded => "UNBONDED",
        }
    }
}

impl fmt::Display for OnChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of lifecycle work; the first six move the record between states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStep {
    Mint,
    Activate,
    Register,
    Deploy,
    Terminate,
    Unbond,
    Stake,
    Unstake,
    Swap,
    Info,
    StakingSlots,
    Balance,
    Transfer,
    KeyProvisioning,
}

impl LifecycleStep {
    /// Steps run by `deploy`, in order
    pub const DEPLOY_SEQUENCE: [LifecycleStep; 4] = [
        LifecycleStep::Mint,
        LifecycleStep::Activate,
        LifecycleStep::Register,
        LifecycleStep::Deploy,
    ];

    /// State the step advances from, for state-changing steps
    pub fn from_state(&self) -> Option<OnChainState> {
        match self {
            LifecycleStep::Mint => Some(OnChainState::NotMinted),
            LifecycleStep::Activate => Some(OnChainState::Minted),
            LifecycleStep::Register => Some(OnChainState::Activated),
            LifecycleStep::Deploy => Some(OnChainState::Registered),
            LifecycleStep::Terminate => Some(OnChainState::Deployed),
            LifecycleStep::Unbond => Some(OnChainState::Terminated),
            _ => None,
        }
    }

    /// State the step advances to, for state-changing steps
    pub fn to_state(&self) -> Option<OnChainState> {
        self.from_state().and_then(|state| state.next())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStep::Mint => "mint",
            LifecycleStep::Activate => "activate",
            LifecycleStep::Register => "register",
            LifecycleStep::Deploy => "deploy",
            LifecycleStep::Terminate => "terminate",
            LifecycleStep::Unbond => "unbond",
            LifecycleStep::Stake => "stake",
            LifecycleStep::Unstake => "unstake",
            LifecycleStep::Swap => "swap",
            LifecycleStep::Info => "info",
            LifecycleStep::StakingSlots => "staking_slots",
            LifecycleStep::Balance => "balance",
            LifecycleStep::Transfer => "transfer",
            LifecycleStep::KeyProvisioning => "key_provisioning",
        }
    }
}

impl fmt::Display for LifecycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Record layout
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub chain: ChainType,
    pub rpc: String,
    #[serde(rename = "type")]
    pub ledger_type: LedgerType,
}

impl LedgerConfig {
    pub fn new(chain: ChainType, rpc: impl Into<String>) -> Self {
        Self {
            chain,
            rpc: rpc.into(),
            ledger_type: chain.ledger_type(),
        }
    }
}

/// Agent key reference: the address plus the key provider's id for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub address: Address,
    pub credential: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundRequirements {
    pub agent: Amount,
    pub safe: Amount,
}

fn default_number_of_agents() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParams {
    pub use_staking: bool,
    pub olas_cost_of_bond: Amount,
    pub olas_required_to_stake: Amount,
    pub cost_of_bond: Amount,
    pub threshold: u32,
    pub agent_id: u32,
    pub nft_reference: String,
    #[serde(default = "default_number_of_agents")]
    pub number_of_agents: u32,
    pub fund_requirements: FundRequirements,
}

impl UserParams {
    /// Bond posted at mint time
    pub fn bond(&self) -> Amount {
        if self.use_staking {
            self.olas_cost_of_bond
        } else {
            self.cost_of_bond
        }
    }

    /// OLAS the wallet must hold to deploy a staked service
    pub fn required_olas(&self) -> Amount {
        self.olas_cost_of_bond
            .saturating_add(self.olas_required_to_stake)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainData {
    pub token: TokenId,
    pub instances: Vec<Address>,
    pub multisig: Option<Address>,
    pub staked: bool,
    pub on_chain_state: OnChainState,
    pub user_params: UserParams,
    /// Set on an update successor once the superseded multisig changed owner
    #[serde(default)]
    pub owner_swapped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub hash: String,
    pub ledger_config: LedgerConfig,
    pub keys: Vec<KeyRef>,
    pub chain_data: ChainData,
}

/// Violations of the record invariants
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("token {token} does not match state {state}")]
    TokenStateMismatch { token: TokenId, state: OnChainState },

    #[error("service is staked while in state {state}")]
    StakedOutsideDeployed { state: OnChainState },

    #[error("service is staked but useStaking is false")]
    StakedWithoutStaking,

    #[error("{actual} agent keys provisioned, {expected} expected")]
    KeyCountMismatch { expected: usize, actual: usize },
}

impl ServiceRecord {
    /// A fresh, unminted record without keys
    pub fn new(hash: impl Into<String>, ledger_config: LedgerConfig, user_params: UserParams) -> Self {
        Self {
            hash: hash.into(),
            ledger_config,
            keys: Vec::new(),
            chain_data: ChainData {
                token: TokenId::UNMINTED,
                instances: Vec::new(),
                multisig: None,
                staked: false,
                on_chain_state: OnChainState::NotMinted,
                user_params,
                owner_swapped: false,
            },
        }
    }

    pub fn state(&self) -> OnChainState {
        self.chain_data.on_chain_state
    }

    pub fn token(&self) -> TokenId {
        self.chain_data.token
    }

    pub fn user_params(&self) -> &UserParams {
        &self.chain_data.user_params
    }

    /// Apply a state-changing step.
    ///
    /// Fails with `InvalidStateTransition` unless the record is exactly in the
    /// state the step advances from.
    pub fn advance(&mut self, step: LifecycleStep) -> OperateResult<OnChainState> {
        let current = self.state();
        let (from, to) = match (step.from_state(), step.to_state()) {
            (Some(from), Some(to)) => (from, to),
            _ => {
                return Err(OperateError::InvalidStateTransition {
                    from: current,
                    to: current,
                })
            }
        };

        if current != from || !current.can_advance_to(to) {
            return Err(OperateError::InvalidStateTransition { from: current, to });
        }

        self.chain_data.on_chain_state = to;
        Ok(to)
    }

    /// Record a successful mint
    pub fn mark_minted(&mut self, token: TokenId) -> OperateResult<()> {
        if self.state() != OnChainState::NotMinted {
            return Err(OperateError::InvalidStateTransition {
                from: self.state(),
                to: OnChainState::Minted,
            });
        }
        if !token.is_minted() {
            return Err(OperateError::GatewayFailure {
                step: LifecycleStep::Mint,
                source: LedgerError::invalid_response(format!(
                    "mint returned the unminted token {}",
                    token
                )),
            });
        }
        self.chain_data.token = token;
        self.advance(LifecycleStep::Mint)?;
        Ok(())
    }

    /// Successor record for an update.
    ///
    /// The only backward transition: the new record starts `NOTMINTED` under
    /// the new hash while keeping the keys, instances, multisig and user
    /// parameters of this one.
    pub fn reset_for_update(
        &self,
        new_hash: impl Into<String>,
        ledger_config: LedgerConfig,
        user_params: UserParams,
    ) -> ServiceRecord {
        ServiceRecord {
            hash: new_hash.into(),
            ledger_config,
            keys: self.keys.clone(),
            chain_data: ChainData {
                token: TokenId::UNMINTED,
                instances: self.chain_data.instances.clone(),
                multisig: self.chain_data.multisig.clone(),
                staked: false,
                on_chain_state: OnChainState::NotMinted,
                user_params,
                owner_swapped: false,
            },
        }
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let state = self.state();
        let unminted = !self.token().is_minted();
        if unminted != (state == OnChainState::NotMinted) {
            return Err(InvariantViolation::TokenStateMismatch {
                token: self.token(),
                state,
            });
        }

        if self.chain_data.staked {
            if state != OnChainState::Deployed {
                return Err(InvariantViolation::StakedOutsideDeployed { state });
            }
            if !self.user_params().use_staking {
                return Err(InvariantViolation::StakedWithoutStaking);
            }
        }

        let expected = self.user_params().number_of_agents as usize;
        if !self.keys.is_empty() && self.keys.len() != expected {
            return Err(InvariantViolation::KeyCountMismatch {
                expected,
                actual: self.keys.len(),
            });
        }

        Ok(())
    }

    /// Public projection listed by the store
    pub fn summary(&self) -> ServiceSummary {
        ServiceSummary {
            hash: self.hash.clone(),
            chain: self.ledger_config.chain,
            ledger_type: self.ledger_config.ledger_type,
            token: self.token(),
            on_chain_state: self.state(),
            staked: self.chain_data.staked,
            use_staking: self.user_params().use_staking,
            agent_addresses: self.keys.iter().map(|k| k.address.clone()).collect(),
            instances: self.chain_data.instances.clone(),
            multisig: self.chain_data.multisig.clone(),
        }
    }
}

/// Public projection of a service record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub hash: String,
    pub chain: ChainType,
    pub ledger_type: LedgerType,
    pub token: TokenId,
    pub on_chain_state: OnChainState,
    pub staked: bool,
    pub use_staking: bool,
    pub agent_addresses: Vec<Address>,
    pub instances: Vec<Address>,
    pub multisig: Option<Address>,
}
