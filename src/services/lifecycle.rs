//! Service lifecycle orchestrator
//!
//! Drives a service record through its on-chain states. Every step is
//! guarded by the state it advances from and the record is persisted after
//! each successful step, so any operation can be re-invoked after a failure
//! and resumes where the last one stopped.
//!
//! Operations on the same hash are serialized through a per-hash lock;
//! operations on different hashes run independently.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::chains::traits::{
    Address, ChainType, GatewayFactory, KeyProvider, LedgerGateway, LedgerType, MintRequest,
    TokenId, WalletProvider,
};
use crate::config::{ChainProfile, ChainProfiles};
use crate::error::{OperateError, OperateResult};
use crate::services::funding::{self, FundingReport};
use crate::services::record::{
    KeyRef, LedgerConfig, LifecycleStep, OnChainState, ServiceRecord, ServiceSummary, UserParams,
};
use crate::services::staking;
use crate::storage::ServiceRepository;

// ============================================================================
// Request / outcome types
// ============================================================================

/// Inputs used when a record has to be created
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    pub rpc: Option<String>,
    pub user_params: Option<UserParams>,
    /// Defaults to gnosis
    pub chain: Option<ChainType>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub new_hash: String,
    pub rpc: Option<String>,
    pub user_params: Option<UserParams>,
}

/// Result of a guarded operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    /// The operation did not apply to the record's current state
    Skipped { reason: String },
}

impl StepOutcome {
    fn skipped(hash: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        info!(hash = %hash, reason = %reason, "Operation skipped");
        StepOutcome::Skipped { reason }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, StepOutcome::Applied)
    }
}

// ============================================================================
// Per-hash locks
// ============================================================================

type LockTable = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Per-hash async locks. An entry lives only while some caller holds or
/// waits on it.
#[derive(Default)]
struct HashLocks {
    locks: LockTable,
}

/// Held lock on one hash; releases its table entry when the last user drops
struct HashGuard {
    hash: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockTable,
}

impl Drop for HashGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.hash)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.hash);
        }
    }
}

impl HashLocks {
    async fn acquire(&self, hash: &str) -> HashGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            let lock = locks
                .entry(hash.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            lock
        };
        HashGuard {
            hash: hash.to_string(),
            guard: Some(lock.lock_owned().await),
            locks: self.locks.clone(),
        }
    }

    /// Lock two hashes in a fixed order
    async fn acquire_pair(&self, a: &str, b: &str) -> (HashGuard, HashGuard) {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let first = self.acquire(first).await;
        let second = self.acquire(second).await;
        (first, second)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

// ============================================================================
// Service manager
// ============================================================================

/// Lifecycle orchestrator over the record store and the chain collaborators
pub struct ServiceManager {
    repository: Arc<dyn ServiceRepository>,
    gateways: Arc<dyn GatewayFactory>,
    wallets: HashMap<LedgerType, Arc<dyn WalletProvider>>,
    keys: Arc<dyn KeyProvider>,
    profiles: ChainProfiles,
    locks: HashLocks,
}

impl ServiceManager {
    pub fn new(
        repository: Arc<dyn ServiceRepository>,
        gateways: Arc<dyn GatewayFactory>,
        wallets: HashMap<LedgerType, Arc<dyn WalletProvider>>,
        keys: Arc<dyn KeyProvider>,
        profiles: ChainProfiles,
    ) -> Self {
        Self {
            repository,
            gateways,
            wallets,
            keys,
            profiles,
            locks: HashLocks::default(),
        }
    }

    pub fn profiles(&self) -> &ChainProfiles {
        &self.profiles
    }

    fn profile(&self, record: &ServiceRecord) -> OperateResult<&ChainProfile> {
        self.profiles.get(record.ledger_config.chain).ok_or_else(|| {
            OperateError::configuration(format!(
                "no chain profile for {}",
                record.ledger_config.chain
            ))
        })
    }

    fn wallet(&self, record: &ServiceRecord) -> OperateResult<&Arc<dyn WalletProvider>> {
        let ledger_type = record.ledger_config.ledger_type;
        self.wallets.get(&ledger_type).ok_or_else(|| {
            OperateError::configuration(format!("no master wallet for {} ledgers", ledger_type))
        })
    }

    fn gateway(
        &self,
        record: &ServiceRecord,
        profile: &ChainProfile,
    ) -> OperateResult<Arc<dyn LedgerGateway>> {
        self.gateways
            .connect(&record.ledger_config, profile)
            .map_err(|e| OperateError::configuration(e.to_string()))
    }

    /// Staking token passed along with lifecycle calls, if the service stakes
    fn staking_token(
        record: &ServiceRecord,
        profile: &ChainProfile,
    ) -> OperateResult<Option<Address>> {
        if record.user_params().use_staking {
            Ok(Some(profile.olas_token()?.clone()))
        } else {
            Ok(None)
        }
    }

    // ------------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------------

    pub async fn get(&self, hash: &str) -> OperateResult<ServiceRecord> {
        Ok(self.repository.load(hash).await?)
    }

    pub async fn list(&self) -> OperateResult<Vec<ServiceSummary>> {
        Ok(self.repository.list().await?)
    }

    /// Load the record for `hash`, creating it from `request` if absent
    pub async fn create_or_load(
        &self,
        hash: &str,
        request: ServiceRequest,
    ) -> OperateResult<ServiceRecord> {
        let _guard = self.locks.acquire(hash).await;
        self.create_or_load_locked(hash, request).await
    }

    async fn create_or_load_locked(
        &self,
        hash: &str,
        request: ServiceRequest,
    ) -> OperateResult<ServiceRecord> {
        if self.repository.exists(hash).await? {
            return Ok(self.repository.load(hash).await?);
        }

        let rpc = request
            .rpc
            .filter(|rpc| !rpc.is_empty())
            .ok_or(OperateError::MissingParameter { parameter: "rpc" })?;
        let user_params = request.user_params.ok_or(OperateError::MissingParameter {
            parameter: "userParams",
        })?;
        if user_params.number_of_agents == 0 {
            return Err(OperateError::MissingParameter {
                parameter: "userParams.numberOfAgents",
            });
        }

        let chain = request.chain.unwrap_or(ChainType::Gnosis);
        let record = ServiceRecord::new(hash, LedgerConfig::new(chain, rpc), user_params);
        self.repository.create(&record).await?;
        Ok(record)
    }

    async fn provision_keys(&self, record: &mut ServiceRecord) -> OperateResult<()> {
        let count = record.user_params().number_of_agents;
        info!(hash = %record.hash, count, "Provisioning agent keys");

        let mut keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key_id = self
                .keys
                .create()
                .await
                .map_err(OperateError::gateway(LifecycleStep::KeyProvisioning))?;
            let key = self
                .keys
                .get(&key_id)
                .await
                .map_err(OperateError::gateway(LifecycleStep::KeyProvisioning))?;
            keys.push(KeyRef {
                address: key.address,
                credential: key_id,
            });
        }

        record.keys = keys;
        self.repository.store(record).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Deploy
    // ------------------------------------------------------------------------

    /// Advance the service to `DEPLOYED`, resuming from its persisted state
    pub async fn deploy(&self, hash: &str, request: ServiceRequest) -> OperateResult<ServiceRecord> {
        let _guard = self.locks.acquire(hash).await;
        info!(hash = %hash, "Loading service");
        let mut record = self.create_or_load_locked(hash, request).await?;
        self.deploy_record(&mut record, None).await?;
        Ok(record)
    }

    async fn deploy_record(
        &self,
        record: &mut ServiceRecord,
        update_token: Option<TokenId>,
    ) -> OperateResult<()> {
        let profile = self.profile(record)?;
        let gateway = self.gateway(record, profile)?;
        let params = record.user_params().clone();
        let staking_token = Self::staking_token(record, profile)?;

        if params.use_staking && record.state() < OnChainState::Deployed {
            staking::ensure_slots(gateway.as_ref(), profile).await?;
            // The bond leaves the wallet at mint time
            if record.state() == OnChainState::NotMinted {
                staking::ensure_eligible(self.wallet(record)?.as_ref(), record, profile).await?;
            }
        }

        for step in LifecycleStep::DEPLOY_SEQUENCE {
            match step.from_state() {
                Some(from) if from == record.state() => {}
                Some(from) if from < record.state() => {
                    info!(
                        hash = %record.hash,
                        step = %step,
                        state = %record.state(),
                        "Step already completed, skipping"
                    );
                    continue;
                }
                _ => continue,
            }

            info!(hash = %record.hash, step = %step, token = %record.token(), "Running lifecycle step");
            self.run_deploy_step(
                record,
                step,
                gateway.as_ref(),
                &params,
                staking_token.as_ref(),
                update_token,
            )
            .await?;
            self.repository.store(record).await?;
            info!(hash = %record.hash, state = %record.state(), "Service record advanced");
        }

        if record.state() != OnChainState::Deployed {
            warn!(hash = %record.hash, state = %record.state(), "Service is past deployment");
            return Ok(());
        }

        let info = gateway
            .info(record.token())
            .await
            .map_err(OperateError::gateway(LifecycleStep::Info))?;
        record.chain_data.instances = info.instances;
        record.chain_data.multisig = info.multisig;
        self.repository.store(record).await?;

        info!(
            hash = %record.hash,
            token = %record.token(),
            instances = record.chain_data.instances.len(),
            "Service deployed"
        );
        Ok(())
    }

    async fn run_deploy_step(
        &self,
        record: &mut ServiceRecord,
        step: LifecycleStep,
        gateway: &dyn LedgerGateway,
        params: &UserParams,
        staking_token: Option<&Address>,
        update_token: Option<TokenId>,
    ) -> OperateResult<()> {
        match step {
            LifecycleStep::Mint => {
                if record.keys.is_empty() {
                    self.provision_keys(record).await?;
                }
                let request = MintRequest {
                    package: record.hash.clone(),
                    agent_id: params.agent_id,
                    number_of_slots: params.number_of_agents,
                    cost_of_bond: params.bond(),
                    threshold: params.threshold,
                    nft: params.nft_reference.clone(),
                    update_token,
                    staking_token: staking_token.cloned(),
                };
                let token = gateway
                    .mint(request)
                    .await
                    .map_err(OperateError::gateway(step))?;
                record.mark_minted(token)
            }
            LifecycleStep::Activate => {
                gateway
                    .activate(record.token(), staking_token)
                    .await
                    .map_err(OperateError::gateway(step))?;
                record.advance(step).map(|_| ())
            }
            LifecycleStep::Register => {
                let instances: Vec<Address> =
                    record.keys.iter().map(|k| k.address.clone()).collect();
                let agent_ids = vec![params.agent_id; instances.len()];
                gateway
                    .register(record.token(), &instances, &agent_ids)
                    .await
                    .map_err(OperateError::gateway(step))?;
                record.advance(step).map(|_| ())
            }
            LifecycleStep::Deploy => {
                let reuse_multisig = record.chain_data.multisig.is_some();
                gateway
                    .deploy(record.token(), reuse_multisig, staking_token)
                    .await
                    .map_err(OperateError::gateway(step))?;
                record.advance(step).map(|_| ())
            }
            // Not part of the deploy sequence
            _ => Err(OperateError::InvalidStateTransition {
                from: record.state(),
                to: OnChainState::Deployed,
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Guarded single steps
    // ------------------------------------------------------------------------

    pub async fn terminate(&self, hash: &str) -> OperateResult<StepOutcome> {
        let _guard = self.locks.acquire(hash).await;
        let mut record = self.repository.load(hash).await?;
        self.terminate_record(&mut record).await
    }

    async fn terminate_record(&self, record: &mut ServiceRecord) -> OperateResult<StepOutcome> {
        if record.state() != OnChainState::Deployed {
            return Ok(StepOutcome::skipped(
                &record.hash,
                format!("Cannot terminate service in state {}", record.state()),
            ));
        }
        if record.chain_data.staked {
            return Ok(StepOutcome::skipped(
                &record.hash,
                "Cannot terminate service, it is still staked",
            ));
        }

        let profile = self.profile(record)?;
        let gateway = self.gateway(record, profile)?;
        let staking_token = Self::staking_token(record, profile)?;

        info!(hash = %record.hash, token = %record.token(), "Terminating service");
        gateway
            .terminate(record.token(), staking_token.as_ref())
            .await
            .map_err(OperateError::gateway(LifecycleStep::Terminate))?;
        record.advance(LifecycleStep::Terminate)?;
        self.repository.store(record).await?;
        Ok(StepOutcome::Applied)
    }

    pub async fn unbond(&self, hash: &str) -> OperateResult<StepOutcome> {
        let _guard = self.locks.acquire(hash).await;
        let mut record = self.repository.load(hash).await?;
        self.unbond_record(&mut record).await
    }

    async fn unbond_record(&self, record: &mut ServiceRecord) -> OperateResult<StepOutcome> {
        if record.state() != OnChainState::Terminated {
            return Ok(StepOutcome::skipped(
                &record.hash,
                format!("Cannot unbond service in state {}", record.state()),
            ));
        }

        let profile = self.profile(record)?;
        let gateway = self.gateway(record, profile)?;
        let staking_token = Self::staking_token(record, profile)?;

        info!(hash = %record.hash, token = %record.token(), "Unbonding service");
        gateway
            .unbond(record.token(), staking_token.as_ref())
            .await
            .map_err(OperateError::gateway(LifecycleStep::Unbond))?;
        record.advance(LifecycleStep::Unbond)?;
        self.repository.store(record).await?;
        Ok(StepOutcome::Applied)
    }

    pub async fn stake(&self, hash: &str) -> OperateResult<StepOutcome> {
        let _guard = self.locks.acquire(hash).await;
        let mut record = self.repository.load(hash).await?;

        if !record.user_params().use_staking {
            return Ok(StepOutcome::skipped(
                hash,
                "Cannot stake service, `useStaking` is set to false",
            ));
        }
        if record.chain_data.staked {
            return Ok(StepOutcome::skipped(hash, "Cannot stake service, it's already staked"));
        }
        if record.state() != OnChainState::Deployed {
            return Ok(StepOutcome::skipped(
                hash,
                "Cannot stake service, it's not in deployed state",
            ));
        }

        let profile = self.profile(&record)?;
        let gateway = self.gateway(&record, profile)?;
        let service_registry = profile.service_registry()?;
        let staking_contract = profile.staking_contract()?;

        staking::ensure_slots(gateway.as_ref(), profile).await?;
        staking::ensure_eligible(self.wallet(&record)?.as_ref(), &record, profile).await?;

        info!(hash = %hash, token = %record.token(), "Staking service");
        gateway
            .stake(record.token(), service_registry, staking_contract)
            .await
            .map_err(OperateError::gateway(LifecycleStep::Stake))?;
        record.chain_data.staked = true;
        self.repository.store(&record).await?;
        Ok(StepOutcome::Applied)
    }

    pub async fn unstake(&self, hash: &str) -> OperateResult<StepOutcome> {
        let _guard = self.locks.acquire(hash).await;
        let mut record = self.repository.load(hash).await?;
        self.unstake_record(&mut record).await
    }

    async fn unstake_record(&self, record: &mut ServiceRecord) -> OperateResult<StepOutcome> {
        if !record.user_params().use_staking {
            return Ok(StepOutcome::skipped(
                &record.hash,
                "Cannot unstake service, `useStaking` is set to false",
            ));
        }
        if !record.chain_data.staked {
            return Ok(StepOutcome::skipped(
                &record.hash,
                "Cannot unstake service, it's not staked",
            ));
        }

        let profile = self.profile(record)?;
        let gateway = self.gateway(record, profile)?;
        let staking_contract = profile.staking_contract()?;

        info!(hash = %record.hash, token = %record.token(), "Unstaking service");
        gateway
            .unstake(record.token(), staking_contract)
            .await
            .map_err(OperateError::gateway(LifecycleStep::Unstake))?;
        record.chain_data.staked = false;
        self.repository.store(record).await?;
        Ok(StepOutcome::Applied)
    }

    // ------------------------------------------------------------------------
    // Funding
    // ------------------------------------------------------------------------

    pub async fn fund(&self, hash: &str) -> OperateResult<FundingReport> {
        let _guard = self.locks.acquire(hash).await;
        let record = self.repository.load(hash).await?;
        let wallet = self.wallet(&record)?;
        funding::fund(wallet.as_ref(), &record).await
    }

    // ------------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------------

    /// Replace the service at `old_hash` with a new package at `new_hash`,
    /// keeping its agents and multisig.
    ///
    /// The successor is validated before anything goes on-chain and is
    /// persisted before the multisig swap, which it then records. The old
    /// record is deleted only once the new one is deployed and persisted.
    /// Re-invoking after a failure resumes: the unwind steps are no-ops by
    /// then, the persisted successor is picked up and a completed swap is
    /// not repeated.
    pub async fn update(&self, old_hash: &str, request: UpdateRequest) -> OperateResult<ServiceRecord> {
        let new_hash = request.new_hash.clone();
        if new_hash == old_hash {
            return Err(OperateError::AlreadyExists { hash: new_hash });
        }

        let _guards = self.locks.acquire_pair(old_hash, &new_hash).await;
        info!(old_hash = %old_hash, new_hash = %new_hash, "Updating service");

        let mut old = self.repository.load(old_hash).await?;
        let (mut new, persisted) = self.successor(&old, request).await?;

        self.unstake_record(&mut old).await?;
        self.terminate_record(&mut old).await?;
        self.unbond_record(&mut old).await?;

        if !persisted {
            self.repository.create(&new).await?;
        }
        if !new.chain_data.owner_swapped {
            self.swap_owner(&old).await?;
            new.chain_data.owner_swapped = true;
            self.repository.store(&new).await?;
        }

        let update_token = old.token().is_minted().then_some(old.token());
        self.deploy_record(&mut new, update_token).await?;

        self.repository.delete(old_hash).await?;
        info!(old_hash = %old_hash, new_hash = %new_hash, token = %new.token(), "Service updated");
        Ok(new)
    }

    /// Successor record for an update and whether it is already stored.
    ///
    /// A stored successor must carry the old keys and multisig. A new one is
    /// built from the old record and the overrides and checked against the
    /// record invariants.
    async fn successor(
        &self,
        old: &ServiceRecord,
        request: UpdateRequest,
    ) -> OperateResult<(ServiceRecord, bool)> {
        let new_hash = request.new_hash;
        if self.repository.exists(&new_hash).await? {
            let existing = self.repository.load(&new_hash).await?;
            if existing.chain_data.multisig != old.chain_data.multisig
                || existing.keys != old.keys
            {
                return Err(OperateError::AlreadyExists { hash: new_hash });
            }
            info!(new_hash = %new_hash, "Resuming update into existing record");
            return Ok((existing, true));
        }

        let ledger_config = match request.rpc {
            Some(rpc) if !rpc.is_empty() => LedgerConfig::new(old.ledger_config.chain, rpc),
            _ => old.ledger_config.clone(),
        };
        let user_params = request
            .user_params
            .unwrap_or_else(|| old.user_params().clone());
        if user_params.number_of_agents == 0 {
            return Err(OperateError::MissingParameter {
                parameter: "userParams.numberOfAgents",
            });
        }

        let new = old.reset_for_update(new_hash, ledger_config, user_params);
        new.check_invariants().map_err(|violation| {
            OperateError::invalid_request(format!(
                "Cannot update {} to {}: {}",
                old.hash, new.hash, violation
            ))
        })?;
        Ok((new, false))
    }

    /// Hand the old multisig to the first agent key
    async fn swap_owner(&self, old: &ServiceRecord) -> OperateResult<()> {
        let multisig = match (&old.chain_data.multisig, old.token().is_minted()) {
            (Some(multisig), true) => multisig,
            _ => {
                info!(hash = %old.hash, "No multisig to take over, skipping swap");
                return Ok(());
            }
        };

        // TODO: confirm with product whether the first agent key is the
        // intended canonical owner of the taken-over multisig
        let owner = old.keys.first().ok_or(OperateError::MissingParameter {
            parameter: "keys",
        })?;
        let key = self
            .keys
            .get(&owner.credential)
            .await
            .map_err(OperateError::gateway(LifecycleStep::Swap))?;

        let profile = self.profile(old)?;
        let gateway = self.gateway(old, profile)?;
        info!(hash = %old.hash, token = %old.token(), "Swapping multisig ownership");
        gateway
            .swap(old.token(), multisig, &key.credential)
            .await
            .map_err(OperateError::gateway(LifecycleStep::Swap))
    }
}
