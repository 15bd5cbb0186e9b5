//! Staking coordinator
//!
//! Read-only checks that gate staking: a free slot on the staking contract
//! and enough OLAS in the master wallet to cover bond plus stake.

use tracing::{debug, info};

use crate::chains::traits::{Amount, Asset, LedgerGateway, WalletProvider};
use crate::config::ChainProfile;
use crate::error::{OperateError, OperateResult};
use crate::services::record::{LifecycleStep, ServiceRecord, UserParams};

/// OLAS the wallet must hold for a staked service
pub fn required_bond(params: &UserParams) -> Amount {
    params.required_olas()
}

pub async fn slots_available(
    gateway: &dyn LedgerGateway,
    profile: &ChainProfile,
) -> OperateResult<bool> {
    let staking_contract = profile.staking_contract()?;
    let available = gateway
        .staking_slots_available(staking_contract)
        .await
        .map_err(OperateError::gateway(LifecycleStep::StakingSlots))?;
    debug!(chain = %profile.chain, available, "Staking slots queried");
    Ok(available)
}

pub async fn ensure_slots(gateway: &dyn LedgerGateway, profile: &ChainProfile) -> OperateResult<()> {
    if slots_available(gateway, profile).await? {
        Ok(())
    } else {
        Err(OperateError::NoStakingSlots {
            staking_contract: profile.staking_contract()?.to_string(),
        })
    }
}

async fn olas_balance(wallet: &dyn WalletProvider, record: &ServiceRecord, profile: &ChainProfile) -> OperateResult<Amount> {
    let olas = profile.olas_token()?;
    wallet
        .balance(
            record.ledger_config.chain,
            wallet.address(),
            &Asset::Token(olas.clone()),
        )
        .await
        .map_err(OperateError::gateway(LifecycleStep::Balance))
}

pub async fn eligible(
    wallet: &dyn WalletProvider,
    record: &ServiceRecord,
    profile: &ChainProfile,
) -> OperateResult<bool> {
    let balance = olas_balance(wallet, record, profile).await?;
    Ok(balance >= required_bond(record.user_params()))
}

/// Fails with `InsufficientBalance` carrying required and actual amounts
pub async fn ensure_eligible(
    wallet: &dyn WalletProvider,
    record: &ServiceRecord,
    profile: &ChainProfile,
) -> OperateResult<()> {
    info!(hash = %record.hash, "Checking staking compatibility");
    let required = required_bond(record.user_params());
    let actual = olas_balance(wallet, record, profile).await?;
    if actual < required {
        return Err(OperateError::InsufficientBalance { required, actual });
    }
    Ok(())
}
