//! Funding coordinator
//!
//! Tops agent accounts and the shared safe up to their configured
//! requirements. Only the missing delta is ever transferred, so funding can be
//! repeated safely.

use serde::Serialize;
use tracing::{info, warn};

use crate::chains::traits::{Address, Amount, Asset, WalletProvider};
use crate::error::{OperateError, OperateResult};
use crate::logging::mask_address;
use crate::services::record::{LifecycleStep, ServiceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FundingTarget {
    Agent,
    Safe,
}

/// A transfer that was executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FundingTransfer {
    pub target: FundingTarget,
    pub address: Address,
    pub balance: Amount,
    pub required: Amount,
    pub amount: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FundingReport {
    pub transfers: Vec<FundingTransfer>,
}

impl FundingReport {
    pub fn total(&self) -> Amount {
        self.transfers
            .iter()
            .fold(0, |acc, t| acc.saturating_add(t.amount))
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

/// Amount missing for `balance` to reach `required`; never negative
pub fn shortfall(required: Amount, balance: Amount) -> Amount {
    required.saturating_sub(balance)
}

async fn top_up(
    wallet: &dyn WalletProvider,
    record: &ServiceRecord,
    target: FundingTarget,
    address: &Address,
    required: Amount,
) -> OperateResult<Option<FundingTransfer>> {
    let chain = record.ledger_config.chain;
    let balance = wallet
        .balance(chain, address, &Asset::Native)
        .await
        .map_err(OperateError::gateway(LifecycleStep::Balance))?;

    let amount = shortfall(required, balance);
    if amount == 0 {
        return Ok(None);
    }

    info!(
        hash = %record.hash,
        target = ?target,
        address = %mask_address(address.as_str()),
        amount = %amount,
        "Transferring funds"
    );
    wallet
        .transfer(chain, address, amount)
        .await
        .map_err(OperateError::gateway(LifecycleStep::Transfer))?;

    Ok(Some(FundingTransfer {
        target,
        address: address.clone(),
        balance,
        required,
        amount,
    }))
}

/// Fund every agent key, then the wallet's safe
pub async fn fund(wallet: &dyn WalletProvider, record: &ServiceRecord) -> OperateResult<FundingReport> {
    let requirements = &record.user_params().fund_requirements;

    let safe = match (wallet.safe_address(), requirements.safe) {
        (Some(safe), _) => Some(safe.clone()),
        (None, 0) => None,
        (None, _) => {
            return Err(OperateError::configuration(
                "safe funding is required but the wallet has no safe",
            ))
        }
    };

    let mut report = FundingReport::default();

    info!(hash = %record.hash, agents = record.keys.len(), "Funding agents");
    for key in &record.keys {
        if let Some(transfer) =
            top_up(wallet, record, FundingTarget::Agent, &key.address, requirements.agent).await?
        {
            report.transfers.push(transfer);
        }
    }

    match safe {
        Some(safe) => {
            info!(hash = %record.hash, "Funding safe");
            if let Some(transfer) =
                top_up(wallet, record, FundingTarget::Safe, &safe, requirements.safe).await?
            {
                report.transfers.push(transfer);
            }
        }
        None => warn!(hash = %record.hash, "No safe configured, skipping safe funding"),
    }

    info!(
        hash = %record.hash,
        transfers = report.transfers.len(),
        total = %report.total(),
        "Funding complete"
    );
    Ok(report)
}
