//! Integration tests for the deploy / terminate / unbond / stake lifecycle
//!
//! Tests cover:
//! - Fresh deployment and the calls it issues
//! - Resuming from a persisted intermediate state
//! - Idempotent re-deploys
//! - Staking pre-checks
//! - Guarded single steps

mod common;

use common::{GatewayCall, Harness, MockKeys, MULTISIG, OLAS_TOKEN};
use operate_backend::chains::traits::{Address, LedgerError, ServiceInfo, TokenId};
use operate_backend::error::OperateError;
use operate_backend::services::{
    KeyRef, LedgerConfig, LifecycleStep, OnChainState, ServiceRecord, ServiceRequest, StepOutcome,
};
use operate_backend::storage::ServiceRepository;

const HASH: &str = "bafybeihrlb5m3hvdlnslt5pctb4hbq5wzxxpwqfnpmkpenrmcjttdw5tfi";

fn registered_record(use_staking: bool) -> ServiceRecord {
    let mut record = ServiceRecord::new(
        HASH,
        LedgerConfig::new(operate_backend::chains::traits::ChainType::Gnosis, common::RPC),
        common::user_params(use_staking),
    );
    record.keys = (0..2)
        .map(|i| KeyRef {
            address: MockKeys::address_of(i),
            credential: format!("key-{}", i),
        })
        .collect();
    record.chain_data.token = TokenId(7);
    record.chain_data.on_chain_state = OnChainState::Registered;
    record
}

#[tokio::test]
async fn test_fresh_deploy_runs_every_step_once() {
    let harness = Harness::new(0);

    let record = harness
        .manager
        .deploy(HASH, common::request(false))
        .await
        .unwrap();

    assert_eq!(
        harness.gateway.names(),
        vec!["mint", "activate", "register", "deploy", "info"]
    );
    assert_eq!(record.state(), OnChainState::Deployed);
    assert_eq!(record.token(), TokenId(1));
    assert_eq!(record.keys.len(), 2);
    assert_eq!(harness.keys.created(), 2);

    let calls = harness.gateway.calls();
    match &calls[0] {
        GatewayCall::Mint(request) => {
            assert_eq!(request.package, HASH);
            assert_eq!(request.number_of_slots, 2);
            assert_eq!(request.cost_of_bond, 1000);
            assert_eq!(request.agent_id, 25);
            assert_eq!(request.update_token, None);
            assert_eq!(request.staking_token, None);
        }
        other => panic!("expected mint, got {:?}", other),
    }
    assert_eq!(
        calls[2],
        GatewayCall::Register {
            token: TokenId(1),
            instances: vec![MockKeys::address_of(0), MockKeys::address_of(1)],
            agent_ids: vec![25, 25],
        }
    );
    assert_eq!(
        calls[3],
        GatewayCall::Deploy {
            token: TokenId(1),
            reuse_multisig: false,
        }
    );

    assert_eq!(record.chain_data.multisig, Some(Address::new(MULTISIG)));
    assert_eq!(
        record.chain_data.instances,
        vec![MockKeys::address_of(0), MockKeys::address_of(1)]
    );

    let stored = harness.manager.get(HASH).await.unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn test_registered_service_only_deploys_and_refreshes_info() {
    let harness = Harness::new(0);

    let mut record = registered_record(false);
    record.chain_data.instances = vec![Address::new("0x000000000000000000000000000000000000dEaD")];
    harness.repository.create(&record).await.unwrap();

    let fresh = ServiceInfo {
        instances: vec![MockKeys::address_of(0), MockKeys::address_of(1)],
        multisig: Some(Address::new(MULTISIG)),
    };
    harness.gateway.set_info(fresh.clone());

    let deployed = harness
        .manager
        .deploy(HASH, ServiceRequest::default())
        .await
        .unwrap();

    assert_eq!(
        harness.gateway.calls(),
        vec![
            GatewayCall::Deploy {
                token: TokenId(7),
                reuse_multisig: false,
            },
            GatewayCall::Info(TokenId(7)),
        ]
    );
    assert_eq!(deployed.state(), OnChainState::Deployed);
    assert_eq!(deployed.token(), TokenId(7));
    assert_eq!(deployed.chain_data.instances, fresh.instances);
    assert_eq!(deployed.chain_data.multisig, fresh.multisig);
    assert_eq!(harness.keys.created(), 0);
}

#[tokio::test]
async fn test_resumed_staking_deploy_checks_slots() {
    let harness = Harness::new(0);
    harness
        .repository
        .create(&registered_record(true))
        .await
        .unwrap();
    harness.gateway.set_slots_available(false);

    let err = harness
        .manager
        .deploy(HASH, ServiceRequest::default())
        .await
        .unwrap_err();

    assert!(matches!(err, OperateError::NoStakingSlots { .. }));
    assert_eq!(harness.gateway.names(), vec!["staking_slots"]);
    assert_eq!(
        harness.manager.get(HASH).await.unwrap().state(),
        OnChainState::Registered
    );

    // The bond is already posted, so an empty wallet does not block the resume
    harness.gateway.set_slots_available(true);
    harness.gateway.clear();
    let record = harness
        .manager
        .deploy(HASH, ServiceRequest::default())
        .await
        .unwrap();
    assert_eq!(harness.gateway.names(), vec!["staking_slots", "deploy", "info"]);
    assert_eq!(record.state(), OnChainState::Deployed);
}

#[tokio::test]
async fn test_unminted_token_from_mint_is_rejected() {
    let harness = Harness::new(0);
    harness.gateway.set_next_token(-1);

    let err = harness
        .manager
        .deploy(HASH, common::request(false))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OperateError::GatewayFailure {
            step: LifecycleStep::Mint,
            source: LedgerError::InvalidResponse { .. },
        }
    ));
    let stored = harness.manager.get(HASH).await.unwrap();
    assert_eq!(stored.state(), OnChainState::NotMinted);
    assert_eq!(stored.token(), TokenId::UNMINTED);
    assert_eq!(stored.keys.len(), 2);
}

#[tokio::test]
async fn test_second_deploy_issues_no_step_calls() {
    let harness = Harness::new(0);
    let first = harness
        .manager
        .deploy(HASH, common::request(false))
        .await
        .unwrap();
    harness.gateway.clear();

    let second = harness
        .manager
        .deploy(HASH, ServiceRequest::default())
        .await
        .unwrap();

    assert_eq!(harness.gateway.names(), vec!["info"]);
    assert_eq!(first, second);
    assert_eq!(harness.keys.created(), 2);
}

#[tokio::test]
async fn test_deploy_resumes_after_failed_step() {
    let harness = Harness::new(0);
    harness.gateway.fail_on(Some("register"));

    let err = harness
        .manager
        .deploy(HASH, common::request(false))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OperateError::GatewayFailure {
            step: LifecycleStep::Register,
            ..
        }
    ));

    let stored = harness.manager.get(HASH).await.unwrap();
    assert_eq!(stored.state(), OnChainState::Activated);
    assert_eq!(stored.token(), TokenId(1));
    assert_eq!(stored.keys.len(), 2);

    harness.gateway.fail_on(None);
    harness.gateway.clear();
    let record = harness
        .manager
        .deploy(HASH, ServiceRequest::default())
        .await
        .unwrap();

    assert_eq!(harness.gateway.names(), vec!["register", "deploy", "info"]);
    assert_eq!(record.state(), OnChainState::Deployed);
    assert_eq!(record.token(), TokenId(1));
    assert_eq!(harness.keys.created(), 2);
}

#[tokio::test]
async fn test_failed_mint_keeps_provisioned_keys() {
    let harness = Harness::new(0);
    harness.gateway.fail_on(Some("mint"));

    assert!(harness
        .manager
        .deploy(HASH, common::request(false))
        .await
        .is_err());
    let stored = harness.manager.get(HASH).await.unwrap();
    assert_eq!(stored.state(), OnChainState::NotMinted);
    assert_eq!(stored.keys.len(), 2);

    harness.gateway.fail_on(None);
    harness
        .manager
        .deploy(HASH, ServiceRequest::default())
        .await
        .unwrap();
    assert_eq!(harness.keys.created(), 2);
}

#[tokio::test]
async fn test_insufficient_olas_fails_before_any_transaction() {
    let harness = Harness::new(50);

    let err = harness
        .manager
        .deploy(HASH, common::request(true))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OperateError::InsufficientBalance {
            required: 60,
            actual: 50
        }
    ));
    assert_eq!(harness.gateway.names(), vec!["staking_slots"]);
    assert_eq!(harness.keys.created(), 0);
    assert_eq!(
        harness.manager.get(HASH).await.unwrap().state(),
        OnChainState::NotMinted
    );
}

#[tokio::test]
async fn test_no_staking_slots_is_checked_first() {
    let harness = Harness::new(1_000);
    harness.gateway.set_slots_available(false);

    let err = harness
        .manager
        .deploy(HASH, common::request(true))
        .await
        .unwrap_err();

    assert!(matches!(err, OperateError::NoStakingSlots { .. }));
    assert_eq!(harness.gateway.names(), vec!["staking_slots"]);
}

#[tokio::test]
async fn test_staked_deploy_passes_staking_token() {
    let harness = Harness::new(60);

    harness
        .manager
        .deploy(HASH, common::request(true))
        .await
        .unwrap();

    match &harness.gateway.calls()[1] {
        GatewayCall::Mint(request) => {
            assert_eq!(request.cost_of_bond, 30);
            assert_eq!(request.staking_token, Some(Address::new(OLAS_TOKEN)));
        }
        other => panic!("expected mint, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stake_guards_and_full_unwind() {
    let harness = Harness::new(100);
    harness
        .manager
        .deploy(HASH, common::request(true))
        .await
        .unwrap();
    harness.gateway.clear();

    assert_eq!(harness.manager.stake(HASH).await.unwrap(), StepOutcome::Applied);
    assert!(harness.manager.get(HASH).await.unwrap().chain_data.staked);
    assert_eq!(harness.gateway.names(), vec!["staking_slots", "stake"]);

    // Already staked
    assert!(!harness.manager.stake(HASH).await.unwrap().is_applied());
    // Staked services cannot be terminated
    assert!(!harness.manager.terminate(HASH).await.unwrap().is_applied());

    assert!(harness.manager.unstake(HASH).await.unwrap().is_applied());
    assert!(!harness.manager.unstake(HASH).await.unwrap().is_applied());
    assert!(harness.manager.terminate(HASH).await.unwrap().is_applied());
    assert!(harness.manager.unbond(HASH).await.unwrap().is_applied());

    // Nothing left to do
    assert!(!harness.manager.terminate(HASH).await.unwrap().is_applied());
    assert!(!harness.manager.unbond(HASH).await.unwrap().is_applied());
    assert!(!harness.manager.stake(HASH).await.unwrap().is_applied());

    let record = harness.manager.get(HASH).await.unwrap();
    assert_eq!(record.state(), OnChainState::Unbonded);
    assert!(!record.chain_data.staked);
    assert_eq!(
        harness.gateway.names(),
        vec!["staking_slots", "stake", "unstake", "terminate", "unbond"]
    );
}

#[tokio::test]
async fn test_stake_before_deploy_is_noop() {
    let harness = Harness::new(100);
    harness
        .manager
        .create_or_load(HASH, common::request(true))
        .await
        .unwrap();

    let outcome = harness.manager.stake(HASH).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Skipped { .. }));
    assert!(harness.gateway.calls().is_empty());
    assert!(!harness.manager.get(HASH).await.unwrap().chain_data.staked);
}

#[tokio::test]
async fn test_concurrent_deploys_mint_once() {
    let harness = Harness::new(0);
    harness
        .manager
        .create_or_load(HASH, common::request(false))
        .await
        .unwrap();

    let a = {
        let manager = harness.manager.clone();
        tokio::spawn(async move { manager.deploy(HASH, ServiceRequest::default()).await })
    };
    let b = {
        let manager = harness.manager.clone();
        tokio::spawn(async move { manager.deploy(HASH, ServiceRequest::default()).await })
    };
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_eq!(a.token(), b.token());
    let mints = harness
        .gateway
        .names()
        .into_iter()
        .filter(|name| *name == "mint")
        .count();
    assert_eq!(mints, 1);
    assert_eq!(harness.keys.created(), 2);
}

#[tokio::test]
async fn test_list_returns_public_projection() {
    let harness = Harness::new(0);
    harness
        .manager
        .deploy(HASH, common::request(false))
        .await
        .unwrap();
    harness
        .manager
        .create_or_load("bafybeiother", common::request(false))
        .await
        .unwrap();

    let services = harness.manager.list().await.unwrap();
    assert_eq!(services.len(), 2);
    let deployed = services.iter().find(|s| s.hash == HASH).unwrap();
    assert_eq!(deployed.on_chain_state, OnChainState::Deployed);
    assert_eq!(deployed.agent_addresses.len(), 2);

    let json = serde_json::to_string(&services).unwrap();
    assert!(!json.contains("key-0"));
}
