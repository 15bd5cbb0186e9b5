//! Health check module
//! Provides health status for the record store and the per-chain RPC endpoints

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::chains::ledger::LedgerHelper;
use crate::chains::traits::ChainType;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    /// Storage works but at least one chain RPC does not
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    storage_root: PathBuf,
    rpc: Vec<(ChainType, LedgerHelper)>,
    rpc_timeout: Duration,
}

impl HealthChecker {
    pub fn new(storage_root: impl Into<PathBuf>, rpc: Vec<(ChainType, LedgerHelper)>) -> Self {
        Self {
            storage_root: storage_root.into(),
            rpc,
            rpc_timeout: Duration::from_secs(10),
        }
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let storage_up = match check_storage_health(&self.storage_root).await {
            Ok(response_time) => {
                health_status
                    .checks
                    .insert("storage".to_string(), ComponentHealth::up(Some(response_time)));
                info!("Storage health check: OK ({}ms)", response_time);
                true
            }
            Err(e) => {
                health_status
                    .checks
                    .insert("storage".to_string(), ComponentHealth::down(Some(e.clone())));
                error!("Storage health check failed: {}", e);
                false
            }
        };

        let checks = self.rpc.iter().map(|(chain, helper)| async move {
            let result = timeout(self.rpc_timeout, helper.health_check()).await;
            (*chain, result)
        });

        let mut rpc_up = true;
        for (chain, result) in futures::future::join_all(checks).await {
            let key = format!("rpc_{}", chain);
            match result {
                Ok(health) if health.is_healthy => {
                    health_status.checks.insert(
                        key,
                        ComponentHealth::up(Some(health.response_time_ms as u128)),
                    );
                }
                Ok(health) => {
                    rpc_up = false;
                    warn!(
                        chain = %chain,
                        error = health.error_message.as_deref().unwrap_or("Unknown error"),
                        "RPC health check failed"
                    );
                    health_status
                        .checks
                        .insert(key, ComponentHealth::down(health.error_message));
                }
                Err(_) => {
                    rpc_up = false;
                    warn!(chain = %chain, "RPC health check timed out");
                    health_status
                        .checks
                        .insert(key, ComponentHealth::down(Some("Timeout".to_string())));
                }
            }
        }

        health_status.status = match (storage_up, rpc_up) {
            (true, true) => HealthState::Healthy,
            (true, false) => HealthState::Degraded,
            (false, _) => HealthState::Unhealthy,
        };

        health_status
    }
}

/// The store root must exist and be a writable directory
pub async fn check_storage_health(root: &std::path::Path) -> Result<u128, String> {
    let start = Instant::now();

    let metadata = tokio::fs::metadata(root)
        .await
        .map_err(|e| format!("{}: {}", root.display(), e))?;
    if !metadata.is_dir() {
        return Err(format!("{} is not a directory", root.display()));
    }
    if metadata.permissions().readonly() {
        return Err(format!("{} is read-only", root.display()));
    }

    Ok(start.elapsed().as_millis())
}
