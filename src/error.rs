//! Error handling for the service lifecycle
//!
//! Every failure a caller can observe is one tagged `OperateError` variant,
//! with a stable error code and an HTTP status mapping for the API layer.

use serde::{Deserialize, Serialize};

use crate::chains::traits::{Amount, LedgerError};
use crate::config::ConfigError;
use crate::services::record::{LifecycleStep, OnChainState};
use crate::storage::error::StorageError;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingParameter,
    AlreadyExists,
    NotFound,
    NoStakingSlots,
    InsufficientBalance,
    InvalidStateTransition,
    GatewayFailure,
    StorageError,
    ConfigurationError,
    InvalidRequest,
}

#[derive(Debug, thiserror::Error)]
pub enum OperateError {
    /// A value required to create a new service record was not supplied
    #[error("{parameter} cannot be empty when creating a new service")]
    MissingParameter { parameter: &'static str },

    #[error("Service {hash} already exists")]
    AlreadyExists { hash: String },

    #[error("Service {hash} not found")]
    NotFound { hash: String },

    #[error("No staking slots available on {staking_contract}")]
    NoStakingSlots { staking_contract: String },

    #[error("Insufficient balance: required {required}, actual {actual}")]
    InsufficientBalance { required: Amount, actual: Amount },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: OnChainState,
        to: OnChainState,
    },

    /// An on-chain call failed; the record keeps its last persisted state
    #[error("Ledger call `{step}` failed: {source}")]
    GatewayFailure {
        step: LifecycleStep,
        #[source]
        source: LedgerError,
    },

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

/// Result type for lifecycle operations
pub type OperateResult<T> = Result<T, OperateError>;

impl OperateError {
    pub fn gateway(step: LifecycleStep) -> impl FnOnce(LedgerError) -> OperateError {
        move |source| OperateError::GatewayFailure { step, source }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            OperateError::MissingParameter { .. } => ErrorCode::MissingParameter,
            OperateError::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            OperateError::NotFound { .. } => ErrorCode::NotFound,
            OperateError::NoStakingSlots { .. } => ErrorCode::NoStakingSlots,
            OperateError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            OperateError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            OperateError::GatewayFailure { .. } => ErrorCode::GatewayFailure,
            OperateError::Storage(_) => ErrorCode::StorageError,
            OperateError::Configuration { .. } => ErrorCode::ConfigurationError,
            OperateError::InvalidRequest { .. } => ErrorCode::InvalidRequest,
        }
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            OperateError::MissingParameter { .. } => 422,
            OperateError::AlreadyExists { .. } => 409,
            OperateError::NotFound { .. } => 404,
            OperateError::NoStakingSlots { .. } => 422,
            OperateError::InsufficientBalance { .. } => 422,
            OperateError::InvalidStateTransition { .. } => 409,
            OperateError::GatewayFailure { source, .. } => match source {
                LedgerError::Timeout { .. } => 504,
                _ => 502,
            },
            OperateError::Storage(_) => 500,
            OperateError::Configuration { .. } => 500,
            OperateError::InvalidRequest { .. } => 400,
        }
    }

    /// Whether re-invoking the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            OperateError::GatewayFailure { source, .. } => matches!(
                source,
                LedgerError::NetworkError { .. }
                    | LedgerError::Timeout { .. }
                    | LedgerError::TransactionFailed { .. }
                    | LedgerError::Rpc { .. }
            ),
            OperateError::NoStakingSlots { .. } | OperateError::InsufficientBalance { .. } => true,
            OperateError::Storage(StorageError::Io { .. }) => true,
            _ => false,
        }
    }
}

impl From<StorageError> for OperateError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { hash } => OperateError::NotFound { hash },
            StorageError::AlreadyExists { hash } => OperateError::AlreadyExists { hash },
            other => OperateError::Storage(other),
        }
    }
}

impl From<ConfigError> for OperateError {
    fn from(err: ConfigError) -> Self {
        OperateError::configuration(err.to_string())
    }
}
