//! Error response formatting
//!
//! Every `OperateError` leaving a handler is rendered as the same JSON body:
//! a machine-readable code, a message, optional details and a timestamp.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, OperateError};

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    pub message: String,

    /// Structured context, e.g. the failed step or the missing amount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether re-invoking the operation may succeed
    pub retryable: bool,

    /// RFC 3339 timestamp of the error
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn from_operate_error(error: &OperateError) -> Self {
        Self {
            error: error.code(),
            message: error.to_string(),
            details: error_details(error),
            retryable: error.is_retryable(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

// Amounts are rendered as strings; they may not fit a JSON number.
fn error_details(error: &OperateError) -> Option<serde_json::Value> {
    match error {
        OperateError::MissingParameter { parameter } => {
            Some(serde_json::json!({ "parameter": parameter }))
        }
        OperateError::AlreadyExists { hash } | OperateError::NotFound { hash } => {
            Some(serde_json::json!({ "hash": hash }))
        }
        OperateError::NoStakingSlots { staking_contract } => {
            Some(serde_json::json!({ "stakingContract": staking_contract }))
        }
        OperateError::InsufficientBalance { required, actual } => Some(serde_json::json!({
            "required": required.to_string(),
            "actual": actual.to_string(),
        })),
        OperateError::InvalidStateTransition { from, to } => {
            Some(serde_json::json!({ "from": from, "to": to }))
        }
        OperateError::GatewayFailure { step, .. } => {
            Some(serde_json::json!({ "step": step.as_str() }))
        }
        OperateError::Storage(_)
        | OperateError::Configuration { .. }
        | OperateError::InvalidRequest { .. } => None,
    }
}

impl IntoResponse for OperateError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = %self,
                code = ?self.code(),
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = %self,
                code = ?self.code(),
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let error_response = ErrorResponse::from_operate_error(&self);
        (status_code, Json(error_response)).into_response()
    }
}
