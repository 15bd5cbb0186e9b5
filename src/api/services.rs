//! Service lifecycle endpoints
//!
//! Thin handlers over `ServiceManager`: every operation is addressed by the
//! service hash in the path and returns the orchestrator's result as JSON.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::info;

use crate::error::{OperateError, OperateResult};
use crate::health::{HealthChecker, HealthState};
use crate::services::{
    FundingReport, ServiceManager, ServiceRecord, ServiceRequest, ServiceSummary, StepOutcome,
    UpdateRequest,
};

#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<ServiceManager>,
    pub health_checker: HealthChecker,
}

/// Decode a JSON body; an empty body yields the default value
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> OperateResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| OperateError::invalid_request(e.to_string()))
}

fn required_body<T: DeserializeOwned>(body: &Bytes) -> OperateResult<T> {
    serde_json::from_slice(body).map_err(|e| OperateError::invalid_request(e.to_string()))
}

pub async fn list_services(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ServiceSummary>>, OperateError> {
    Ok(Json(state.manager.list().await?))
}

pub async fn get_service(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> Result<Json<ServiceRecord>, OperateError> {
    Ok(Json(state.manager.get(&hash).await?))
}

pub async fn deploy_service(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
    body: Bytes,
) -> Result<Json<ServiceRecord>, OperateError> {
    let request: ServiceRequest = optional_body(&body)?;
    info!(hash = %hash, "Deploy requested");
    Ok(Json(state.manager.deploy(&hash, request).await?))
}

pub async fn update_service(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
    body: Bytes,
) -> Result<Json<ServiceRecord>, OperateError> {
    let request: UpdateRequest = required_body(&body)?;
    info!(old_hash = %hash, new_hash = %request.new_hash, "Update requested");
    Ok(Json(state.manager.update(&hash, request).await?))
}

pub async fn terminate_service(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> Result<Json<StepOutcome>, OperateError> {
    Ok(Json(state.manager.terminate(&hash).await?))
}

pub async fn unbond_service(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> Result<Json<StepOutcome>, OperateError> {
    Ok(Json(state.manager.unbond(&hash).await?))
}

pub async fn stake_service(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> Result<Json<StepOutcome>, OperateError> {
    Ok(Json(state.manager.stake(&hash).await?))
}

pub async fn unstake_service(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> Result<Json<StepOutcome>, OperateError> {
    Ok(Json(state.manager.unstake(&hash).await?))
}

pub async fn fund_service(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> Result<Json<FundingReport>, OperateError> {
    Ok(Json(state.manager.fund(&hash).await?))
}

pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let status = state.health_checker.check_health().await;
    let code = match status.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
    };
    (code, Json(status))
}

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/services", get(list_services))
        .route(
            "/api/services/{hash}",
            get(get_service).put(update_service),
        )
        .route("/api/services/{hash}/deploy", post(deploy_service))
        .route("/api/services/{hash}/terminate", post(terminate_service))
        .route("/api/services/{hash}/unbond", post(unbond_service))
        .route("/api/services/{hash}/stake", post(stake_service))
        .route("/api/services/{hash}/unstake", post(unstake_service))
        .route("/api/services/{hash}/fund", post(fund_service))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_is_default_request() {
        let request: ServiceRequest = optional_body(&Bytes::from_static(b"")).unwrap();
        assert!(request.rpc.is_none());
        assert!(request.user_params.is_none());

        let request: ServiceRequest = optional_body(&Bytes::from_static(b" \n")).unwrap();
        assert!(request.chain.is_none());
    }

    #[test]
    fn test_body_fields_are_camel_case() {
        let request: ServiceRequest = optional_body(&Bytes::from_static(
            br#"{"rpc":"http://localhost:8545","chain":"goerli"}"#,
        ))
        .unwrap();
        assert_eq!(request.rpc.as_deref(), Some("http://localhost:8545"));
        assert_eq!(
            request.chain,
            Some(crate::chains::traits::ChainType::Goerli)
        );

        let update: UpdateRequest =
            required_body(&Bytes::from_static(br#"{"newHash":"bafybeinew"}"#)).unwrap();
        assert_eq!(update.new_hash, "bafybeinew");
    }

    #[test]
    fn test_malformed_body_is_invalid_request() {
        let err = optional_body::<ServiceRequest>(&Bytes::from_static(b"{not json"))
            .unwrap_err();
        assert!(matches!(err, OperateError::InvalidRequest { .. }));

        let err = required_body::<UpdateRequest>(&Bytes::from_static(b"")).unwrap_err();
        assert!(matches!(err, OperateError::InvalidRequest { .. }));
    }
}
