//! HTTP ledger gateway
//!
//! Boundary adapter to the external on-chain manager that holds the contract
//! bindings and signs transactions. Every lifecycle call is forwarded as JSON
//! to `POST {base}/chains/{chain}/services/{op}`; agent keys are created and
//! fetched under `{base}/keys`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::chains::traits::{
    AgentKey, Address, ChainType, Credential, GatewayFactory, KeyProvider, LedgerError,
    LedgerGateway, LedgerResult, MintRequest, ServiceInfo, TokenId,
};
use crate::config::{ChainProfile, ContractAddresses};
use crate::logging::mask_address;
use crate::services::record::LedgerConfig;

/// Error body returned by the on-chain manager
#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MintResponse {
    token: i64,
}

#[derive(Debug, Deserialize)]
struct SlotsResponse {
    available: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateKeyResponse {
    key_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyResponse {
    address: Address,
    private_key: String,
}

/// Envelope shared by all lifecycle calls
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayRequest<'a, T: Serialize> {
    rpc: &'a str,
    contracts: &'a ContractAddresses,
    #[serde(flatten)]
    params: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenParams<'a> {
    token: TokenId,
    #[serde(skip_serializing_if = "Option::is_none")]
    staking_token: Option<&'a Address>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterParams<'a> {
    token: TokenId,
    instances: &'a [Address],
    agent_ids: &'a [u32],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeployParams<'a> {
    token: TokenId,
    reuse_multisig: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    staking_token: Option<&'a Address>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StakeParams<'a> {
    token: TokenId,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_registry: Option<&'a Address>,
    staking_contract: &'a Address,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapParams<'a> {
    token: TokenId,
    multisig: &'a Address,
    owner_key: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StakingContractParams<'a> {
    staking_contract: &'a Address,
}

// ============================================================================
// Transport
// ============================================================================

/// Shared HTTP client for the on-chain manager
#[derive(Debug, Clone)]
pub struct HttpGatewayClient {
    http_client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpGatewayClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> LedgerResult<Self> {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(LedgerError::config_error(format!(
                "gateway URL must be an http(s) URL: {}",
                base_url
            )));
        }

        let http_client = Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(10)
            .user_agent("Operate-Backend/1.0")
            .build()
            .map_err(|e| LedgerError::config_error(format!("Failed to create HTTP client: {}", e)))?;

        info!(gateway = %base_url, "Ledger gateway client initialized");

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> LedgerResult<reqwest::Response> {
        let response = timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| LedgerError::Timeout {
                seconds: self.request_timeout.as_secs(),
            })?
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::Timeout {
                        seconds: self.request_timeout.as_secs(),
                    }
                } else {
                    LedgerError::network_error(format!("Gateway request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GatewayErrorBody>(&text)
            .ok()
            .and_then(|body| body.message.or(body.error))
            .unwrap_or(text);

        warn!(status = status.as_u16(), message = %message, "Gateway call rejected");

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(LedgerError::network_error(format!("gateway returned {}: {}", status, message)))
        } else {
            Err(LedgerError::transaction_failed(message))
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> LedgerResult<T> {
        response
            .json()
            .await
            .map_err(|e| LedgerError::invalid_response(format!("JSON parsing error: {}", e)))
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> LedgerResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Gateway POST");
        self.send(self.http_client.post(&url).json(body)).await
    }
}

#[async_trait]
impl KeyProvider for HttpGatewayClient {
    async fn create(&self) -> LedgerResult<String> {
        let response = self.post("/keys", &serde_json::json!({})).await?;
        let created: CreateKeyResponse = Self::decode(response).await?;
        info!(key_id = %created.key_id, "Agent key created");
        Ok(created.key_id)
    }

    async fn get(&self, key_id: &str) -> LedgerResult<AgentKey> {
        let url = format!("{}/keys/{}", self.base_url, key_id);
        let response = self
            .send(self.http_client.get(&url))
            .await
            .map_err(|e| match e {
                LedgerError::TransactionFailed { .. } => LedgerError::KeyNotFound {
                    key_id: key_id.to_string(),
                },
                other => other,
            })?;
        let key: KeyResponse = Self::decode(response).await?;
        Ok(AgentKey {
            address: key.address,
            credential: Credential::new(key.private_key),
        })
    }
}

// ============================================================================
// Per-chain gateway
// ============================================================================

/// Ledger gateway bound to one chain and RPC endpoint
#[derive(Debug, Clone)]
pub struct HttpLedgerGateway {
    client: HttpGatewayClient,
    chain: ChainType,
    rpc: String,
    contracts: ContractAddresses,
}

impl HttpLedgerGateway {
    pub fn new(client: HttpGatewayClient, ledger: &LedgerConfig, profile: &ChainProfile) -> Self {
        Self {
            client,
            chain: ledger.chain,
            rpc: ledger.rpc.clone(),
            contracts: profile.contracts.clone(),
        }
    }

    async fn call<T: Serialize>(&self, op: &str, params: T) -> LedgerResult<reqwest::Response> {
        let path = format!("/chains/{}/services/{}", self.chain, op);
        let body = GatewayRequest {
            rpc: &self.rpc,
            contracts: &self.contracts,
            params,
        };
        self.client.post(&path, &body).await
    }
}

#[async_trait]
impl LedgerGateway for HttpLedgerGateway {
    async fn mint(&self, request: MintRequest) -> LedgerResult<TokenId> {
        let response = self.call("mint", &request).await?;
        let minted: MintResponse = HttpGatewayClient::decode(response).await?;
        let token = TokenId(minted.token);
        if !token.is_minted() {
            return Err(LedgerError::invalid_response(format!(
                "gateway returned unminted token {}",
                token
            )));
        }
        Ok(token)
    }

    async fn activate(&self, token: TokenId, staking_token: Option<&Address>) -> LedgerResult<()> {
        self.call("activate", TokenParams { token, staking_token })
            .await
            .map(|_| ())
    }

    async fn register(
        &self,
        token: TokenId,
        instances: &[Address],
        agent_ids: &[u32],
    ) -> LedgerResult<()> {
        self.call(
            "register",
            RegisterParams {
                token,
                instances,
                agent_ids,
            },
        )
        .await
        .map(|_| ())
    }

    async fn deploy(
        &self,
        token: TokenId,
        reuse_multisig: bool,
        staking_token: Option<&Address>,
    ) -> LedgerResult<()> {
        self.call(
            "deploy",
            DeployParams {
                token,
                reuse_multisig,
                staking_token,
            },
        )
        .await
        .map(|_| ())
    }

    async fn terminate(&self, token: TokenId, staking_token: Option<&Address>) -> LedgerResult<()> {
        self.call("terminate", TokenParams { token, staking_token })
            .await
            .map(|_| ())
    }

    async fn unbond(&self, token: TokenId, staking_token: Option<&Address>) -> LedgerResult<()> {
        self.call("unbond", TokenParams { token, staking_token })
            .await
            .map(|_| ())
    }

    async fn stake(
        &self,
        token: TokenId,
        service_registry: &Address,
        staking_contract: &Address,
    ) -> LedgerResult<()> {
        self.call(
            "stake",
            StakeParams {
                token,
                service_registry: Some(service_registry),
                staking_contract,
            },
        )
        .await
        .map(|_| ())
    }

    async fn unstake(&self, token: TokenId, staking_contract: &Address) -> LedgerResult<()> {
        self.call(
            "unstake",
            StakeParams {
                token,
                service_registry: None,
                staking_contract,
            },
        )
        .await
        .map(|_| ())
    }

    async fn swap(
        &self,
        token: TokenId,
        multisig: &Address,
        owner: &Credential,
    ) -> LedgerResult<()> {
        info!(token = %token, multisig = %mask_address(multisig.as_str()), "Swapping multisig owner");
        self.call(
            "swap",
            SwapParams {
                token,
                multisig,
                owner_key: owner.expose(),
            },
        )
        .await
        .map(|_| ())
    }

    async fn info(&self, token: TokenId) -> LedgerResult<ServiceInfo> {
        let response = self
            .call(
                "info",
                TokenParams {
                    token,
                    staking_token: None,
                },
            )
            .await?;
        HttpGatewayClient::decode(response).await
    }

    async fn staking_slots_available(&self, staking_contract: &Address) -> LedgerResult<bool> {
        let response = self
            .call("staking-slots", StakingContractParams { staking_contract })
            .await?;
        let slots: SlotsResponse = HttpGatewayClient::decode(response).await?;
        Ok(slots.available)
    }
}

/// Hands out gateways sharing one HTTP client
#[derive(Debug, Clone)]
pub struct HttpGatewayFactory {
    client: HttpGatewayClient,
}

impl HttpGatewayFactory {
    pub fn new(client: HttpGatewayClient) -> Self {
        Self { client }
    }
}

impl GatewayFactory for HttpGatewayFactory {
    fn connect(
        &self,
        ledger: &LedgerConfig,
        profile: &ChainProfile,
    ) -> LedgerResult<Arc<dyn LedgerGateway>> {
        if ledger.chain != profile.chain {
            return Err(LedgerError::config_error(format!(
                "profile for {} cannot serve chain {}",
                profile.chain, ledger.chain
            )));
        }
        Ok(Arc::new(HttpLedgerGateway::new(
            self.client.clone(),
            ledger,
            profile,
        )))
    }
}
