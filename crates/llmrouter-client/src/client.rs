//! Unified client: one entry point over every binding.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use llmrouter_transport::{Result, RouterError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::api::{InferenceApi, TokenStream};
use crate::config::RouterConfig;
use crate::http_client::HttpClient;
use crate::models::{
    BatchInferenceRequest, BatchInferenceResponse, InferenceOptions, InferenceRequest, InferenceResponse,
    LoadModelRequest, LoadModelResponse, ModelInfo, SystemMetrics,
};
use crate::rpc_client::RpcClient;
use crate::ws_client::WebSocketClient;

/// Binding used for the logical operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Http,
    WebSocket,
    Rpc,
}

/// Owns one client per binding and routes calls to the selected one.
///
/// Socket clients are built eagerly but connect on first use. A session id,
/// when set, is attached to inference requests that carry none.
#[derive(Debug)]
pub struct Client {
    config: RouterConfig,
    http: HttpClient,
    websocket: WebSocketClient,
    rpc: Option<RpcClient>,
    protocol: Protocol,
    session_id: RwLock<Option<String>>,
}

impl Client {
    /// Builds every binding from `config`. The RPC binding is skipped when
    /// no RPC URL is configured.
    pub fn new(config: RouterConfig) -> Result<Self> {
        let http = HttpClient::new(&config)?;
        let websocket = WebSocketClient::new(&config)?;
        let rpc = match config.rpc_url {
            Some(_) => Some(RpcClient::new(&config)?),
            None => None,
        };
        info!(base_url = %config.base_url, "LLM Router client created");
        Ok(Self::from_parts(config, http, websocket, rpc))
    }

    /// Client configured from `LLM_ROUTER_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::new(RouterConfig::from_env()?)
    }

    /// Assembles a client from prebuilt bindings.
    pub fn from_parts(config: RouterConfig, http: HttpClient, websocket: WebSocketClient, rpc: Option<RpcClient>) -> Self {
        Self { config, http, websocket, rpc, protocol: Protocol::default(), session_id: RwLock::new(None) }
    }

    /// Selects the binding for the logical operations.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// The selected protocol.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The configuration the client was built from.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The HTTP binding.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// The WebSocket binding, for rooms and events.
    pub fn websocket(&self) -> &WebSocketClient {
        &self.websocket
    }

    /// The RPC binding. Fails when no RPC URL is configured.
    pub fn rpc(&self) -> Result<&RpcClient> {
        self.rpc.as_ref().ok_or_else(|| RouterError::configuration("RPC URL not configured"))
    }

    fn api(&self) -> Result<&dyn InferenceApi> {
        let api: &dyn InferenceApi = match self.protocol {
            Protocol::Http => &self.http,
            Protocol::WebSocket => &self.websocket,
            Protocol::Rpc => self.rpc()?,
        };
        Ok(api)
    }

    /// Attaches `session_id` to inference requests that carry none.
    pub fn set_session_id(&self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        debug!(session_id = %session_id, "Session set");
        *self.session_id.write().unwrap_or_else(PoisonError::into_inner) = Some(session_id);
    }

    /// Stops attaching a session id.
    pub fn clear_session(&self) {
        *self.session_id.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// The current session id, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn with_session(&self, mut request: InferenceRequest) -> InferenceRequest {
        if request.session_id.is_none() {
            request.session_id = self.session_id();
        }
        request
    }

    /// Runs `prompt` with default options.
    pub async fn quick_inference(&self, prompt: impl Into<String>) -> Result<InferenceResponse> {
        self.inference(InferenceRequest::new(prompt)).await
    }

    /// One-shot inference with explicit generation options.
    pub async fn quick_inference_with_options(
        &self,
        prompt: impl Into<String>,
        options: InferenceOptions,
    ) -> Result<InferenceResponse> {
        self.inference(InferenceRequest::new(prompt).options(options)).await
    }
}

#[async_trait]
impl InferenceApi for Client {
    async fn health_check(&self) -> Result<Value> {
        self.api()?.health_check().await
    }

    async fn get_status(&self) -> Result<Value> {
        self.api()?.get_status().await
    }

    async fn get_metrics(&self) -> Result<SystemMetrics> {
        self.api()?.get_metrics().await
    }

    async fn list_models(&self, include_unloaded: bool) -> Result<Vec<ModelInfo>> {
        self.api()?.list_models(include_unloaded).await
    }

    async fn get_model(&self, model_id: &str) -> Result<ModelInfo> {
        self.api()?.get_model(model_id).await
    }

    async fn load_model(&self, request: LoadModelRequest) -> Result<LoadModelResponse> {
        self.api()?.load_model(request).await
    }

    async fn unload_model(&self, model_id: &str, force: bool) -> Result<Value> {
        self.api()?.unload_model(model_id, force).await
    }

    async fn inference(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        self.api()?.inference(self.with_session(request)).await
    }

    async fn stream_inference(&self, request: InferenceRequest) -> Result<TokenStream> {
        self.api()?.stream_inference(self.with_session(request)).await
    }

    async fn batch_inference(&self, mut request: BatchInferenceRequest) -> Result<BatchInferenceResponse> {
        request.requests = request.requests.into_iter().map(|r| self.with_session(r)).collect();
        self.api()?.batch_inference(request).await
    }

    /// Closes every socket binding.
    async fn close(&self) -> Result<()> {
        self.websocket.close().await?;
        if let Some(rpc) = &self.rpc {
            rpc.close().await?;
        }
        self.http.close().await?;
        info!("LLM Router client closed");
        Ok(())
    }
}
