//! Request/response binding over a persistent socket.
//!
//! The connection is opened on first use and reopened on the next call
//! after it closes. Event handlers live in a registry that survives
//! reconnects.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use llmrouter_transport::{Binding, Connection, Connector, EventRegistry, ResponseStream, Result};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::api::{from_payload, model_from_payload, models_from_payload, to_payload, token_stream, InferenceApi, TokenStream};
use crate::models::{
    BatchInferenceRequest, BatchInferenceResponse, InferenceRequest, InferenceResponse, LoadModelRequest,
    LoadModelResponse, ModelInfo, SystemMetrics, UnloadModelRequest,
};

/// Socket request types understood by the router.
pub mod request_types {
    /// Server liveness and version.
    pub const HEALTH: &str = "health";
    /// Router status summary.
    pub const STATUS: &str = "status";
    /// Host and per-model metrics.
    pub const METRICS: &str = "metrics";
    /// Model listing, optionally including unloaded models.
    pub const LIST_MODELS: &str = "list_models";
    /// One model by id.
    pub const GET_MODEL: &str = "get_model";
    /// Load a model from a source.
    pub const LOAD_MODEL: &str = "load_model";
    /// Unload a model, optionally forced.
    pub const UNLOAD_MODEL: &str = "unload_model";
    /// Single inference; also the request type of streamed inference.
    pub const INFERENCE: &str = "inference";
    /// Batch of inference requests.
    pub const BATCH_INFERENCE: &str = "batch_inference";
}

use request_types::*;

/// Shared client for the WebSocket and RPC bindings.
pub struct SocketClient {
    connector: Arc<dyn Connector>,
    binding: Binding,
    events: Arc<EventRegistry>,
    connection: Mutex<Option<Arc<Connection>>>,
    timeout: Duration,
    pull_timeout: Duration,
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketClient")
            .field("endpoint", &self.connector.endpoint())
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

impl SocketClient {
    /// Creates a client. Nothing is connected until the first call.
    pub fn new(connector: Arc<dyn Connector>, binding: Binding, timeout: Duration, pull_timeout: Duration) -> Self {
        Self {
            connector,
            binding,
            events: Arc::new(EventRegistry::new()),
            connection: Mutex::new(None),
            timeout,
            pull_timeout,
        }
    }

    /// Handlers for server-pushed events.
    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    /// Which binding this client serves.
    pub fn binding(&self) -> Binding {
        self.binding
    }

    /// Returns the live connection, opening a new one if there is none.
    pub async fn connect(&self) -> Result<Arc<Connection>> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            if !conn.is_closed() {
                return Ok(Arc::clone(conn));
            }
            debug!(endpoint = %conn.endpoint(), "Previous connection closed, reconnecting");
        }
        let conn = Arc::new(Connection::open(self.connector.as_ref(), self.binding, Arc::clone(&self.events)).await?);
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Whether a live connection is currently held.
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.as_ref().is_some_and(|conn| !conn.is_closed())
    }

    /// Sends `request_type` and waits for the reply.
    pub async fn request(&self, request_type: &str, payload: Value) -> Result<Value> {
        self.connect().await?.request(request_type, payload, self.timeout).await
    }

    /// Sends a streamed `request_type`.
    pub async fn stream(&self, request_type: &str, payload: Value) -> Result<ResponseStream> {
        self.connect().await?.stream(request_type, payload, self.pull_timeout).await
    }

    /// Closes the connection, failing outstanding requests. Returns how many
    /// were failed.
    pub async fn disconnect(&self) -> usize {
        let conn = self.connection.lock().await.take();
        match conn {
            Some(conn) => {
                let failed = conn.close().await;
                info!(endpoint = %conn.endpoint(), failed, "Disconnected");
                failed
            }
            None => 0,
        }
    }
}

#[async_trait]
impl InferenceApi for SocketClient {
    async fn health_check(&self) -> Result<Value> {
        self.request(HEALTH, json!({})).await
    }

    async fn get_status(&self) -> Result<Value> {
        self.request(STATUS, json!({})).await
    }

    async fn get_metrics(&self) -> Result<SystemMetrics> {
        from_payload(self.request(METRICS, json!({})).await?, "metrics")
    }

    async fn list_models(&self, include_unloaded: bool) -> Result<Vec<ModelInfo>> {
        models_from_payload(self.request(LIST_MODELS, json!({"include_unloaded": include_unloaded})).await?)
    }

    async fn get_model(&self, model_id: &str) -> Result<ModelInfo> {
        model_from_payload(self.request(GET_MODEL, json!({"model_id": model_id})).await?)
    }

    async fn load_model(&self, request: LoadModelRequest) -> Result<LoadModelResponse> {
        request.validate()?;
        from_payload(self.request(LOAD_MODEL, to_payload(&request)?).await?, "load model")
    }

    async fn unload_model(&self, model_id: &str, force: bool) -> Result<Value> {
        self.request(UNLOAD_MODEL, to_payload(&UnloadModelRequest::new(model_id, force))?).await
    }

    async fn inference(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        request.validate()?;
        from_payload(self.request(INFERENCE, to_payload(&request)?).await?, "inference")
    }

    async fn stream_inference(&self, request: InferenceRequest) -> Result<TokenStream> {
        request.validate()?;
        let stream = self.stream(INFERENCE, to_payload(&request.streaming())?).await?;
        Ok(token_stream(Box::pin(stream.into_stream())))
    }

    async fn batch_inference(&self, request: BatchInferenceRequest) -> Result<BatchInferenceResponse> {
        request.validate()?;
        from_payload(self.request(BATCH_INFERENCE, to_payload(&request)?).await?, "batch inference")
    }

    async fn close(&self) -> Result<()> {
        self.disconnect().await;
        Ok(())
    }
}

/// Implements [`InferenceApi`] for a wrapper with an `inner: SocketClient` field.
macro_rules! delegate_inference_api {
    ($client:ty) => {
        #[async_trait::async_trait]
        impl $crate::api::InferenceApi for $client {
            async fn health_check(&self) -> llmrouter_transport::Result<serde_json::Value> {
                self.inner.health_check().await
            }

            async fn get_status(&self) -> llmrouter_transport::Result<serde_json::Value> {
                self.inner.get_status().await
            }

            async fn get_metrics(&self) -> llmrouter_transport::Result<$crate::models::SystemMetrics> {
                self.inner.get_metrics().await
            }

            async fn list_models(
                &self,
                include_unloaded: bool,
            ) -> llmrouter_transport::Result<Vec<$crate::models::ModelInfo>> {
                self.inner.list_models(include_unloaded).await
            }

            async fn get_model(&self, model_id: &str) -> llmrouter_transport::Result<$crate::models::ModelInfo> {
                self.inner.get_model(model_id).await
            }

            async fn load_model(
                &self,
                request: $crate::models::LoadModelRequest,
            ) -> llmrouter_transport::Result<$crate::models::LoadModelResponse> {
                self.inner.load_model(request).await
            }

            async fn unload_model(&self, model_id: &str, force: bool) -> llmrouter_transport::Result<serde_json::Value> {
                self.inner.unload_model(model_id, force).await
            }

            async fn inference(
                &self,
                request: $crate::models::InferenceRequest,
            ) -> llmrouter_transport::Result<$crate::models::InferenceResponse> {
                self.inner.inference(request).await
            }

            async fn stream_inference(
                &self,
                request: $crate::models::InferenceRequest,
            ) -> llmrouter_transport::Result<$crate::api::TokenStream> {
                self.inner.stream_inference(request).await
            }

            async fn batch_inference(
                &self,
                request: $crate::models::BatchInferenceRequest,
            ) -> llmrouter_transport::Result<$crate::models::BatchInferenceResponse> {
                self.inner.batch_inference(request).await
            }

            async fn close(&self) -> llmrouter_transport::Result<()> {
                self.inner.close().await
            }
        }
    };
}

pub(crate) use delegate_inference_api;
