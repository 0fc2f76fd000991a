//! The operations every binding offers.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use llmrouter_transport::{Result, RouterError, ValueStream};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::models::{
    fold_chat_prompt, BatchInferenceRequest, BatchInferenceResponse, ChatMessage, InferenceOptions,
    InferenceRequest, InferenceResponse, LoadModelRequest, LoadModelResponse, ModelInfo, StreamingResponse,
    SystemMetrics,
};

/// Tokens of a streamed generation, in order.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamingResponse>> + Send>>;

/// Logical operations of the router, independent of transport.
#[async_trait]
pub trait InferenceApi: Send + Sync {
    async fn health_check(&self) -> Result<Value>;

    async fn get_status(&self) -> Result<Value>;

    async fn get_metrics(&self) -> Result<SystemMetrics>;

    /// Loaded models, plus unloaded ones when `include_unloaded` is set.
    async fn list_models(&self, include_unloaded: bool) -> Result<Vec<ModelInfo>>;

    async fn get_model(&self, model_id: &str) -> Result<ModelInfo>;

    async fn load_model(&self, request: LoadModelRequest) -> Result<LoadModelResponse>;

    async fn unload_model(&self, model_id: &str, force: bool) -> Result<Value>;

    async fn inference(&self, request: InferenceRequest) -> Result<InferenceResponse>;

    /// Streams tokens. The request is sent with `options.stream` set.
    async fn stream_inference(&self, request: InferenceRequest) -> Result<TokenStream>;

    async fn batch_inference(&self, request: BatchInferenceRequest) -> Result<BatchInferenceResponse>;

    /// Runs a conversation as a single prompt of `role: content` lines.
    async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        model_id: Option<String>,
        options: Option<InferenceOptions>,
    ) -> Result<InferenceResponse> {
        let mut request = InferenceRequest::new(fold_chat_prompt(&messages));
        request.model_id = model_id;
        request.options = options;
        self.inference(request).await
    }

    /// Releases connections held by the binding.
    async fn close(&self) -> Result<()>;
}

pub(crate) fn to_payload<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

pub(crate) fn from_payload<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| RouterError::validation(format!("malformed {what} response: {e}")))
}

/// Accepts either a bare array or `{"models": [...]}`.
pub(crate) fn models_from_payload(value: Value) -> Result<Vec<ModelInfo>> {
    match value {
        Value::Object(mut map) if map.contains_key("models") => {
            from_payload(map.remove("models").unwrap_or_default(), "model list")
        }
        other => from_payload(other, "model list"),
    }
}

/// Accepts either a bare model or `{"model": {...}}`.
pub(crate) fn model_from_payload(value: Value) -> Result<ModelInfo> {
    match value {
        Value::Object(mut map) if map.get("model").is_some_and(Value::is_object) => {
            from_payload(map.remove("model").unwrap_or_default(), "model")
        }
        other => from_payload(other, "model"),
    }
}

pub(crate) fn token_stream(values: ValueStream) -> TokenStream {
    Box::pin(values.map(|item| item.and_then(|value| from_payload(value, "stream chunk"))))
}
