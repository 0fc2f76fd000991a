//! REST binding.

use async_trait::async_trait;
use llmrouter_transport::{HttpTransport, RateLimiter, Result, RouterError};
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::api::{from_payload, model_from_payload, models_from_payload, to_payload, token_stream, InferenceApi, TokenStream};
use crate::config::RouterConfig;
use crate::models::{
    BatchInferenceRequest, BatchInferenceResponse, InferenceRequest, InferenceResponse, LoadModelRequest,
    LoadModelResponse, ModelInfo, SystemMetrics, UnloadModelRequest,
};

/// `models/{id}` with the id percent-encoded as a single path segment.
fn model_path(model_id: &str) -> Result<String> {
    if model_id.is_empty() {
        return Err(RouterError::validation("model_id must not be empty"));
    }
    let mut url = Url::parse("http://router/models").map_err(|e| RouterError::configuration(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| RouterError::configuration("models URL cannot take path segments"))?
        .push(model_id);
    Ok(url.path().trim_start_matches('/').to_string())
}

/// Talks to the router's `/api/v1` endpoints. Cheap to clone; clones share
/// the connection pool and rate limiter.
#[derive(Debug, Clone)]
pub struct HttpClient {
    transport: HttpTransport,
}

impl HttpClient {
    /// Validates `config` and builds the transport.
    pub fn new(config: &RouterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { transport: HttpTransport::new(config.http_transport_config())? })
    }

    /// The underlying transport.
    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    /// The limiter applied to every call.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        self.transport.limiter()
    }
}

#[async_trait]
impl InferenceApi for HttpClient {
    async fn health_check(&self) -> Result<Value> {
        self.transport.get("health", &[]).await
    }

    async fn get_status(&self) -> Result<Value> {
        self.transport.get("status", &[]).await
    }

    async fn get_metrics(&self) -> Result<SystemMetrics> {
        from_payload(self.transport.get("metrics", &[]).await?, "metrics")
    }

    async fn list_models(&self, include_unloaded: bool) -> Result<Vec<ModelInfo>> {
        let query = [("include_unloaded", include_unloaded.to_string())];
        models_from_payload(self.transport.get("models", &query).await?)
    }

    async fn get_model(&self, model_id: &str) -> Result<ModelInfo> {
        model_from_payload(self.transport.get(&model_path(model_id)?, &[]).await?)
    }

    async fn load_model(&self, request: LoadModelRequest) -> Result<LoadModelResponse> {
        request.validate()?;
        let reply = self.transport.post("models/load", &to_payload(&request)?).await?;
        from_payload(reply, "load model")
    }

    async fn unload_model(&self, model_id: &str, force: bool) -> Result<Value> {
        let body = to_payload(&UnloadModelRequest::new(model_id, force))?;
        self.transport.post("models/unload", &body).await
    }

    async fn inference(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        request.validate()?;
        let reply = self.transport.post("inference", &to_payload(&request)?).await?;
        from_payload(reply, "inference")
    }

    async fn stream_inference(&self, request: InferenceRequest) -> Result<TokenStream> {
        request.validate()?;
        let body = to_payload(&request.streaming())?;
        debug!(model_id = ?request.model_id, "Opening inference stream");
        Ok(token_stream(self.transport.post_stream("inference/stream", &body).await?))
    }

    async fn batch_inference(&self, request: BatchInferenceRequest) -> Result<BatchInferenceResponse> {
        request.validate()?;
        let reply = self.transport.post("inference/batch", &to_payload(&request)?).await?;
        from_payload(reply, "batch inference")
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_path_encodes_segment() {
        assert_eq!(model_path("tiny").unwrap(), "models/tiny");
        assert_eq!(model_path("org/model").unwrap(), "models/org%2Fmodel");
        assert_eq!(model_path("a?b#c").unwrap(), "models/a%3Fb%23c");
    }

    #[test]
    fn test_model_path_rejects_empty_id() {
        assert!(model_path("").is_err());
    }
}
