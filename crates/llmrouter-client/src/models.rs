//! Request and response types shared by every transport.
//!
//! Response types default every field so that sparse replies decode, and
//! unknown fields sent by newer servers are ignored.

use std::collections::HashMap;

use llmrouter_transport::{Result, RouterError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound for `max_tokens`.
pub const MAX_TOKENS_LIMIT: u32 = 8192;
/// Bounds for `BatchInferenceRequest::max_concurrent`.
pub const MAX_CONCURRENT_RANGE: (u32, u32) = (1, 20);
/// Smallest batch timeout accepted, in milliseconds.
pub const MIN_BATCH_TIMEOUT_MS: u64 = 1000;

/// Health of the service or of a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Degraded,
    Maintenance,
}

/// Generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceOptions {
    /// Maximum tokens to generate, 1 to 8192.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature, 0 to 2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling mass, 0 to 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Top-k sampling, at least 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// -2 to 2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    /// -2 to 2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(500),
            temperature: Some(0.7),
            top_p: Some(1.0),
            top_k: None,
            frequency_penalty: Some(0.0),
            presence_penalty: Some(0.0),
            stop_sequences: None,
            stream: Some(false),
            seed: None,
        }
    }
}

fn check_range<T: PartialOrd + std::fmt::Display + Copy>(name: &str, value: Option<T>, min: T, max: T) -> Result<()> {
    match value {
        Some(v) if !(min..=max).contains(&v) => {
            Err(RouterError::validation(format!("{name} must be between {min} and {max}, got {v}")))
        }
        _ => Ok(()),
    }
}

impl InferenceOptions {
    /// Options with the default generation settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn frequency_penalty(mut self, penalty: f32) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    pub fn presence_penalty(mut self, penalty: f32) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Appends a stop sequence.
    pub fn stop_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.stop_sequences.get_or_insert_with(Vec::new).push(sequence.into());
        self
    }

    /// Checks every bounded option.
    pub fn validate(&self) -> Result<()> {
        check_range("max_tokens", self.max_tokens, 1, MAX_TOKENS_LIMIT)?;
        check_range("temperature", self.temperature, 0.0, 2.0)?;
        check_range("top_p", self.top_p, 0.0, 1.0)?;
        check_range("top_k", self.top_k, 1, u32::MAX)?;
        check_range("frequency_penalty", self.frequency_penalty, -2.0, 2.0)?;
        check_range("presence_penalty", self.presence_penalty, -2.0, 2.0)?;
        Ok(())
    }
}

/// Per-request generation metrics reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceMetrics {
    pub latency_ms: Option<u64>,
    pub tokens_generated: Option<u32>,
    pub tokens_per_second: Option<f64>,
    /// Bytes.
    pub memory_used: Option<u64>,
    pub processing_time: Option<u64>,
    pub queue_time: Option<u64>,
}

/// A model known to the router.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelInfo {
    pub id: String,
    pub name: Option<String>,
    /// Weight format, such as `gguf` or `onnx`.
    pub format: Option<String>,
    pub source: Option<String>,
    pub loaded: bool,
    pub load_time: Option<u64>,
    pub memory_usage: Option<u64>,
    pub parameters: Option<HashMap<String, Value>>,
    pub version: Option<String>,
    pub capabilities: Option<Vec<String>>,
    pub status: Option<HealthStatus>,
}

/// A point in time as the router reports it: epoch milliseconds or an
/// RFC 3339 string, depending on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Milliseconds since the Unix epoch.
    Millis(i64),
    /// Textual timestamp, passed through unparsed.
    Text(String),
}

/// Usage counters for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelMetrics {
    pub model_id: String,
    pub total_requests: Option<u64>,
    pub total_tokens: Option<u64>,
    pub average_latency: Option<f64>,
    pub tokens_per_second: Option<f64>,
    pub memory_usage: Option<u64>,
    pub cpu_usage: Option<f64>,
    pub last_used: Option<Timestamp>,
    /// 0.0 to 1.0.
    pub error_rate: Option<f64>,
}

/// Host-level metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemMetrics {
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<u64>,
    pub memory_total: Option<u64>,
    pub disk_usage: Option<u64>,
    pub disk_total: Option<u64>,
    pub active_connections: Option<u32>,
    pub uptime_seconds: Option<u64>,
    pub load_average: Option<f64>,
    pub models: Option<Vec<ModelMetrics>>,
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), metadata: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Folds a conversation into one prompt, one `role: content` line per message.
pub fn fold_chat_prompt(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A single generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<InferenceOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), model_id: None, options: None, metadata: None, session_id: None }
    }

    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn options(mut self, options: InferenceOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Adds one metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.get_or_insert_with(HashMap::new).insert(key.into(), value);
        self
    }

    /// Rejects an empty prompt or out-of-range options.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.is_empty() {
            return Err(RouterError::validation("prompt must not be empty"));
        }
        match &self.options {
            Some(options) => options.validate(),
            None => Ok(()),
        }
    }

    /// Copy of this request with `options.stream` forced on.
    pub fn streaming(&self) -> Self {
        let mut request = self.clone();
        request.options = Some(request.options.take().unwrap_or_default().stream(true));
        request
    }
}

/// Result of a single generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceResponse {
    pub text: String,
    pub model_id: Option<String>,
    pub metrics: Option<InferenceMetrics>,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: Option<HashMap<String, Value>>,
}

/// One token of a streamed generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingResponse {
    pub token: String,
    pub is_complete: bool,
    pub model_id: Option<String>,
    pub metrics: Option<InferenceMetrics>,
    pub error: Option<String>,
}

/// Asks the router to load a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadModelRequest {
    /// File path or URL of the weights.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub force_reload: bool,
}

impl LoadModelRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into(), format: None, id: None, name: None, parameters: None, force_reload: false }
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.get_or_insert_with(HashMap::new).insert(key.into(), value);
        self
    }

    pub fn force_reload(mut self, force: bool) -> Self {
        self.force_reload = force;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            return Err(RouterError::validation("model source must not be empty"));
        }
        Ok(())
    }
}

/// Outcome of a load request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadModelResponse {
    pub success: bool,
    pub message: Option<String>,
    pub model: Option<ModelInfo>,
    pub error: Option<String>,
}

/// Asks the router to unload a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnloadModelRequest {
    pub model_id: String,
    #[serde(default)]
    pub force: bool,
}

impl UnloadModelRequest {
    pub fn new(model_id: impl Into<String>, force: bool) -> Self {
        Self { model_id: model_id.into(), force }
    }
}

/// Several generation requests run together on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInferenceRequest {
    pub requests: Vec<InferenceRequest>,
    /// 1 to 20.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<u32>,
    /// At least 1000.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl BatchInferenceRequest {
    /// A batch with five-way concurrency and a 30 second timeout.
    pub fn new(requests: Vec<InferenceRequest>) -> Self {
        Self { requests, max_concurrent: Some(5), timeout_ms: Some(30_000), fail_fast: false, priority: None }
    }

    pub fn max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Validates the batch limits and every contained request.
    pub fn validate(&self) -> Result<()> {
        if self.requests.is_empty() {
            return Err(RouterError::validation("batch must contain at least one request"));
        }
        let (min, max) = MAX_CONCURRENT_RANGE;
        check_range("max_concurrent", self.max_concurrent, min, max)?;
        check_range("timeout_ms", self.timeout_ms, MIN_BATCH_TIMEOUT_MS, u64::MAX)?;
        for (index, request) in self.requests.iter().enumerate() {
            request
                .validate()
                .map_err(|e| RouterError::validation(format!("request {index}: {e}")))?;
        }
        Ok(())
    }
}

/// Outcome of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchInferenceResponse {
    pub responses: Vec<InferenceResponse>,
    pub total_requests: u32,
    pub successful_requests: u32,
    pub failed_requests: u32,
    pub total_time_ms: Option<u64>,
    pub average_latency_ms: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inference_options_builder() {
        let options = InferenceOptions::new().max_tokens(100).temperature(0.8).stream(true);
        assert_eq!(options.max_tokens, Some(100));
        assert_eq!(options.temperature, Some(0.8));
        assert_eq!(options.stream, Some(true));
        assert_eq!(options.top_p, Some(1.0));
    }

    #[test]
    fn test_nan_options_are_rejected() {
        assert!(InferenceOptions::new().temperature(f32::NAN).validate().is_err());
        assert!(InferenceOptions::new().top_p(f32::NAN).validate().is_err());
        assert!(InferenceOptions::new().frequency_penalty(f32::NAN).validate().is_err());
        assert!(InferenceOptions::new().presence_penalty(f32::NAN).validate().is_err());
    }

    #[test]
    fn test_model_metrics_last_used_shapes() {
        let metrics: SystemMetrics = serde_json::from_value(json!({
            "models": [
                {"model_id": "m1", "last_used": 1718000000000u64},
                {"model_id": "m2", "last_used": "2024-06-10T06:13:20Z"},
                {"model_id": "m3"},
            ]
        }))
        .unwrap();
        let models = metrics.models.unwrap();
        assert_eq!(models[0].last_used, Some(Timestamp::Millis(1_718_000_000_000)));
        assert_eq!(models[1].last_used, Some(Timestamp::Text("2024-06-10T06:13:20Z".into())));
        assert_eq!(models[2].last_used, None);
    }

    #[test]
    fn test_inference_options_bounds() {
        assert!(InferenceOptions::new().validate().is_ok());
        assert!(InferenceOptions::new().max_tokens(8192).validate().is_ok());
        assert!(InferenceOptions::new().max_tokens(0).validate().is_err());
        assert!(InferenceOptions::new().max_tokens(8193).validate().is_err());
        assert!(InferenceOptions::new().temperature(2.5).validate().is_err());
        assert!(InferenceOptions::new().top_p(-0.1).validate().is_err());
        assert!(InferenceOptions::new().top_k(0).validate().is_err());
        assert!(InferenceOptions::new().frequency_penalty(-2.0).validate().is_ok());
        assert!(InferenceOptions::new().presence_penalty(2.1).validate().is_err());
    }

    #[test]
    fn test_validation_error_kind() {
        let err = InferenceOptions::new().temperature(3.0).validate().unwrap_err();
        assert!(matches!(err, RouterError::Validation { .. }));
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_options_skip_unset_fields() {
        let value = serde_json::to_value(InferenceOptions::new().max_tokens(5).stream(false)).unwrap();
        assert_eq!(value["max_tokens"], 5);
        assert!(value.get("top_k").is_none());
        assert!(value.get("seed").is_none());
    }

    #[test]
    fn test_stop_sequences_accumulate() {
        let options = InferenceOptions::new().stop_sequence("\n").stop_sequence("END");
        assert_eq!(options.stop_sequences, Some(vec!["\n".to_string(), "END".to_string()]));
    }

    #[test]
    fn test_inference_request_builder() {
        let request = InferenceRequest::new("Hello, world!")
            .model_id("test-model")
            .session_id("session-123")
            .metadata("source", json!("cli"));
        assert_eq!(request.prompt, "Hello, world!");
        assert_eq!(request.model_id.as_deref(), Some("test-model"));
        assert_eq!(request.session_id.as_deref(), Some("session-123"));
        assert_eq!(request.metadata.unwrap()["source"], "cli");
    }

    #[test]
    fn test_inference_request_validate() {
        assert!(InferenceRequest::new("").validate().is_err());
        assert!(InferenceRequest::new("hi").validate().is_ok());
        let bad = InferenceRequest::new("hi").options(InferenceOptions::new().max_tokens(0));
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_streaming_forces_stream_flag() {
        let request = InferenceRequest::new("hi").options(InferenceOptions::new().max_tokens(7));
        let streaming = request.streaming();
        let options = streaming.options.unwrap();
        assert_eq!(options.stream, Some(true));
        assert_eq!(options.max_tokens, Some(7));
        assert_eq!(InferenceRequest::new("hi").streaming().options.unwrap().stream, Some(true));
    }

    #[test]
    fn test_chat_message_roles() {
        assert_eq!(ChatMessage::user("Hello").role, Role::User);
        assert_eq!(ChatMessage::assistant("Hi").role, Role::Assistant);
        assert_eq!(serde_json::to_value(ChatMessage::system("Be brief")).unwrap()["role"], "system");
    }

    #[test]
    fn test_fold_chat_prompt() {
        let messages = vec![
            ChatMessage::system("Be brief"),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello"),
        ];
        assert_eq!(fold_chat_prompt(&messages), "system: Be brief\nuser: Hi\nassistant: Hello");
        assert_eq!(fold_chat_prompt(&[]), "");
    }

    #[test]
    fn test_response_ignores_unknown_fields() {
        let response: InferenceResponse =
            serde_json::from_value(json!({"text": "pong", "success": true, "extra": {"x": 1}})).unwrap();
        assert_eq!(response.text, "pong");
        assert!(response.success);
        assert!(response.metrics.is_none());
    }

    #[test]
    fn test_health_status_uppercase() {
        assert_eq!(serde_json::to_value(HealthStatus::Healthy).unwrap(), "HEALTHY");
        let status: HealthStatus = serde_json::from_value(json!("DEGRADED")).unwrap();
        assert_eq!(status, HealthStatus::Degraded);
        assert_eq!(HealthStatus::default(), HealthStatus::Unknown);
    }

    #[test]
    fn test_load_model_request_builder() {
        let request = LoadModelRequest::new("./model.gguf").format("gguf").id("test-model").force_reload(true);
        assert_eq!(request.source, "./model.gguf");
        assert_eq!(request.format.as_deref(), Some("gguf"));
        assert!(request.force_reload);
        assert!(request.validate().is_ok());
        assert!(LoadModelRequest::new("").validate().is_err());
    }

    #[test]
    fn test_batch_inference_request_validate() {
        let batch = BatchInferenceRequest::new(vec![InferenceRequest::new("a"), InferenceRequest::new("b")])
            .max_concurrent(3)
            .timeout_ms(60_000)
            .fail_fast(true);
        assert!(batch.validate().is_ok());
        assert!(batch.clone().max_concurrent(0).validate().is_err());
        assert!(batch.clone().max_concurrent(21).validate().is_err());
        assert!(batch.clone().timeout_ms(999).validate().is_err());
        assert!(BatchInferenceRequest::new(vec![]).validate().is_err());

        let nested = BatchInferenceRequest::new(vec![InferenceRequest::new("")]);
        assert!(nested.validate().unwrap_err().to_string().contains("request 0"));
    }
}
