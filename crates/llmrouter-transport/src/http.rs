//! Stateless HTTP path: rate-limited, retried JSON calls and SSE streaming.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{RequestBuilder, Response};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Result, RouterError};
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::retry::{RetryConfig, RetryExecutor};

/// Boxed stream of decoded JSON chunks.
pub type ValueStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Scheme, host and port, e.g. `http://localhost:3000`.
    pub base_url: String,
    /// Path prefix of every endpoint.
    pub api_prefix: String,
    /// Sent as a bearer token when set.
    pub api_key: Option<String>,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Per-request timeout for JSON calls.
    pub timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Longest wait for the next chunk of a streamed body.
    pub stream_timeout: Duration,
    /// Extra headers sent with every request.
    pub headers: Vec<(String, String)>,
    /// Backoff policy for idempotent failures.
    pub retry: RetryConfig,
    /// Token bucket shared by every call on the transport.
    pub rate_limit: RateLimitConfig,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_prefix: "/api/v1".to_string(),
            api_key: None,
            user_agent: concat!("llm-router-rust/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            stream_timeout: Duration::from_secs(300),
            headers: Vec::new(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Retrying, rate-limited JSON transport over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    stream_timeout: Duration,
    retry: RetryExecutor,
    limiter: Arc<RateLimiter>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").field("endpoint", &self.endpoint).finish_non_exhaustive()
    }
}

fn header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| RouterError::configuration(format!("invalid header name {name}: {e}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| RouterError::configuration(format!("invalid value for header {name}: {e}")))?;
    Ok((name, value))
}

impl HttpTransport {
    /// Builds the underlying client. Fails on unusable headers.
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let (_, agent) = header(USER_AGENT.as_str(), &config.user_agent)?;
        headers.insert(USER_AGENT, agent);
        if let Some(key) = &config.api_key {
            let (_, bearer) = header(AUTHORIZATION.as_str(), &format!("Bearer {key}"))?;
            headers.insert(AUTHORIZATION, bearer);
        }
        for (name, value) in &config.headers {
            let (name, value) = header(name, value)?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| RouterError::configuration(format!("failed to build HTTP client: {e}")))?;

        let endpoint = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.api_prefix.trim_matches('/')
        );
        info!(endpoint = %endpoint, "HTTP transport initialized");

        Ok(Self {
            client,
            endpoint,
            timeout: config.timeout,
            stream_timeout: config.stream_timeout,
            retry: RetryExecutor::new(config.retry),
            limiter: Arc::new(RateLimiter::new(config.rate_limit)),
        })
    }

    /// Full URL of `path` under the API prefix.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    /// The limiter shared by every call on this transport.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    async fn call(&self, build: impl Fn() -> RequestBuilder) -> Result<Value> {
        self.retry
            .execute(|| async {
                self.limiter.acquire().await;
                let response = build().timeout(self.timeout).send().await?;
                decode_response(response).await
            })
            .await
    }

    /// GET `path` with query parameters.
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        self.call(|| self.client.get(&url).query(query)).await
    }

    /// POST a JSON body to `path`.
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        self.call(|| self.client.post(&url).json(body)).await
    }

    /// POST to a streaming endpoint and decode its `data: ` frames.
    ///
    /// Only opening the stream is retried. Once the body is flowing, a
    /// failure ends the stream with a streaming error.
    pub async fn post_stream(&self, path: &str, body: &Value) -> Result<ValueStream> {
        let url = self.url(path);
        debug!(url = %url, "POST (stream)");
        let response = self
            .retry
            .execute(|| async {
                self.limiter.acquire().await;
                let response = self.client.post(&url).json(body).send().await?;
                if response.status().is_success() {
                    Ok(response)
                } else {
                    Err(error_from_response(response).await)
                }
            })
            .await?;
        Ok(sse_stream(Box::pin(response.bytes_stream()), self.stream_timeout))
    }
}

async fn decode_response(response: Response) -> Result<Value> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    let bytes = response.bytes().await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// Maps a non-success response to an error, keeping the body.
async fn error_from_response(response: Response) -> RouterError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let err = match serde_json::from_str::<Value>(&text) {
        Ok(body) => {
            let message = body
                .get("error")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            RouterError::from_status(status, message, Some(body))
        }
        Err(_) => {
            let body = (!text.is_empty()).then(|| Value::String(text.clone()));
            RouterError::from_status(status, format!("HTTP {status}: {text}"), body)
        }
    };
    warn!(status, error = %err, "HTTP request failed");
    err
}

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// A `data: ` frame holding JSON.
    Data(Value),
    /// The `data: [DONE]` terminator.
    Done,
}

/// Incremental decoder for `data: ` framed bodies.
///
/// Bytes may arrive split anywhere; only complete lines are decoded.
/// Frames that are not valid JSON are logged and skipped.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    /// A decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes, returning every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line)
    }
}

fn decode_line(line: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\n', '\r']);
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }
    match serde_json::from_str(payload) {
        Ok(value) => Some(SseEvent::Data(value)),
        Err(e) => {
            warn!(error = %e, "Skipping undecodable stream frame");
            None
        }
    }
}

/// Whether a decoded chunk marks the end of its stream.
pub fn is_final_chunk(chunk: &Value) -> bool {
    ["is_complete", "complete", "done"]
        .iter()
        .any(|key| chunk.get(key).and_then(Value::as_bool).unwrap_or(false))
}

struct SseState<S> {
    body: S,
    decoder: SseLineDecoder,
    queue: VecDeque<Value>,
    done: bool,
    pull_timeout: Duration,
}

fn sse_stream<S>(body: S, pull_timeout: Duration) -> ValueStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + Unpin + 'static,
{
    let state = SseState { body, decoder: SseLineDecoder::new(), queue: VecDeque::new(), done: false, pull_timeout };
    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.queue.pop_front() {
                if is_final_chunk(&chunk) {
                    state.done = true;
                    state.queue.clear();
                }
                return Some((Ok(chunk), state));
            }
            if state.done {
                return None;
            }
            match tokio::time::timeout(state.pull_timeout, state.body.next()).await {
                Ok(Some(Ok(bytes))) => {
                    for event in state.decoder.push(&bytes) {
                        match event {
                            SseEvent::Data(value) if !state.done => state.queue.push_back(value),
                            SseEvent::Data(_) => {}
                            SseEvent::Done => state.done = true,
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    state.done = true;
                    let err = RouterError::streaming("stream interrupted", Some(Box::new(e)));
                    return Some((Err(err), state));
                }
                Ok(None) => {
                    state.done = true;
                    if let Some(SseEvent::Data(value)) = state.decoder.finish() {
                        state.queue.push_back(value);
                    }
                }
                Err(_) => {
                    state.done = true;
                    let err = RouterError::streaming(
                        format!("no stream data within {}ms", state.pull_timeout.as_millis()),
                        None,
                    );
                    return Some((Err(err), state));
                }
            }
        }
    }))
}
