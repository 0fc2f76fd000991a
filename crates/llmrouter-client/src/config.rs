//! Client configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use llmrouter_transport::{HttpTransportConfig, RateLimitConfig, Result, RetryConfig, RouterError};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Prefix of every environment variable read by [`RouterConfig::from_env`].
pub const ENV_PREFIX: &str = "LLM_ROUTER_";

/// Default `User-Agent` value.
pub const DEFAULT_USER_AGENT: &str = concat!("llm-router-rust/", env!("CARGO_PKG_VERSION"));

/// Settings for streamed responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Longest wait for the next chunk before the stream fails.
    pub pull_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { pull_timeout_secs: 300 }
    }
}

/// Configuration shared by every transport binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Base URL of the HTTP API, e.g. `http://localhost:3000`.
    pub base_url: String,
    /// `host:port` of the RPC endpoint.
    pub rpc_url: Option<String>,
    /// WebSocket URL. Derived from `base_url` when unset.
    pub websocket_url: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Connect timeout in seconds for HTTP and socket handshakes.
    pub connect_timeout_secs: u64,
    /// Total attempts per HTTP call.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub retry_delay_ms: u64,
    /// Bearer token sent as `Authorization`.
    pub api_key: Option<String>,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Extra headers sent with every HTTP request and socket handshake.
    pub headers: BTreeMap<String, String>,
    /// Client-side throttling of HTTP calls.
    pub rate_limit: RateLimitConfig,
    /// Streaming read settings.
    pub stream: StreamConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            rpc_url: Some("localhost:50051".to_string()),
            websocket_url: None,
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_retries: 3,
            retry_delay_ms: 1000,
            api_key: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: BTreeMap::new(),
            rate_limit: RateLimitConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Default configuration pointing at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), ..Self::default() }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
        self.rpc_url = Some(rpc_url.into());
        self
    }

    pub fn websocket_url(mut self, websocket_url: impl Into<String>) -> Self {
        self.websocket_url = Some(websocket_url.into());
        self
    }

    /// Per-request timeout. Stored in whole seconds, rounded up.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = ceil_secs(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Longest wait for the next stream chunk. Rounded up to whole seconds.
    pub fn stream_pull_timeout(mut self, timeout: Duration) -> Self {
        self.stream.pull_timeout_secs = ceil_secs(timeout);
        self
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Per-chunk timeout for streams.
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.stream.pull_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Checks URLs and timeouts.
    pub fn validate(&self) -> Result<()> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| RouterError::configuration(format!("invalid base URL {}: {e}", self.base_url)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(RouterError::configuration(format!(
                "base URL must use http or https, got {}",
                base.scheme()
            )));
        }
        if let Some(rpc_url) = &self.rpc_url {
            if rpc_url.contains("://") {
                Url::parse(rpc_url)
                    .map_err(|e| RouterError::configuration(format!("invalid RPC URL {rpc_url}: {e}")))?;
            } else if rpc_url.rsplit_once(':').map_or(true, |(host, port)| host.is_empty() || port.parse::<u16>().is_err()) {
                return Err(RouterError::configuration(format!("RPC address must be host:port, got {rpc_url}")));
            }
        }
        if let Some(ws_url) = &self.websocket_url {
            let url = Url::parse(ws_url)
                .map_err(|e| RouterError::configuration(format!("invalid WebSocket URL {ws_url}: {e}")))?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(RouterError::configuration(format!(
                    "WebSocket URL must use ws or wss, got {}",
                    url.scheme()
                )));
            }
        }
        if self.timeout_secs == 0 {
            return Err(RouterError::configuration("timeout must be greater than 0"));
        }
        if self.stream.pull_timeout_secs == 0 {
            return Err(RouterError::configuration("stream pull timeout must be greater than 0"));
        }
        Ok(())
    }

    /// The configured WebSocket URL, or the base URL with its scheme swapped.
    pub fn websocket_url_or_default(&self) -> String {
        if let Some(url) = &self.websocket_url {
            return url.clone();
        }
        if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        }
    }

    /// Whether the base URL uses TLS.
    pub fn is_tls_enabled(&self) -> bool {
        self.base_url.starts_with("https://")
    }

    /// `Authorization` (when a key is set), `User-Agent` and any extra headers.
    pub fn auth_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(self.headers.len() + 2);
        if let Some(key) = &self.api_key {
            headers.push(("Authorization".to_string(), format!("Bearer {key}")));
        }
        headers.push(("User-Agent".to_string(), self.user_agent.clone()));
        headers.extend(self.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        headers
    }

    /// Retry settings for the HTTP path. At least one attempt is made.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries.max(1), Duration::from_millis(self.retry_delay_ms))
    }

    /// Settings for the HTTP transport.
    pub fn http_transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            user_agent: self.user_agent.clone(),
            timeout: self.request_timeout(),
            connect_timeout: self.connect_timeout(),
            stream_timeout: self.pull_timeout(),
            headers: self.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            retry: self.retry_config(),
            rate_limit: self.rate_limit.clone(),
            ..HttpTransportConfig::default()
        }
    }

    /// Reads `LLM_ROUTER_*` variables over the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Like [`RouterConfig::from_env`], reading variables through `lookup`.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));
        let mut config = Self::default();

        if let Some(base_url) = var("BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(rpc_url) = var("RPC_URL").or_else(|| var("GRPC_URL")) {
            config.rpc_url = Some(rpc_url);
        }
        if let Some(ws_url) = var("WEBSOCKET_URL") {
            config.websocket_url = Some(ws_url);
        }
        if let Some(api_key) = var("API_KEY") {
            config.api_key = Some(api_key);
        }
        if let Some(timeout) = var("TIMEOUT") {
            config.timeout_secs = parse_var("TIMEOUT", &timeout)?;
        }
        if let Some(retries) = var("MAX_RETRIES") {
            config.max_retries = parse_var("MAX_RETRIES", &retries)?;
        }
        if let Some(delay) = var("RETRY_DELAY_MS") {
            config.retry_delay_ms = parse_var("RETRY_DELAY_MS", &delay)?;
        }
        if let Some(user_agent) = var("USER_AGENT") {
            config.user_agent = user_agent;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML or JSON file, chosen by extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

        let config: RouterConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as TOML.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RouterError::configuration(format!("invalid {ENV_PREFIX}{name} value {value:?}: {e}")))
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
