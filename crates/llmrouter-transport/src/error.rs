//! Error taxonomy shared by every transport binding.

use serde_json::Value;
use thiserror::Error;

/// Boxed underlying cause carried by network-level errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the router client.
///
/// Callers should branch on [`RouterError::kind`], never on the message text.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("network error: {message}")]
    Network {
        message: String,
        status: Option<u16>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("timeout: {message}")]
    Timeout { message: String, status: Option<u16> },

    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        status: Option<u16>,
        body: Option<Value>,
    },

    #[error("authentication failed: {message}")]
    Authentication {
        message: String,
        status: Option<u16>,
        body: Option<Value>,
    },

    #[error("validation error: {message}")]
    Validation {
        message: String,
        status: Option<u16>,
        body: Option<Value>,
    },

    #[error("model not found: {message}")]
    ModelNotFound {
        message: String,
        status: Option<u16>,
        body: Option<Value>,
    },

    #[error("inference error: {message}")]
    Inference {
        message: String,
        status: Option<u16>,
        body: Option<Value>,
    },

    #[error("streaming error: {message}")]
    Streaming {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("rpc error: {message}")]
    Rpc { message: String, code: Option<i64> },

    #[error("socket error: {message}")]
    Socket {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request failed: {message}")]
    RequestFailed {
        message: String,
        status: Option<u16>,
        body: Option<Value>,
        #[source]
        source: Option<BoxError>,
    },
}

/// Fieldless discriminant of [`RouterError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimit,
    Authentication,
    Validation,
    ModelNotFound,
    Inference,
    Streaming,
    Configuration,
    Rpc,
    Socket,
    ConnectionClosed,
    RequestFailed,
}

/// Result alias used throughout the router crates.
pub type Result<T> = std::result::Result<T, RouterError>;

impl RouterError {
    /// Network error without an HTTP status. Retryable.
    pub fn network(message: impl Into<String>, source: Option<BoxError>) -> Self {
        RouterError::Network { message: message.into(), status: None, source }
    }

    /// Transport-level timeout without an HTTP status. Retryable.
    pub fn timeout(message: impl Into<String>) -> Self {
        RouterError::Timeout { message: message.into(), status: None }
    }

    /// Rejected input, caught before or by the server.
    pub fn validation(message: impl Into<String>) -> Self {
        RouterError::Validation { message: message.into(), status: None, body: None }
    }

    /// Invalid or missing client configuration.
    pub fn configuration(message: impl Into<String>) -> Self {
        RouterError::Configuration { message: message.into() }
    }

    /// Failure while reading a streamed response.
    pub fn streaming(message: impl Into<String>, source: Option<BoxError>) -> Self {
        RouterError::Streaming { message: message.into(), source }
    }

    /// WebSocket binding failure.
    pub fn socket(message: impl Into<String>, source: Option<BoxError>) -> Self {
        RouterError::Socket { message: message.into(), source }
    }

    /// RPC binding failure.
    pub fn rpc(message: impl Into<String>) -> Self {
        RouterError::Rpc { message: message.into(), code: None }
    }

    /// Map an HTTP error status to its error kind.
    ///
    /// 400 validation, 401/403 authentication, 404 model-not-found,
    /// 408/504 timeout, 429 rate-limit, 500 inference, 502/503 network,
    /// anything else a generic request failure.
    pub fn from_status(status: u16, message: impl Into<String>, body: Option<Value>) -> Self {
        let message = message.into();
        let status_code = Some(status);
        match status {
            400 => RouterError::Validation { message, status: status_code, body },
            401 | 403 => RouterError::Authentication { message, status: status_code, body },
            404 => RouterError::ModelNotFound { message, status: status_code, body },
            408 | 504 => RouterError::Timeout { message, status: status_code },
            429 => RouterError::RateLimit { message, status: status_code, body },
            500 => RouterError::Inference { message, status: status_code, body },
            502 | 503 => RouterError::Network { message, status: status_code, source: None },
            _ => RouterError::RequestFailed { message, status: status_code, body, source: None },
        }
    }

    /// Returns the discriminant for branching.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::Network { .. } => ErrorKind::Network,
            RouterError::Timeout { .. } => ErrorKind::Timeout,
            RouterError::RateLimit { .. } => ErrorKind::RateLimit,
            RouterError::Authentication { .. } => ErrorKind::Authentication,
            RouterError::Validation { .. } => ErrorKind::Validation,
            RouterError::ModelNotFound { .. } => ErrorKind::ModelNotFound,
            RouterError::Inference { .. } => ErrorKind::Inference,
            RouterError::Streaming { .. } => ErrorKind::Streaming,
            RouterError::Configuration { .. } => ErrorKind::Configuration,
            RouterError::Rpc { .. } => ErrorKind::Rpc,
            RouterError::Socket { .. } => ErrorKind::Socket,
            RouterError::ConnectionClosed => ErrorKind::ConnectionClosed,
            RouterError::RequestFailed { .. } => ErrorKind::RequestFailed,
        }
    }

    /// HTTP status the error was decoded from, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RouterError::Network { status, .. }
            | RouterError::Timeout { status, .. }
            | RouterError::RateLimit { status, .. }
            | RouterError::Authentication { status, .. }
            | RouterError::Validation { status, .. }
            | RouterError::ModelNotFound { status, .. }
            | RouterError::Inference { status, .. }
            | RouterError::RequestFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Raw response payload kept for debugging.
    pub fn body(&self) -> Option<&Value> {
        match self {
            RouterError::RateLimit { body, .. }
            | RouterError::Authentication { body, .. }
            | RouterError::Validation { body, .. }
            | RouterError::ModelNotFound { body, .. }
            | RouterError::Inference { body, .. }
            | RouterError::RequestFailed { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    /// Whether the retry path may attempt the call again.
    ///
    /// Only connectivity failures and transport timeouts qualify. Anything
    /// decoded from an HTTP status is an application answer and is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            RouterError::Network { status: None, .. } => true,
            RouterError::Timeout { status: None, .. } => true,
            RouterError::Network { .. }
            | RouterError::Timeout { .. }
            | RouterError::RateLimit { .. }
            | RouterError::Authentication { .. }
            | RouterError::Validation { .. }
            | RouterError::ModelNotFound { .. }
            | RouterError::Inference { .. }
            | RouterError::Streaming { .. }
            | RouterError::Configuration { .. }
            | RouterError::Rpc { .. }
            | RouterError::Socket { .. }
            | RouterError::ConnectionClosed
            | RouterError::RequestFailed { .. } => false,
        }
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::Validation {
            message: format!("invalid JSON: {err}"),
            status: None,
            body: None,
        }
    }
}

impl From<reqwest::Error> for RouterError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        if err.is_timeout() {
            RouterError::Timeout { message: err.to_string(), status: None }
        } else if err.is_connect() || err.is_request() || err.is_body() {
            RouterError::Network { message: err.to_string(), status: None, source: Some(Box::new(err)) }
        } else if err.is_decode() {
            RouterError::Validation {
                message: format!("invalid response body: {err}"),
                status,
                body: None,
            }
        } else {
            RouterError::RequestFailed {
                message: err.to_string(),
                status,
                body: None,
                source: Some(Box::new(err)),
            }
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RouterError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RouterError::Socket { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        RouterError::Network { message: err.to_string(), status: None, source: Some(Box::new(err)) }
    }
}
