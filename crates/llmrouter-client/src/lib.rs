#![warn(missing_docs)]

//! LLM Router client.
//!
//! Three bindings expose the same [`InferenceApi`]:
//!
//! - [`HttpClient`]: REST calls with retry, rate limiting and SSE streaming
//! - [`WebSocketClient`]: a persistent socket with rooms and pushed events
//! - [`RpcClient`]: newline-delimited JSON envelopes over TCP
//!
//! [`Client`] owns all three, routes calls to the selected [`Protocol`] and
//! carries the session id.

pub mod api;
pub mod client;
pub mod config;
pub mod http_client;
pub mod logging;
pub mod models;
pub mod rpc_client;
pub mod socket_client;
pub mod ws_client;

pub use api::{InferenceApi, TokenStream};
pub use client::{Client, Protocol};
pub use config::{RouterConfig, StreamConfig};
pub use http_client::HttpClient;
pub use logging::LogFormat;
pub use models::{
    fold_chat_prompt, BatchInferenceRequest, BatchInferenceResponse, ChatMessage, HealthStatus, InferenceMetrics,
    InferenceOptions, InferenceRequest, InferenceResponse, LoadModelRequest, LoadModelResponse, ModelInfo,
    ModelMetrics, Role, StreamingResponse, SystemMetrics, Timestamp, UnloadModelRequest,
};
pub use rpc_client::RpcClient;
pub use socket_client::SocketClient;
pub use ws_client::WebSocketClient;

pub use llmrouter_transport::{ErrorKind, RateLimitConfig, Result, RetryConfig, RouterError};
