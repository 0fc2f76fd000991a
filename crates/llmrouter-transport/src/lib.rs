#![warn(missing_docs)]

//! LLM Router transport subsystem: envelope correlation over WebSocket and
//! RPC sockets, plus the retrying, rate-limited HTTP path.
//!
//! Socket path: Dispatcher → Envelope → Socket → Correlation engine → Pending table → caller
//! HTTP path:   Rate limiter → Retry executor → reqwest → status mapping / SSE decoder

pub mod connection;
pub mod correlation;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod http;
pub mod pending;
pub mod ratelimit;
pub mod retry;
pub mod socket;
pub mod tcp;
pub mod ws;

pub use connection::Connection;
pub use correlation::{Binding, CorrelationEngine, EventHandler, EventRegistry};
pub use dispatch::{Dispatcher, ResponseStream};
pub use envelope::{Envelope, EnvelopeKind};
pub use error::{ErrorKind, Result, RouterError};
pub use http::{HttpTransport, HttpTransportConfig, SseEvent, SseLineDecoder, ValueStream};
pub use pending::{Delivery, PendingGuard, PendingTable, StreamItem};
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use retry::{RetryConfig, RetryExecutor};
pub use socket::{memory_pair, Connector, MemoryConnector, MemoryPeer, MessageSink, MessageSource, Socket};
pub use tcp::{TcpConnectorConfig, TcpLineConnector};
pub use ws::WebSocketConnector;
