//! A live socket connection: one receive loop plus its dispatcher.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::correlation::{Binding, CorrelationEngine, EventRegistry};
use crate::dispatch::{Dispatcher, ResponseStream};
use crate::error::Result;
use crate::socket::{Connector, MessageSink, Socket};

/// An open connection. Requests may be issued concurrently from any task.
pub struct Connection {
    engine: CorrelationEngine,
    dispatcher: Dispatcher,
    sink: Arc<dyn MessageSink>,
    endpoint: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Connects through `connector` and starts the receive loop.
    pub async fn open(connector: &dyn Connector, binding: Binding, events: Arc<EventRegistry>) -> Result<Self> {
        let socket = connector.connect().await?;
        info!(endpoint = %connector.endpoint(), ?binding, "Connection established");
        Ok(Self::from_socket(socket, binding, events, connector.endpoint()))
    }

    /// Wraps an already connected socket.
    pub fn from_socket(socket: Socket, binding: Binding, events: Arc<EventRegistry>, endpoint: &str) -> Self {
        let Socket { sink, source } = socket;
        let engine = CorrelationEngine::start(source, binding, events);
        let dispatcher = Dispatcher::new(Arc::clone(&sink), Arc::clone(engine.pending()));
        Self { engine, dispatcher, sink, endpoint: endpoint.to_string() }
    }

    /// Sends a request and waits for its reply.
    pub async fn request(&self, request_type: &str, payload: Value, timeout: Duration) -> Result<Value> {
        self.dispatcher.dispatch(request_type, payload, timeout).await
    }

    /// Sends a streamed request.
    pub async fn stream(&self, request_type: &str, payload: Value, pull_timeout: Duration) -> Result<ResponseStream> {
        self.dispatcher.dispatch_stream(request_type, payload, pull_timeout).await
    }

    /// The endpoint this connection was opened to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the connection can no longer carry requests.
    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    /// Requests awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Closes the connection. Outstanding requests fail with
    /// `ConnectionClosed`. Returns how many were failed.
    pub async fn close(&self) -> usize {
        let failed = self.engine.shutdown().await;
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "Socket close reported an error");
        }
        info!(endpoint = %self.endpoint, failed, "Connection closed");
        failed
    }
}
