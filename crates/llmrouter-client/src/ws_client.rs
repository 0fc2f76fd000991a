//! WebSocket binding, with rooms and server-pushed events.

use std::future::Future;
use std::sync::Arc;

use llmrouter_transport::{Binding, Connector, Result, WebSocketConnector};
use serde_json::{json, Value};

use crate::config::RouterConfig;
use crate::socket_client::{delegate_inference_api, SocketClient};

/// Client for the router's WebSocket endpoint.
#[derive(Debug)]
pub struct WebSocketClient {
    inner: SocketClient,
}

impl WebSocketClient {
    /// Client for the configured (or derived) WebSocket URL. Connects on
    /// first use.
    pub fn new(config: &RouterConfig) -> Result<Self> {
        config.validate()?;
        let connector = config
            .auth_headers()
            .into_iter()
            .fold(WebSocketConnector::new(config.websocket_url_or_default()), |c, (name, value)| {
                c.header(name, value)
            })
            .connect_timeout(config.connect_timeout());
        Ok(Self::with_connector(config, Arc::new(connector)))
    }

    /// Client over an arbitrary connector.
    pub fn with_connector(config: &RouterConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: SocketClient::new(connector, Binding::WebSocket, config.request_timeout(), config.pull_timeout()),
        }
    }

    /// The shared socket client.
    pub fn socket(&self) -> &SocketClient {
        &self.inner
    }

    /// Opens the connection now instead of on first use.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await.map(|_| ())
    }

    /// Whether a live connection is held.
    pub async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    /// Subscribes to broadcasts in `room`.
    pub async fn join_room(&self, room: &str) -> Result<Value> {
        self.inner.request("join_room", json!({"room": room})).await
    }

    /// Leaves `room`.
    pub async fn leave_room(&self, room: &str) -> Result<Value> {
        self.inner.request("leave_room", json!({"room": room})).await
    }

    /// Broadcasts `message` to everyone in `room`.
    pub async fn send_to_room(&self, room: &str, message: Value) -> Result<Value> {
        self.inner.request("send_to_room", json!({"room": room, "message": message})).await
    }

    /// Runs `handler` with the `data` of every `event` pushed by the server.
    /// Replaces any earlier handler for the same event.
    pub fn on_event<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.events().register(event, handler);
    }

    /// Removes the handler for `event`.
    pub fn off_event(&self, event: &str) -> bool {
        self.inner.events().unregister(event)
    }
}

delegate_inference_api!(WebSocketClient);
