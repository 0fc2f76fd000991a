//! WebSocket socket built on tokio-tungstenite.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::{Result, RouterError};
use crate::socket::{Connector, MessageSink, MessageSource, Socket};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a WebSocket endpoint with optional extra handshake headers.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    headers: Vec<(String, String)>,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Creates a connector for `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), headers: Vec::new(), connect_timeout: Duration::from_secs(10) }
    }

    /// Adds a header sent with the upgrade request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the handshake timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Socket> {
        let mut request = self.url.as_str().into_client_request()?;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RouterError::configuration(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RouterError::configuration(format!("invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                RouterError::timeout(format!(
                    "websocket handshake with {} timed out after {}ms",
                    self.url,
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| RouterError::network(format!("failed to connect to {}", self.url), Some(Box::new(e))))?;

        info!(url = %self.url, "WebSocket connected");
        let (sink, source) = stream.split();
        Ok(Socket {
            sink: Arc::new(WsSink { inner: Mutex::new(sink) }),
            source: Box::new(WsSource { inner: source }),
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

struct WsSink {
    inner: Mutex<SplitSink<WsStream, Message>>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&self, message: String) -> Result<()> {
        let mut sink = self.inner.lock().await;
        sink.send(Message::Text(message)).await.map_err(RouterError::from)
    }

    async fn close(&self) -> Result<()> {
        let mut sink = self.inner.lock().await;
        sink.close().await.map_err(RouterError::from)
    }
}

struct WsSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl MessageSource for WsSource {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                // Invalid UTF-8 still goes to the decoder so it is logged and dropped there.
                Ok(Message::Binary(bytes)) => return Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket close frame received");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(RouterError::from(e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_builder() {
        let connector = WebSocketConnector::new("ws://localhost:3000")
            .header("Authorization", "Bearer k")
            .connect_timeout(Duration::from_secs(2));
        assert_eq!(connector.endpoint(), "ws://localhost:3000");
        assert_eq!(connector.headers, vec![("Authorization".to_string(), "Bearer k".to_string())]);
        assert_eq!(connector.connect_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_connect_refused_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WebSocketConnector::new(format!("ws://{addr}"));
        let err = connector.connect().await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error {err:?}");
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let connector = WebSocketConnector::new("not a url");
        assert!(connector.connect().await.is_err());
    }
}
