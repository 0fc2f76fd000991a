//! Abstract bidirectional message channel used by the correlation engine.
//!
//! A [`Socket`] is split into a shared [`MessageSink`] (many callers send)
//! and an owned [`MessageSource`] (only the receive loop reads). Concrete
//! sockets live in [`crate::ws`] and [`crate::tcp`]; this module also
//! provides an in-memory pair for embedding and tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::envelope::{self, Envelope};
use crate::error::{Result, RouterError};

/// Write half of a socket.
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    /// Send one text message.
    async fn send(&self, message: String) -> Result<()>;

    /// Close the write side. Further sends fail.
    async fn close(&self) -> Result<()>;
}

/// Read half of a socket.
#[async_trait]
pub trait MessageSource: Send + 'static {
    /// Next inbound message.
    ///
    /// `None` means the peer closed the connection cleanly. `Some(Err(_))`
    /// means the connection failed; the caller must stop reading.
    async fn recv(&mut self) -> Option<Result<String>>;
}

/// A connected socket, split into its two halves.
pub struct Socket {
    /// Write half, shared by every dispatcher.
    pub sink: Arc<dyn MessageSink>,
    /// Read half, owned by the receive loop.
    pub source: Box<dyn MessageSource>,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

/// Opens new sockets to a fixed endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a new connection.
    async fn connect(&self) -> Result<Socket>;

    /// Endpoint description used in logs.
    fn endpoint(&self) -> &str;
}

// ============================================================================
// In-memory socket
// ============================================================================

struct MemorySink {
    outbound: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RouterError::socket("socket closed", None));
        }
        self.outbound
            .send(message)
            .map_err(|_| RouterError::socket("peer went away", None))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemorySource {
    inbound: mpsc::UnboundedReceiver<Result<String>>,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<String>> {
        self.inbound.recv().await
    }
}

/// Server side of an in-memory socket.
///
/// Reads what the client sent and injects inbound messages, connection
/// failures or a clean close.
pub struct MemoryPeer {
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: Option<mpsc::UnboundedSender<Result<String>>>,
}

impl MemoryPeer {
    /// Inject a raw inbound message. Returns false once closed.
    pub fn push(&self, text: impl Into<String>) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(Ok(text.into())).is_ok(),
            None => false,
        }
    }

    /// Inject an inbound envelope.
    pub fn push_envelope(&self, envelope: &Envelope) -> bool {
        match envelope::encode(envelope) {
            Ok(text) => self.push(text),
            Err(_) => false,
        }
    }

    /// Fail the connection with a socket error.
    pub fn fail(&mut self, message: impl Into<String>) {
        if let Some(tx) = self.inbound.take() {
            let _ = tx.send(Err(RouterError::socket(message, None)));
        }
    }

    /// Close the connection cleanly.
    pub fn close(&mut self) {
        self.inbound = None;
    }

    /// Next raw message the client sent, or `None` once the client is gone.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Next envelope the client sent. Undecodable messages are skipped.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        while let Some(text) = self.outbound.recv().await {
            if let Ok(envelope) = envelope::decode(&text) {
                return Some(envelope);
            }
        }
        None
    }
}

/// Create a connected in-memory socket and its server-side peer.
pub fn memory_pair() -> (Socket, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let socket = Socket {
        sink: Arc::new(MemorySink { outbound: out_tx, closed: AtomicBool::new(false) }),
        source: Box::new(MemorySource { inbound: in_rx }),
    };
    let peer = MemoryPeer { outbound: out_rx, inbound: Some(in_tx) };
    (socket, peer)
}

/// Connector handing out in-memory sockets.
///
/// Each successful `connect` publishes the matching [`MemoryPeer`] on the
/// receiver returned by [`MemoryConnector::new`].
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Creates a connector and the receiver its peers are published on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { peers: tx }, rx)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Socket> {
        let (socket, peer) = memory_pair();
        self.peers
            .send(peer)
            .map_err(|_| RouterError::network("memory endpoint is gone", None))?;
        Ok(socket)
    }

    fn endpoint(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_pair_both_directions() {
        let (mut socket, mut peer) = memory_pair();

        socket.sink.send("hello".to_string()).await.unwrap();
        assert_eq!(peer.next_sent().await.as_deref(), Some("hello"));

        assert!(peer.push("world"));
        assert_eq!(socket.source.recv().await.unwrap().unwrap(), "world");
    }

    #[tokio::test]
    async fn test_memory_peer_close_ends_source() {
        let (mut socket, mut peer) = memory_pair();
        peer.close();
        assert!(socket.source.recv().await.is_none());
        assert!(!peer.push("late"));
    }

    #[tokio::test]
    async fn test_memory_peer_fail_yields_error() {
        let (mut socket, mut peer) = memory_pair();
        peer.fail("boom");
        assert!(matches!(socket.source.recv().await, Some(Err(RouterError::Socket { .. }))));
        assert!(socket.source.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_sink_rejects_send() {
        let (socket, _peer) = memory_pair();
        socket.sink.close().await.unwrap();
        assert!(socket.sink.send("x".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_next_envelope_skips_garbage() {
        let (socket, mut peer) = memory_pair();
        socket.sink.send("garbage".into()).await.unwrap();
        let env = Envelope::request("1", "health", json!({}));
        socket.sink.send(envelope::encode(&env).unwrap()).await.unwrap();
        assert_eq!(peer.next_envelope().await, Some(env));
    }

    #[tokio::test]
    async fn test_memory_connector_publishes_peer() {
        let (connector, mut peers) = MemoryConnector::new();
        let socket = connector.connect().await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        socket.sink.send("ping".into()).await.unwrap();
        assert_eq!(peer.next_sent().await.as_deref(), Some("ping"));
    }
}
