//! Request dispatcher: sends requests over a shared socket and waits for
//! the correlated reply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::envelope::{self, Envelope};
use crate::error::{Result, RouterError};
use crate::pending::{PendingGuard, PendingTable, StreamItem};
use crate::socket::MessageSink;

/// Issues correlated requests on one connection.
pub struct Dispatcher {
    sink: Arc<dyn MessageSink>,
    pending: Arc<PendingTable>,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Creates a dispatcher writing to `sink` and registering in `pending`.
    pub fn new(sink: Arc<dyn MessageSink>, pending: Arc<PendingTable>) -> Self {
        Self { sink, pending, next_id: AtomicU64::new(1) }
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    async fn send(&self, envelope: &Envelope, request_type: &str) -> Result<()> {
        let text = envelope::encode(envelope)?;
        self.sink.send(text).await.map_err(|e| {
            RouterError::network(format!("failed to send {request_type} request"), Some(Box::new(e)))
        })
    }

    /// Sends a request and waits up to `timeout` for its reply.
    ///
    /// The pending entry is removed on every exit path: reply, timeout,
    /// send failure, or the returned future being dropped.
    pub async fn dispatch(&self, request_type: &str, payload: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id();
        let rx = self.pending.register_single(&id)?;
        let _guard = PendingGuard::new(Arc::clone(&self.pending), id.clone());

        self.send(&Envelope::request(&id, request_type, payload), request_type).await?;
        debug!(id = %id, request_type, "Request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RouterError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&id);
                warn!(id = %id, request_type, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                Err(RouterError::timeout(format!(
                    "{request_type} request {id} timed out after {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Sends a streamed request. Chunks are buffered from the moment the
    /// request is registered, so none are lost before the first pull.
    pub async fn dispatch_stream(
        &self,
        request_type: &str,
        payload: Value,
        pull_timeout: Duration,
    ) -> Result<ResponseStream> {
        let id = self.next_id();
        let rx = self.pending.register_stream(&id)?;
        let guard = PendingGuard::new(Arc::clone(&self.pending), id.clone());

        self.send(&Envelope::stream_request(&id, request_type, payload), request_type).await?;
        debug!(id = %id, request_type, "Stream request sent");

        Ok(ResponseStream { guard, rx, pull_timeout, finished: false })
    }

    /// Number of requests awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

/// Consumer side of a streamed request.
///
/// Dropping it deregisters the request; chunks arriving afterwards are
/// discarded by the receive loop.
pub struct ResponseStream {
    guard: PendingGuard,
    rx: mpsc::UnboundedReceiver<StreamItem>,
    pull_timeout: Duration,
    finished: bool,
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("id", &self.guard.id())
            .field("finished", &self.finished)
            .finish()
    }
}

impl ResponseStream {
    /// Correlation id of the request.
    pub fn id(&self) -> &str {
        self.guard.id()
    }

    /// Whether the stream has ended or failed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self) {
        self.finished = true;
        self.rx.close();
        self.guard.release();
    }

    /// Next chunk, in arrival order.
    ///
    /// Returns `None` after the last chunk. An error is yielded once and
    /// ends the stream. Each pull waits at most the pull timeout.
    pub async fn recv(&mut self) -> Option<Result<Value>> {
        if self.finished {
            return None;
        }
        match tokio::time::timeout(self.pull_timeout, self.rx.recv()).await {
            Ok(Some(StreamItem::Chunk(value))) => Some(Ok(value)),
            Ok(Some(StreamItem::End)) => {
                self.finish();
                None
            }
            Ok(Some(StreamItem::Failed(err))) => {
                self.finish();
                Some(Err(err))
            }
            Ok(None) => {
                self.finish();
                Some(Err(RouterError::ConnectionClosed))
            }
            Err(_) => {
                self.finish();
                warn!(id = %self.guard.id(), "Stream stalled, giving up");
                Some(Err(RouterError::timeout(format!(
                    "no stream chunk for request {} within {}ms",
                    self.guard.id(),
                    self.pull_timeout.as_millis()
                ))))
            }
        }
    }

    /// Adapts this handle into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> + Send + 'static {
        futures::stream::unfold(self, |mut stream| async move {
            let item = stream.recv().await?;
            Some((item, stream))
        })
    }
}
