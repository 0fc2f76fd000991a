//! Correlation engine: the single receive loop of a socket connection.
//!
//! The loop decodes every inbound message and routes it into the
//! [`PendingTable`] or to a registered event handler. It is the only task
//! that resolves completion handles. When the socket closes, or the engine
//! is shut down, every outstanding request fails with
//! [`RouterError::ConnectionClosed`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::envelope::{self, Envelope};
use crate::error::RouterError;
use crate::pending::{Delivery, PendingTable};
use crate::socket::MessageSource;

/// Async callback invoked with an event's `data` payload.
pub type EventHandler = Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Registration map from event name to handler.
#[derive(Default)]
pub struct EventRegistry {
    handlers: RwLock<HashMap<String, EventHandler>>,
}

impl EventRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event`, replacing any previous one.
    pub fn register<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let event = event.into();
        let handler: EventHandler = Arc::new(move |data| Box::pin(handler(data)));
        debug!(event = %event, "Registered event handler");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event, handler);
    }

    /// Removes the handler for `event`. Returns whether one existed.
    pub fn unregister(&self, event: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(event)
            .is_some()
    }

    /// Looks up the handler for `event`.
    pub fn get(&self, event: &str) -> Option<EventHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
    }
}

/// Which socket binding the engine serves. Decides how error fields in
/// reply envelopes surface to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Persistent WebSocket connection.
    WebSocket,
    /// Line-delimited RPC connection.
    Rpc,
}

impl Binding {
    fn remote_error(self, message: String) -> RouterError {
        match self {
            Binding::WebSocket => RouterError::Socket { message, source: None },
            Binding::Rpc => RouterError::Rpc { message, code: None },
        }
    }
}

/// What the engine did with one inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// A single-shot request was resolved.
    Resolved,
    /// A chunk was queued on a live stream.
    Chunk,
    /// A stream received its last chunk or a terminating reply.
    StreamEnded,
    /// A stream was terminated with an error.
    StreamFailed,
    /// An event handler was started.
    EventDispatched,
    /// No handler was registered for the event.
    EventUnhandled,
    /// No request is waiting on the id.
    UnknownId,
    /// The id belongs to a handle of the other type.
    Mismatched,
    /// The envelope is not something a client receives.
    Ignored,
}

fn payload(data: Value) -> Value {
    if data.is_null() {
        Value::Object(Map::new())
    } else {
        data
    }
}

/// Route one decoded envelope.
pub fn route(envelope: Envelope, pending: &PendingTable, events: &EventRegistry, binding: Binding) -> Routed {
    match envelope {
        Envelope::Response { id, data, error } => {
            let result = match error {
                Some(message) => Err(binding.remote_error(message)),
                None => Ok(payload(data)),
            };
            match pending.resolve(&id, result) {
                Delivery::Unknown => {
                    warn!(id = %id, "Dropping response for unknown request id");
                    Routed::UnknownId
                }
                _ => Routed::Resolved,
            }
        }
        Envelope::StreamChunk { id, data, complete, error } => {
            let failed = error.is_some();
            let delivery = match error {
                Some(message) => pending.fail_stream(&id, RouterError::streaming(message, None)),
                None => pending.push_chunk(&id, payload(data), complete),
            };
            match delivery {
                Delivery::Delivered => Routed::Chunk,
                Delivery::Completed if failed => Routed::StreamFailed,
                Delivery::Completed => Routed::StreamEnded,
                Delivery::Unknown => {
                    warn!(id = %id, "Dropping stream chunk for unknown request id");
                    Routed::UnknownId
                }
                Delivery::Mismatched => {
                    warn!(id = %id, "Dropping stream chunk addressed to a single-shot request");
                    Routed::Mismatched
                }
            }
        }
        Envelope::Event { event, data, .. } => match events.get(&event) {
            Some(handler) => {
                debug!(event = %event, "Dispatching event");
                let data = payload(data);
                let run = tokio::spawn(async move { handler(data).await });
                tokio::spawn(async move {
                    if let Err(e) = run.await {
                        error!(event = %event, error = %e, "Event handler failed");
                    }
                });
                Routed::EventDispatched
            }
            None => {
                warn!(event = %event, "No handler registered for event");
                Routed::EventUnhandled
            }
        },
        Envelope::Request { id, request_type, .. } | Envelope::StreamRequest { id, request_type, .. } => {
            warn!(id = %id, request_type = %request_type, "Ignoring request envelope sent by server");
            Routed::Ignored
        }
    }
}

async fn receive_loop(
    mut source: Box<dyn MessageSource>,
    pending: Arc<PendingTable>,
    events: Arc<EventRegistry>,
    binding: Binding,
) {
    loop {
        match source.recv().await {
            Some(Ok(text)) => match envelope::decode(&text) {
                Ok(envelope) => {
                    let routed = route(envelope, &pending, &events, binding);
                    debug!(?routed, "Routed inbound envelope");
                }
                Err(e) => {
                    warn!(error = %e, bytes = text.len(), "Discarding undecodable message");
                }
            },
            Some(Err(e)) => {
                warn!(error = %e, "Socket failed, stopping receive loop");
                break;
            }
            None => {
                info!("Socket closed by peer");
                break;
            }
        }
    }

    let failed = pending.close_all(|| RouterError::ConnectionClosed);
    if failed > 0 {
        warn!(failed, "Failed outstanding requests after connection loss");
    }
}

/// Owns the receive loop of one connection.
pub struct CorrelationEngine {
    pending: Arc<PendingTable>,
    events: Arc<EventRegistry>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CorrelationEngine {
    /// Starts the receive loop over `source`. Must be called inside a tokio runtime.
    pub fn start(source: Box<dyn MessageSource>, binding: Binding, events: Arc<EventRegistry>) -> Self {
        let pending = Arc::new(PendingTable::new());
        let task = tokio::spawn(receive_loop(source, Arc::clone(&pending), Arc::clone(&events), binding));
        Self { pending, events, task: Mutex::new(Some(task)) }
    }

    /// The table this engine resolves into.
    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.pending
    }

    /// The event handlers this engine dispatches to.
    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    /// Whether the connection is closed (socket gone or engine shut down).
    pub fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }

    /// Stops the receive loop and fails every outstanding request.
    /// Returns how many requests were failed here.
    pub async fn shutdown(&self) -> usize {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.pending.close_all(|| RouterError::ConnectionClosed)
    }
}

impl Drop for CorrelationEngine {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
        self.pending.close_all(|| RouterError::ConnectionClosed);
    }
}
