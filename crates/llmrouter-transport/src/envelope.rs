//! Wire envelope for the socket bindings.
//!
//! Every socket message is one JSON object discriminated by its `type` field:
//!
//! ```text
//! {"type": "request",        "id": "7", "request_type": "inference", "data": {...}}
//! {"type": "stream_request", "id": "8", "request_type": "inference", "data": {...}}
//! {"type": "response",       "id": "7", "data": {...}, "error": "..."}
//! {"type": "stream",         "id": "8", "data": {...}, "complete": false}
//! {"type": "event",          "event": "model_loaded", "data": {...}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RouterError};

/// Logical kind of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Outbound request, single-shot or streamed.
    Request,
    /// Single reply to a request.
    Response,
    /// One piece of a streamed reply.
    StreamChunk,
    /// Unsolicited server notification.
    Event,
}

/// A single message on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Request expecting exactly one `response`.
    Request {
        id: String,
        request_type: String,
        #[serde(default)]
        data: Value,
    },
    /// Request expecting a sequence of `stream` chunks.
    StreamRequest {
        id: String,
        request_type: String,
        #[serde(default)]
        data: Value,
    },
    /// Reply to a `request`.
    Response {
        id: String,
        #[serde(default)]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// One chunk of a streamed reply.
    #[serde(rename = "stream")]
    StreamChunk {
        #[serde(alias = "stream_id")]
        id: String,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        complete: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Named notification routed to a registered handler.
    Event {
        event: String,
        #[serde(default)]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl Envelope {
    /// Build a single-shot request envelope.
    pub fn request(id: impl Into<String>, request_type: impl Into<String>, data: Value) -> Self {
        Envelope::Request { id: id.into(), request_type: request_type.into(), data }
    }

    /// Build a streamed request envelope.
    pub fn stream_request(
        id: impl Into<String>,
        request_type: impl Into<String>,
        data: Value,
    ) -> Self {
        Envelope::StreamRequest { id: id.into(), request_type: request_type.into(), data }
    }

    /// Build a successful response envelope.
    pub fn response(id: impl Into<String>, data: Value) -> Self {
        Envelope::Response { id: id.into(), data, error: None }
    }

    /// Build a stream chunk envelope.
    pub fn chunk(id: impl Into<String>, data: Value, complete: bool) -> Self {
        Envelope::StreamChunk { id: id.into(), data, complete, error: None }
    }

    /// Build an event envelope.
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Envelope::Event { event: event.into(), data, id: None }
    }

    /// Returns the logical kind.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Request { .. } | Envelope::StreamRequest { .. } => EnvelopeKind::Request,
            Envelope::Response { .. } => EnvelopeKind::Response,
            Envelope::StreamChunk { .. } => EnvelopeKind::StreamChunk,
            Envelope::Event { .. } => EnvelopeKind::Event,
        }
    }

    /// Correlation id, if the envelope carries one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Envelope::Request { id, .. }
            | Envelope::StreamRequest { id, .. }
            | Envelope::Response { id, .. }
            | Envelope::StreamChunk { id, .. } => Some(id),
            Envelope::Event { id, .. } => id.as_deref(),
        }
    }
}

/// Serialize an envelope to its wire text.
pub fn encode(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(RouterError::from)
}

/// Parse wire text into an envelope.
pub fn decode(text: &str) -> Result<Envelope> {
    serde_json::from_str(text).map_err(RouterError::from)
}
