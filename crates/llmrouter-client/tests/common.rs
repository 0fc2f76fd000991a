//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use llmrouter_client::{RateLimitConfig, RouterConfig};
use llmrouter_transport::{Envelope, MemoryConnector, MemoryPeer};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Config for a mock at `base_url` with fast retries and no throttling.
pub fn test_config(base_url: &str) -> RouterConfig {
    RouterConfig::new(base_url)
        .retry_delay(Duration::from_millis(10))
        .timeout(Duration::from_secs(5))
        .rate_limit(RateLimitConfig::disabled())
}

/// Request counters kept by the mock router.
#[derive(Default)]
pub struct Hits {
    pub inference: AtomicU32,
    pub missing_model: AtomicU32,
    pub overloaded: AtomicU32,
}

impl Hits {
    pub fn get(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Deserialize)]
struct ModelsQuery {
    include_unloaded: Option<bool>,
}

fn sse_body(frames: &[Value]) -> String {
    frames.iter().map(|f| format!("data: {f}\n\n")).collect()
}

/// HTTP side of the router: `/api/v1` endpoints with canned replies.
pub fn mock_router(hits: Arc<Hits>) -> Router {
    let inference_hits = Arc::clone(&hits);
    let missing_hits = Arc::clone(&hits);
    let overloaded_hits = hits;

    Router::new()
        .route("/api/v1/health", get(|| async { Json(json!({"status": "HEALTHY", "version": "1.0"})) }))
        .route("/api/v1/status", get(|| async { Json(json!({"uptime": 12, "models_loaded": 1})) }))
        .route(
            "/api/v1/metrics",
            get(|| async { Json(json!({"cpu_usage": 12.5, "active_connections": 3, "gpu": "ignored"})) }),
        )
        .route(
            "/api/v1/models",
            get(|Query(q): Query<ModelsQuery>| async move {
                let mut models = vec![json!({"id": "tiny", "loaded": true})];
                if q.include_unloaded.unwrap_or(false) {
                    models.push(json!({"id": "large", "loaded": false}));
                }
                Json(json!({"models": models}))
            }),
        )
        .route(
            "/api/v1/models/:id",
            get(move |Path(id): Path<String>| {
                let hits = Arc::clone(&missing_hits);
                async move {
                    if id == "tiny" || id == "org/tiny" {
                        return Json(json!({"id": id, "loaded": true, "format": "gguf"})).into_response();
                    }
                    hits.missing_model.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::NOT_FOUND, Json(json!({"error": format!("model {id} not found")}))).into_response()
                }
            }),
        )
        .route(
            "/api/v1/models/load",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"success": true, "model": {"id": body["id"].clone(), "loaded": true}}))
            }),
        )
        .route(
            "/api/v1/models/unload",
            post(|Json(body): Json<Value>| async move { Json(json!({"unloaded": body["model_id"], "force": body["force"]})) }),
        )
        .route(
            "/api/v1/inference",
            post(move |Json(body): Json<Value>| {
                let hits = Arc::clone(&inference_hits);
                async move {
                    hits.inference.fetch_add(1, Ordering::SeqCst);
                    Json(json!({
                        "text": if body["prompt"] == "ping" { "pong".to_string() } else { format!("echo: {}", body["prompt"]) },
                        "success": true,
                        "metadata": {"session_id": body["session_id"].clone()},
                    }))
                }
            }),
        )
        .route(
            "/api/v1/inference/batch",
            post(|Json(body): Json<Value>| async move {
                let count = body["requests"].as_array().map_or(0, Vec::len) as u32;
                Json(json!({
                    "responses": (0..count).map(|i| json!({"text": format!("r{i}"), "success": true})).collect::<Vec<_>>(),
                    "total_requests": count,
                    "successful_requests": count,
                    "failed_requests": 0,
                    "success": true,
                }))
            }),
        )
        .route(
            "/api/v1/inference/stream",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["options"]["stream"], true);
                sse_body(&[
                    json!({"token": "a", "is_complete": false}),
                    json!({"token": "b", "is_complete": false}),
                    json!({"token": "c", "is_complete": true}),
                ])
            }),
        )
        .route(
            "/api/v1/overloaded",
            get(move || {
                let hits = Arc::clone(&overloaded_hits);
                async move {
                    hits.overloaded.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::SERVICE_UNAVAILABLE, "try later")
                }
            }),
        )
}

/// Serves `app` on an ephemeral port and returns its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A base URL nothing listens on.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Scripted server side of one in-memory socket connection.
pub struct ScriptedPeer {
    peer: MemoryPeer,
}

impl ScriptedPeer {
    /// Waits for the client to connect.
    pub async fn accept(peers: &mut UnboundedReceiver<MemoryPeer>) -> Self {
        Self { peer: peers.recv().await.expect("client never connected") }
    }

    pub fn inner(&mut self) -> &mut MemoryPeer {
        &mut self.peer
    }

    /// Next request as `(id, request_type, data, streamed)`.
    pub async fn next_request(&mut self) -> (String, String, Value, bool) {
        match self.peer.next_envelope().await {
            Some(Envelope::Request { id, request_type, data }) => (id, request_type, data, false),
            Some(Envelope::StreamRequest { id, request_type, data }) => (id, request_type, data, true),
            other => panic!("expected a request, got {other:?}"),
        }
    }

    pub fn reply(&self, id: &str, data: Value) {
        self.peer.push_envelope(&Envelope::response(id, data));
    }

    pub fn chunk(&self, id: &str, data: Value, complete: bool) {
        self.peer.push_envelope(&Envelope::chunk(id, data, complete));
    }

    pub fn raw(&self, text: &str) {
        self.peer.push(text);
    }

    pub fn close(&mut self) {
        self.peer.close();
    }
}

/// In-memory connector plus the channel its server sides arrive on.
pub fn memory_connector() -> (Arc<MemoryConnector>, UnboundedReceiver<MemoryPeer>) {
    let (connector, peers) = MemoryConnector::new();
    (Arc::new(connector), peers)
}

/// Answers every request with `{"text": "echo:<request_type>"}` until the
/// client goes away. Returns how many requests were served.
pub fn echo_server(mut peers: UnboundedReceiver<MemoryPeer>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut served = 0;
        let Some(mut peer) = peers.recv().await else { return served };
        while let Some(envelope) = peer.next_envelope().await {
            if let Envelope::Request { id, request_type, .. } = envelope {
                peer.push_envelope(&Envelope::response(id, json!({"text": format!("echo:{request_type}"), "success": true})));
                served += 1;
            }
        }
        served
    })
}
