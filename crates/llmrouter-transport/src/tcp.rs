//! TCP socket carrying one JSON envelope per line (the RPC binding).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::error::{Result, RouterError};
use crate::socket::{Connector, MessageSink, MessageSource, Socket};

/// Longest accepted inbound line (16 MiB).
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// TCP connector configuration.
#[derive(Debug, Clone)]
pub struct TcpConnectorConfig {
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Whether to enable TCP_NODELAY (disable Nagle's algorithm).
    pub nodelay: bool,
}

impl Default for TcpConnectorConfig {
    fn default() -> Self {
        Self { connect_timeout_ms: 5000, nodelay: true }
    }
}

/// Opens newline-delimited JSON connections to `host:port`.
#[derive(Debug, Clone)]
pub struct TcpLineConnector {
    addr: String,
    config: TcpConnectorConfig,
}

impl TcpLineConnector {
    /// Creates a connector. A leading `scheme://` in `addr` is ignored.
    pub fn new(addr: impl Into<String>, config: TcpConnectorConfig) -> Self {
        let addr = addr.into();
        let addr = match addr.split_once("://") {
            Some((_, rest)) => rest.trim_end_matches('/').to_string(),
            None => addr,
        };
        Self { addr, config }
    }
}

#[async_trait]
impl Connector for TcpLineConnector {
    async fn connect(&self) -> Result<Socket> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                RouterError::timeout(format!(
                    "connection to {} timed out after {}ms",
                    self.addr, self.config.connect_timeout_ms
                ))
            })??;
        if self.config.nodelay {
            stream.set_nodelay(true)?;
        }
        debug!(addr = %self.addr, "RPC socket connected");

        let (read, write) = stream.into_split();
        Ok(Socket {
            sink: Arc::new(LineSink {
                inner: Mutex::new(FramedWrite::new(write, LinesCodec::new())),
            }),
            source: Box::new(LineSource {
                inner: FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            }),
        })
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}

fn codec_error(err: LinesCodecError) -> RouterError {
    match err {
        LinesCodecError::Io(e) => RouterError::from(e),
        LinesCodecError::MaxLineLengthExceeded => {
            RouterError::socket(format!("line exceeds {MAX_LINE_LENGTH} bytes"), None)
        }
    }
}

struct LineSink {
    inner: Mutex<FramedWrite<OwnedWriteHalf, LinesCodec>>,
}

#[async_trait]
impl MessageSink for LineSink {
    async fn send(&self, message: String) -> Result<()> {
        let mut sink = self.inner.lock().await;
        sink.send(message).await.map_err(codec_error)
    }

    async fn close(&self) -> Result<()> {
        let mut sink = self.inner.lock().await;
        SinkExt::<String>::close(&mut *sink).await.map_err(codec_error)
    }
}

struct LineSource {
    inner: FramedRead<OwnedReadHalf, LinesCodec>,
}

#[async_trait]
impl MessageSource for LineSource {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.inner.next().await? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(Ok(line)),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(max = MAX_LINE_LENGTH, "Discarding oversized RPC line");
                    continue;
                }
                Err(e) => return Some(Err(codec_error(e))),
            }
        }
    }
}
