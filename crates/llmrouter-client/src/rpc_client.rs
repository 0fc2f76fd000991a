//! RPC binding: envelopes as newline-delimited JSON over TCP.

use std::sync::Arc;

use llmrouter_transport::{Binding, Connector, Result, RouterError, TcpConnectorConfig, TcpLineConnector};

use crate::config::RouterConfig;
use crate::socket_client::{delegate_inference_api, SocketClient};

/// Client for the router's RPC endpoint.
#[derive(Debug)]
pub struct RpcClient {
    inner: SocketClient,
}

impl RpcClient {
    /// Client for `config.rpc_url`. Connects on first use.
    pub fn new(config: &RouterConfig) -> Result<Self> {
        config.validate()?;
        let addr = config
            .rpc_url
            .clone()
            .ok_or_else(|| RouterError::configuration("RPC URL not configured"))?;
        let tcp = TcpConnectorConfig {
            connect_timeout_ms: config.connect_timeout().as_millis() as u64,
            ..TcpConnectorConfig::default()
        };
        Ok(Self::with_connector(config, Arc::new(TcpLineConnector::new(addr, tcp))))
    }

    /// Client over an arbitrary connector.
    pub fn with_connector(config: &RouterConfig, connector: Arc<dyn Connector>) -> Self {
        Self { inner: SocketClient::new(connector, Binding::Rpc, config.request_timeout(), config.pull_timeout()) }
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
}

delegate_inference_api!(RpcClient);
