//! Test server management.
//!
//! Spawns in-process nvremoted gateways on ephemeral ports.

use nvremoted::config::{Config, ListenConfig, MotdConfig, RelayConfig, StatsConfig};
use nvremoted::network::Gateway;
use nvremoted::state::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A default configuration for tests: ephemeral port, no TLS, pings off
/// by default so tests control timing explicitly.
pub fn test_config() -> Config {
    Config {
        listen: ListenConfig {
            address: "127.0.0.1:0".parse().expect("loopback address"),
        },
        tls: None,
        relay: RelayConfig {
            time_between_pings: 0,
            pings_until_timeout: 0,
            warn_if_not_encrypted: false,
        },
        motd: MotdConfig::default(),
        stats: StatsConfig::default(),
    }
}

/// An in-process test server.
pub struct TestServer {
    addr: SocketAddr,
    registry: Arc<Registry>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Spawn a server with the given configuration.
    pub async fn spawn(config: Config) -> anyhow::Result<Self> {
        let gateway = Gateway::bind(&config).await?;
        let addr = gateway.local_addr()?;
        let registry = Arc::clone(gateway.registry());
        let task = tokio::spawn(async move {
            let _ = gateway.run().await;
        });
        Ok(Self {
            addr,
            registry,
            task,
        })
    }

    /// Spawn a server with the default test configuration.
    pub async fn spawn_default() -> anyhow::Result<Self> {
        Self::spawn(test_config()).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
