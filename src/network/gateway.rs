//! Gateway - TCP listener that accepts incoming connections.
//!
//! The Gateway binds to a socket (optionally wrapped in TLS), spawns a
//! session task per incoming client, and runs the singleton ping ticker.

use crate::config::{Config, RelayConfig};
use crate::network::tls;
use crate::session::{self, SessionSettings};
use crate::state::Registry;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

/// The Gateway accepts incoming connections and spawns sessions.
pub struct Gateway {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    registry: Arc<Registry>,
    settings: Arc<SessionSettings>,
    relay: RelayConfig,
    next_id: AtomicU64,
}

impl Gateway {
    /// Bind the gateway and prepare TLS. TLS credential failures are fatal.
    pub async fn bind(config: &Config) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.listen.address).await?;
        let tls = match &config.tls {
            Some(tls) => Some(tls::load_acceptor(&tls.cert_path, &tls.key_path).await?),
            None => None,
        };
        let registry = Registry::new(config.stats.password.clone());
        let settings = Arc::new(SessionSettings::from_config(config));

        info!(
            address = %listener.local_addr()?,
            tls_enabled = tls.is_some(),
            "Listening for incoming connections"
        );

        Ok(Self {
            listener,
            tls,
            registry,
            settings,
            relay: config.relay.clone(),
            next_id: AtomicU64::new(0),
        })
    }

    /// The bound address; useful when binding to port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run the gateway, accepting connections forever.
    pub async fn run(self) -> anyhow::Result<()> {
        if let Some(interval) = self.relay.ping_interval() {
            spawn_ping_ticker(Arc::clone(&self.registry), interval);
        }

        info!(
            time_between_pings = self.relay.time_between_pings,
            pings_until_timeout = self.relay.pings_until_timeout,
            "Server started"
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = set_keepalive(&stream, self.relay.keepalive_period()) {
                        warn!(remote = %addr, error = %e, "Failed to enable TCP keepalive");
                    }

                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let registry = Arc::clone(&self.registry);
                    let settings = Arc::clone(&self.settings);
                    let tls = self.tls.clone();

                    tokio::spawn(async move {
                        match tls {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(stream) => {
                                    session::serve(stream, id, addr, registry, settings).await;
                                }
                                Err(e) => {
                                    warn!(remote = %addr, error = %e, "TLS handshake failed");
                                }
                            },
                            None => session::serve(stream, id, addr, registry, settings).await,
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Periodically enqueue a ping sentinel on every session's event inbox.
fn spawn_ping_ticker(registry: Arc<Registry>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; skip it so the first ping
        // goes out one full interval after startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            registry.ping_sessions();
        }
    });
}

fn set_keepalive(stream: &TcpStream, period: Duration) -> std::io::Result<()> {
    use socket2::{SockRef, TcpKeepalive};

    let sock = SockRef::from(stream);
    let keepalive = TcpKeepalive::new().with_time(period).with_interval(period);
    sock.set_tcp_keepalive(&keepalive)
}
