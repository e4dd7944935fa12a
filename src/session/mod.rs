//! Per-connection sessions.
//!
//! Each accepted connection is serviced by two cooperating tasks plus a
//! supervisor:
//!
//! - the **reader** decodes JSON objects off the stream under a read
//!   deadline and forwards them to the handler, gated so the handler can
//!   stop the session in response to a message before another is read;
//! - the **handler** serves both the reader's inbox and the session's
//!   event inbox (broadcasts, pings, kicks), owns the write half, and
//!   serialises all outbound traffic;
//! - the **supervisor** ([`serve`]) awaits both, then parts the session
//!   from its channel, drains the event inbox, and lets the stream close.
//!
//! Channel ownership is load-bearing: the reader is the sole owner of the
//! recv sender, so the handler observes reader exit as inbox closure, and
//! the handler owns the writer, so nothing can interleave outbound frames.

mod handler;
mod reader;

use crate::config::Config;
use crate::dispatch::Context;
use crate::message::{Fields, MemberInfo};
use crate::state::Registry;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Events generated outside the session's own read loop and delivered
/// through its event inbox.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Another client joined the session's channel.
    Joined(MemberInfo),
    /// A member left the session's channel.
    Left { client: MemberInfo, reason: String },
    /// A channel message relayed from another member.
    Relay(Fields),
    /// Keep-alive sentinel from the ticker.
    Ping,
    /// Server-initiated disconnect.
    Kick { reason: String },
}

#[derive(Debug, Default)]
struct StopState {
    stopped: bool,
    reason: String,
}

/// Shared per-connection state: identity and the terminal stop flag.
#[derive(Debug)]
pub struct Session {
    id: u64,
    stop: Mutex<StopState>,
}

impl Session {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            stop: Mutex::new(StopState::default()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mark the session stopped. Idempotent; the first reason wins.
    pub fn stop(&self, reason: &str) {
        let mut stop = self.stop.lock();
        if !stop.stopped {
            stop.stopped = true;
            stop.reason = reason.to_string();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.lock().stopped
    }

    pub fn stop_reason(&self) -> String {
        self.stop.lock().reason.clone()
    }
}

/// Per-session view of the server configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub read_deadline: Duration,
    pub enforce_timeout: bool,
    pub motd: String,
    pub warn_if_not_encrypted: bool,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            read_deadline: config.relay.read_deadline(),
            enforce_timeout: config.relay.timeout_enforced(),
            motd: config.motd.load_text(),
            warn_if_not_encrypted: config.relay.warn_if_not_encrypted,
        }
    }
}

/// Serve one connection to completion.
pub async fn serve<S>(
    stream: S,
    id: u64,
    addr: SocketAddr,
    registry: Arc<Registry>,
    settings: Arc<SessionSettings>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let session = Session::new(id);
    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(64);
    let (recv_tx, recv_rx) = mpsc::channel(1);
    let (read_next_tx, read_next_rx) = mpsc::channel(1);

    registry.insert_session(id, events_tx.clone());
    info!(id, remote = %addr, "Client connected");

    let (read_half, write_half) = tokio::io::split(stream);

    let reader = tokio::spawn(reader::run(
        read_half,
        Arc::clone(&session),
        Arc::clone(&settings),
        recv_tx,
        read_next_rx,
    ));

    let ctx = Context::new(
        Arc::clone(&session),
        Arc::clone(&registry),
        Arc::clone(&settings),
        events_tx,
        write_half,
    );
    let handler = tokio::spawn(handler::run(ctx, recv_rx, events_rx, read_next_tx));

    // The handler finishes first when the stop came from an event (kick,
    // send failure); a reader still parked on the socket is cancelled
    // rather than waited out to its deadline.
    match handler.await {
        Ok((current_channel, mut events_rx)) => {
            // The channel and the ticker may still be posting events. Close
            // the inbox first so their sends fail fast instead of blocking
            // on a queue nobody reads, then part and discard the backlog.
            events_rx.close();
            if let Some(channel) = current_channel {
                channel.part(id, &session.stop_reason()).await;
            }
            while events_rx.try_recv().is_ok() {}
        }
        Err(e) => {
            error!(id, error = %e, "Session handler task failed");
        }
    }

    reader.abort();
    let _ = reader.await;

    registry.remove_session(id);
    info!(id, remote = %addr, reason = %session.stop_reason(), "Client disconnected");
}
