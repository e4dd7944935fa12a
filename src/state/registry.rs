//! Process-wide registry.
//!
//! Sole arbiter of channel creation and destruction, and home of the
//! statistics counters. One exclusive lock serialises every mutation; the
//! counters and the maps they describe can never drift apart. Snapshots
//! take the lock in shared mode.
//!
//! The registry never performs channel I/O while holding its lock: joins
//! fetch a handle and note the pending join under the lock, then post to
//! the channel task after releasing it.

use crate::message::MemberInfo;
use crate::session::SessionEvent;
use crate::state::channel::{is_e2e, ChannelActor, ChannelHandle, JoinError, Member};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Seconds since the server started.
    pub uptime: u64,
    pub num_channels: usize,
    pub num_e2e_channels: usize,
    pub max_channels: usize,
    pub max_channels_at: DateTime<Utc>,
    pub num_clients: usize,
    pub max_clients: usize,
    pub max_clients_at: DateTime<Utc>,
}

struct RegistryInner {
    /// Channels by name. A channel is present iff it has members or
    /// pending joins.
    channels: HashMap<String, ChannelHandle>,
    /// Channel members by session id, for capacity accounting.
    clients: HashMap<u64, MemberInfo>,
    /// Event inboxes of every accepted session, for the ping ticker and
    /// server-initiated kicks.
    sessions: HashMap<u64, mpsc::Sender<SessionEvent>>,
    num_e2e_channels: usize,
    max_channels: usize,
    max_channels_at: DateTime<Utc>,
    max_clients: usize,
    max_clients_at: DateTime<Utc>,
}

/// Process-wide index of channels and clients.
pub struct Registry {
    inner: RwLock<RegistryInner>,
    stats_password: String,
    started_at: Instant,
}

impl Registry {
    pub fn new(stats_password: String) -> Arc<Self> {
        let now = Utc::now();
        Arc::new(Self {
            inner: RwLock::new(RegistryInner {
                channels: HashMap::new(),
                clients: HashMap::new(),
                sessions: HashMap::new(),
                num_e2e_channels: 0,
                max_channels: 0,
                max_channels_at: now,
                max_clients: 0,
                max_clients_at: now,
            }),
            stats_password,
            started_at: Instant::now(),
        })
    }

    /// The configured stats password; empty disables the endpoint.
    pub fn stats_password(&self) -> &str {
        &self.stats_password
    }

    /// Register an accepted session's event inbox.
    pub fn insert_session(&self, id: u64, events: mpsc::Sender<SessionEvent>) {
        self.inner.write().sessions.insert(id, events);
    }

    /// Drop a session from the index once its supervisor has finished.
    pub fn remove_session(&self, id: u64) {
        self.inner.write().sessions.remove(&id);
    }

    /// Enqueue a ping sentinel on every session's event inbox.
    ///
    /// Sessions with a full inbox are skipped; they are not consuming
    /// events and their read deadline will reap them.
    pub fn ping_sessions(&self) {
        let senders: Vec<mpsc::Sender<SessionEvent>> =
            self.inner.read().sessions.values().cloned().collect();
        for sender in senders {
            let _ = sender.try_send(SessionEvent::Ping);
        }
    }

    /// Forcibly disconnect a session. Returns false when the id is unknown.
    pub async fn kick_client(&self, id: u64, reason: &str) -> bool {
        let sender = self.inner.read().sessions.get(&id).cloned();
        match sender {
            Some(sender) => sender
                .send(SessionEvent::Kick {
                    reason: reason.to_string(),
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Add `member` to the named channel, creating the channel if needed.
    ///
    /// Returns the channel handle and the roster of pre-existing members.
    pub async fn join_channel(
        self: &Arc<Self>,
        name: &str,
        member: Member,
    ) -> Result<(ChannelHandle, Vec<MemberInfo>), JoinError> {
        let handle = {
            let mut inner = self.inner.write();

            inner.clients.insert(member.id, member.info());
            if inner.clients.len() > inner.max_clients {
                inner.max_clients = inner.clients.len();
                inner.max_clients_at = Utc::now();
            }

            let handle = match inner.channels.get(name).cloned() {
                Some(handle) => handle,
                None => {
                    let handle = ChannelActor::spawn(name, Arc::downgrade(self));
                    inner.channels.insert(name.to_string(), handle.clone());
                    if is_e2e(name) {
                        inner.num_e2e_channels += 1;
                    }
                    if inner.channels.len() > inner.max_channels {
                        inner.max_channels = inner.channels.len();
                        inner.max_channels_at = Utc::now();
                    }
                    debug!(channel = name, "Channel created");
                    handle
                }
            };

            // Joining happens after the lock is released so slow channel
            // tasks cannot bog down the registry; the pending join keeps
            // the channel alive until then.
            handle.add_pending_join();
            handle
        };

        let roster = handle.join(member).await?;
        Ok((handle, roster))
    }

    /// Called by a channel task after processing a part. Removes the parted
    /// client from the accounting index and, when the channel has neither
    /// members nor pending joins, unregisters the channel. Returns true
    /// when the channel unregistered itself.
    pub(crate) fn release_member(
        &self,
        channel: &str,
        id: u64,
        no_members: bool,
        pending_joins: &AtomicUsize,
    ) -> bool {
        let mut inner = self.inner.write();
        inner.clients.remove(&id);

        if no_members && pending_joins.load(Ordering::SeqCst) == 0 {
            if inner.channels.remove(channel).is_some() {
                if is_e2e(channel) {
                    inner.num_e2e_channels -= 1;
                }
                debug!(channel, "Channel destroyed");
            }
            true
        } else {
            false
        }
    }

    /// Shared-lock snapshot of the current counters.
    pub fn stats(&self) -> Stats {
        let inner = self.inner.read();
        Stats {
            uptime: self.started_at.elapsed().as_secs(),
            num_channels: inner.channels.len(),
            num_e2e_channels: inner.num_e2e_channels,
            max_channels: inner.max_channels,
            max_channels_at: inner.max_channels_at,
            num_clients: inner.clients.len(),
            max_clients: inner.max_clients,
            max_clients_at: inner.max_clients_at,
        }
    }
}
