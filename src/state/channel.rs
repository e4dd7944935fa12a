//! Channel tasks.
//!
//! A channel is a named rendezvous owning its member list. Each channel
//! runs as an isolated task serving three kinds of requests over its inbox:
//! joins, parts, and broadcasts. It performs no I/O itself; deliveries go
//! to member sessions' event inboxes, and the channel task is the sole
//! producer for those deliveries, which totally orders them per member.
//!
//! A channel removes itself from the registry when its member list is empty
//! and no join is pending. The pending-joins counter exists because a
//! joining client fetches the channel handle under the registry lock but
//! posts the join after releasing it; without the counter, the last
//! member's part could destroy the channel out from under that join.

use crate::message::{Fields, MemberInfo};
use crate::session::SessionEvent;
use crate::state::registry::Registry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Tests whether a channel name marks its traffic as end-to-end encrypted:
/// prefix `E2E_` and exactly 68 bytes. Purely syntactic; it drives only
/// statistics and the unencrypted-channel warning.
pub fn is_e2e(name: &str) -> bool {
    name.starts_with("E2E_") && name.len() == 68
}

/// A member as seen by a channel: identity plus the owning session's
/// event inbox.
#[derive(Debug, Clone)]
pub struct Member {
    pub id: u64,
    pub connection_type: String,
    pub events: mpsc::Sender<SessionEvent>,
}

impl Member {
    pub fn info(&self) -> MemberInfo {
        MemberInfo {
            id: self.id,
            connection_type: self.connection_type.clone(),
        }
    }
}

/// Requests served by a channel task.
#[derive(Debug)]
pub enum ChannelRequest {
    Join {
        member: Member,
        /// Replies with the roster of pre-existing members.
        reply_tx: oneshot::Sender<Result<Vec<MemberInfo>, JoinError>>,
    },
    Part {
        id: u64,
        reason: String,
        reply_tx: oneshot::Sender<()>,
    },
    /// Deliver `fields` to every member except `origin`.
    Broadcast { origin: u64, fields: Fields },
}

/// A join the channel refused or could not serve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("already a member")]
    AlreadyMember,
    #[error("channel task unavailable")]
    Unavailable,
}

/// The channel task is gone; only reachable through stale handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("channel task unavailable")]
pub struct ChannelUnavailable;

/// Cloneable handle to a running channel task.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    name: Arc<str>,
    tx: mpsc::Sender<ChannelRequest>,
    pending_joins: Arc<AtomicUsize>,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Note an in-flight join. Must be called under the registry lock, so
    /// the increment is ordered before any part the channel task processes
    /// afterwards.
    pub(crate) fn add_pending_join(&self) {
        self.pending_joins.fetch_add(1, Ordering::SeqCst);
    }

    /// Add a member, returning the roster of pre-existing members.
    ///
    /// Callers must have noted a pending join first; the channel task
    /// releases it once the request is processed.
    pub(crate) async fn join(&self, member: Member) -> Result<Vec<MemberInfo>, JoinError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ChannelRequest::Join { member, reply_tx })
            .await
            .map_err(|_| JoinError::Unavailable)?;
        reply_rx.await.map_err(|_| JoinError::Unavailable)?
    }

    /// Remove a member, notifying the remaining members. Completion of this
    /// call means the part has been processed; it does not imply the member
    /// was present.
    pub async fn part(&self, id: u64, reason: &str) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(ChannelRequest::Part {
                id,
                reason: reason.to_string(),
                reply_tx,
            })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Relay `fields` to every member except `origin`.
    pub async fn broadcast(&self, origin: u64, fields: Fields) -> Result<(), ChannelUnavailable> {
        self.tx
            .send(ChannelRequest::Broadcast { origin, fields })
            .await
            .map_err(|_| ChannelUnavailable)
    }
}

pub(crate) struct ChannelActor {
    name: Arc<str>,
    members: Vec<Member>,
    pending_joins: Arc<AtomicUsize>,
    registry: Weak<Registry>,
}

impl ChannelActor {
    /// Create a new channel task and return a handle to it.
    pub(crate) fn spawn(name: &str, registry: Weak<Registry>) -> ChannelHandle {
        let (tx, rx) = mpsc::channel(64);
        let pending_joins = Arc::new(AtomicUsize::new(0));
        let name: Arc<str> = Arc::from(name);

        let actor = Self {
            name: Arc::clone(&name),
            members: Vec::new(),
            pending_joins: Arc::clone(&pending_joins),
            registry,
        };
        tokio::spawn(actor.run(rx));

        ChannelHandle {
            name,
            tx,
            pending_joins,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ChannelRequest>) {
        debug!(channel = %self.name, "Channel task started");
        while let Some(request) = rx.recv().await {
            match request {
                ChannelRequest::Join { member, reply_tx } => {
                    self.handle_join(member, reply_tx).await;
                    self.pending_joins.fetch_sub(1, Ordering::SeqCst);
                }
                ChannelRequest::Part {
                    id,
                    reason,
                    reply_tx,
                } => {
                    self.handle_part(id, reason).await;
                    let _ = reply_tx.send(());
                    if self.release(id) {
                        debug!(channel = %self.name, "Channel task exiting");
                        return;
                    }
                }
                ChannelRequest::Broadcast { origin, fields } => {
                    for member in &self.members {
                        if member.id != origin {
                            let _ = member
                                .events
                                .send(SessionEvent::Relay(fields.clone()))
                                .await;
                        }
                    }
                }
            }
        }
    }

    async fn handle_join(
        &mut self,
        member: Member,
        reply_tx: oneshot::Sender<Result<Vec<MemberInfo>, JoinError>>,
    ) {
        if self.members.iter().any(|m| m.id == member.id) {
            let _ = reply_tx.send(Err(JoinError::AlreadyMember));
            return;
        }

        // Roster first, so the joiner is excluded from it, then notify the
        // pre-existing members, then append.
        let roster: Vec<MemberInfo> = self.members.iter().map(Member::info).collect();
        let _ = reply_tx.send(Ok(roster));
        self.notify_members(SessionEvent::Joined(member.info())).await;
        self.members.push(member);
    }

    async fn handle_part(&mut self, id: u64, reason: String) {
        if let Some(pos) = self.members.iter().position(|m| m.id == id) {
            let member = self.members.remove(pos);
            self.notify_members(SessionEvent::Left {
                client: member.info(),
                reason,
            })
            .await;
        }
    }

    async fn notify_members(&self, event: SessionEvent) {
        for member in &self.members {
            let _ = member.events.send(event.clone()).await;
        }
    }

    /// Registry-side bookkeeping after a part. Returns true when the
    /// channel unregistered itself and the task should exit.
    fn release(&self, id: u64) -> bool {
        match self.registry.upgrade() {
            Some(registry) => {
                registry.release_member(&self.name, id, self.members.is_empty(), &self.pending_joins)
            }
            // Registry gone; nothing left to serve.
            None => true,
        }
    }
}
