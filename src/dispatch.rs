//! Message dispatcher.
//!
//! Routes each inbound verb to its handler and translates channel events
//! into outbound wire messages. Anything with an unrecognised verb is
//! relayed to the sender's current channel with an injected `origin`; a
//! handful of control verbs (`join`, `protocol_version`, `stat`, `pong`)
//! is handled here instead.

use crate::error::{HandlerError, HandlerResult};
use crate::message::{ClientMessage, Fields, Outbound, Reply, PROTOCOL_VERSION};
use crate::session::{Session, SessionEvent, SessionSettings};
use crate::state::{is_e2e, ChannelHandle, Member, Registry};
use crate::wire::JsonCodec;
use futures_util::SinkExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

/// Warning sent after joining a channel whose name does not mark it as
/// end-to-end encrypted.
const UNENCRYPTED_WARNING: &str = "Your traffic will pass through this server unencrypted. \
     Please consider upgrading to a version of NVDA Remote that supports end to end encryption.";

/// Penalty applied before rejecting a wrong stats password.
const WRONG_PASSWORD_DELAY: Duration = Duration::from_secs(5);

/// Handler context: everything a verb handler may touch.
///
/// Owns the write half; all outbound traffic for the session funnels
/// through [`Context::send`].
pub struct Context<W> {
    pub session: Arc<Session>,
    pub registry: Arc<Registry>,
    pub settings: Arc<SessionSettings>,
    /// Handle to this session's own event inbox, handed to channels on join.
    pub events_tx: mpsc::Sender<SessionEvent>,
    current_channel: Option<ChannelHandle>,
    writer: FramedWrite<W, JsonCodec>,
    write_failed: bool,
}

impl<W: AsyncWrite + Unpin> Context<W> {
    pub fn new(
        session: Arc<Session>,
        registry: Arc<Registry>,
        settings: Arc<SessionSettings>,
        events_tx: mpsc::Sender<SessionEvent>,
        write_half: W,
    ) -> Self {
        Self {
            session,
            registry,
            settings,
            events_tx,
            current_channel: None,
            writer: FramedWrite::new(write_half, JsonCodec),
            write_failed: false,
        }
    }

    /// Serialise a message onto the wire. An encode failure stops the
    /// session and suppresses every later write.
    pub async fn send(&mut self, msg: impl Into<Outbound>) {
        if self.write_failed {
            return;
        }
        if let Err(e) = self.writer.send(msg.into()).await {
            warn!(id = self.session.id(), error = %e, "Error writing to client");
            self.write_failed = true;
            self.session.stop("Send error");
        }
    }

    pub fn current_channel(&self) -> Option<&ChannelHandle> {
        self.current_channel.as_ref()
    }

    pub(crate) fn into_current_channel(self) -> Option<ChannelHandle> {
        self.current_channel
    }
}

/// Dispatch one message read from the client.
pub async fn handle_message<W: AsyncWrite + Unpin>(ctx: &mut Context<W>, msg: ClientMessage) {
    let result = match msg {
        ClientMessage::ProtocolVersion { version } => protocol_version(version),
        ClientMessage::Join {
            channel,
            connection_type,
        } => join(ctx, channel, connection_type).await,
        ClientMessage::Stat { password } => stat(ctx, password).await,
        // A pong's effect is the read-deadline refresh inherent in
        // receiving any message.
        ClientMessage::Pong => Ok(()),
        ClientMessage::Relay(fields) => relay(ctx, fields).await,
    };

    if let Err(e) = result {
        debug!(id = ctx.session.id(), code = e.error_code(), "Rejected client message");
        ctx.send(e.reply()).await;
        if let Some(reason) = e.stop_reason() {
            ctx.session.stop(reason);
        }
    }
}

/// Translate a session event into its outbound wire message.
pub async fn handle_event<W: AsyncWrite + Unpin>(ctx: &mut Context<W>, event: SessionEvent) {
    match event {
        SessionEvent::Joined(client) => ctx.send(Reply::ClientJoined { client }).await,
        SessionEvent::Left { client, reason } => {
            let reason = (!reason.is_empty()).then_some(reason);
            ctx.send(Reply::ClientLeft { client, reason }).await;
        }
        SessionEvent::Relay(fields) => ctx.send(Outbound::Relay(fields)).await,
        SessionEvent::Ping => ctx.send(Outbound::Ping).await,
        SessionEvent::Kick { reason } => {
            ctx.send(Reply::Kick).await;
            ctx.session.stop(&reason);
        }
    }
}

fn protocol_version(version: i64) -> HandlerResult {
    // Accepted silently; clients that never send a version are tolerated,
    // clients that send the wrong one are not.
    if version == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(HandlerError::VersionMismatch)
    }
}

async fn join<W: AsyncWrite + Unpin>(
    ctx: &mut Context<W>,
    channel: String,
    connection_type: String,
) -> HandlerResult {
    if channel.is_empty() {
        return Err(HandlerError::NoChannel);
    }
    if connection_type.is_empty() {
        return Err(HandlerError::NoConnectionType);
    }

    if let Some(current) = &ctx.current_channel {
        if current.name() == channel {
            return Err(HandlerError::AlreadyInChannel);
        }
    }
    // Switching channels parts the old one silently; its remaining members
    // see the reason, the switcher only sees the new channel_joined.
    if let Some(previous) = ctx.current_channel.take() {
        previous
            .part(ctx.session.id(), "Client switched channels")
            .await;
    }

    let member = Member {
        id: ctx.session.id(),
        connection_type,
        events: ctx.events_tx.clone(),
    };
    let (handle, clients) = ctx
        .registry
        .join_channel(&channel, member)
        .await
        .map_err(|e| match e {
            crate::state::JoinError::AlreadyMember => HandlerError::AlreadyInChannel,
            crate::state::JoinError::Unavailable => {
                HandlerError::Internal("channel task unavailable".to_string())
            }
        })?;

    ctx.send(Reply::ChannelJoined {
        channel: channel.clone(),
        origin: ctx.session.id(),
        clients,
    })
    .await;
    ctx.current_channel = Some(handle);

    if ctx.settings.warn_if_not_encrypted && !is_e2e(&channel) {
        ctx.send(Reply::Motd {
            motd: UNENCRYPTED_WARNING.to_string(),
            force_display: true,
        })
        .await;
    }

    Ok(())
}

async fn stat<W: AsyncWrite + Unpin>(ctx: &mut Context<W>, password: String) -> HandlerResult {
    if ctx.current_channel.is_some() {
        return Err(HandlerError::StatsWhileInChannel);
    }
    if password.is_empty() {
        return Err(HandlerError::NoStatsPassword);
    }

    let expected = ctx.registry.stats_password();
    let matches = !expected.is_empty()
        && bool::from(password.as_bytes().ct_eq(expected.as_bytes()));
    if !matches {
        // Flat penalty against brute forcing; the reader is gated on
        // read-next for the duration, so no further messages land.
        tokio::time::sleep(WRONG_PASSWORD_DELAY).await;
        return Err(HandlerError::WrongStatsPassword);
    }

    let stats = ctx.registry.stats();
    ctx.send(Reply::Stats { stats }).await;
    ctx.session.stop("stats request completed");
    Ok(())
}

async fn relay<W: AsyncWrite + Unpin>(ctx: &mut Context<W>, mut fields: Fields) -> HandlerResult {
    let Some(channel) = &ctx.current_channel else {
        return Err(HandlerError::UnknownTypeOutsideChannel);
    };

    fields.insert("origin".to_string(), Value::from(ctx.session.id()));
    channel
        .broadcast(ctx.session.id(), fields)
        .await
        .map_err(|_| HandlerError::Internal("channel task unavailable".to_string()))
}
