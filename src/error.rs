//! Dispatcher error taxonomy.
//!
//! Every rejection a verb handler can produce maps to a client-visible
//! reply and, for protocol violations, a session stop reason. Keeping the
//! mapping on the error type means the session loop handles all failures
//! one way.

use crate::message::Reply;
use thiserror::Error;

/// Errors produced while handling a client message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("no channel specified")]
    NoChannel,

    #[error("no connection_type specified")]
    NoConnectionType,

    /// Join duplicating the sender's current channel. Not fatal.
    #[error("already in channel")]
    AlreadyInChannel,

    #[error("unsupported protocol version")]
    VersionMismatch,

    #[error("stats requested while in a channel")]
    StatsWhileInChannel,

    #[error("stats requested without a password")]
    NoStatsPassword,

    #[error("wrong stats password")]
    WrongStatsPassword,

    /// Unknown verb from a session with no channel to relay to. Not fatal.
    #[error("unknown type outside a channel")]
    UnknownTypeOutsideChannel,

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Static label for log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoChannel => "no_channel",
            Self::NoConnectionType => "no_connection_type",
            Self::AlreadyInChannel => "already_in_channel",
            Self::VersionMismatch => "version_mismatch",
            Self::StatsWhileInChannel => "stats_while_in_channel",
            Self::NoStatsPassword => "no_stats_password",
            Self::WrongStatsPassword => "wrong_stats_password",
            Self::UnknownTypeOutsideChannel => "unknown_type_outside_channel",
            Self::Internal(_) => "internal_error",
        }
    }

    /// The reply sent to the client for this rejection.
    pub fn reply(&self) -> Reply {
        let reason = match self {
            Self::VersionMismatch => return Reply::VersionMismatch,
            Self::NoChannel => "no channel specified",
            Self::NoConnectionType => "no connection_type specified",
            Self::AlreadyInChannel => "Already in channel",
            Self::StatsWhileInChannel => "no stats while in channel",
            Self::NoStatsPassword => "no password",
            Self::WrongStatsPassword => "wrong password",
            Self::UnknownTypeOutsideChannel => "Type unknown, and not in a channel to relay",
            Self::Internal(_) => "internal error",
        };
        Reply::Error {
            error: reason.to_string(),
        }
    }

    /// The stop reason for fatal rejections; `None` keeps the session alive.
    pub fn stop_reason(&self) -> Option<&'static str> {
        match self {
            Self::NoChannel | Self::NoConnectionType | Self::StatsWhileInChannel => {
                Some("protocol error")
            }
            Self::AlreadyInChannel | Self::UnknownTypeOutsideChannel => None,
            Self::VersionMismatch => Some("Version mismatch"),
            Self::NoStatsPassword => Some("no stats password provided"),
            Self::WrongStatsPassword => Some("wrong stats password"),
            Self::Internal(_) => Some("internal error"),
        }
    }
}

/// Result type for verb handlers.
pub type HandlerResult = Result<(), HandlerError>;
