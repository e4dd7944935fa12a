//! Message model: inbound verbs and outbound events.
//!
//! Every inbound object carries a `"type"` field naming a verb. A small set
//! of verbs is recognised and parsed into typed variants; everything else
//! is kept as an opaque field map and relayed to the sender's channel with
//! an injected `origin`. Outbound traffic mirrors this split: typed replies
//! the server originates, opaque relayed maps, and the bare-newline ping.

use crate::state::Stats;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The single protocol version this server speaks.
pub const PROTOCOL_VERSION: i64 = 2;

/// An opaque JSON object, as decoded off the wire.
pub type Fields = serde_json::Map<String, Value>;

/// A channel member as exposed to clients in rosters and join/part events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: u64,
    pub connection_type: String,
}

/// A message decoded from a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    ProtocolVersion { version: i64 },
    Join { channel: String, connection_type: String },
    Stat { password: String },
    Pong,
    /// Unrecognised verb; carried verbatim for channel relay.
    Relay(Fields),
}

#[derive(Debug, Deserialize)]
struct ProtocolVersionFields {
    #[serde(default)]
    version: i64,
}

#[derive(Debug, Deserialize)]
struct JoinFields {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    connection_type: String,
}

#[derive(Debug, Deserialize)]
struct StatFields {
    #[serde(default)]
    password: String,
}

impl ClientMessage {
    /// Parse a decoded object into a typed verb, or the relay fallback.
    ///
    /// The `"type"` field is probed first; a recognised verb is then
    /// re-deserialized as its typed variant, so a wrongly-typed field of a
    /// known verb is an error while unknown verbs pass through untouched.
    /// Missing fields of known verbs default to zero values; the dispatcher
    /// owns rejecting those.
    pub fn parse(fields: Fields) -> Result<Self, serde_json::Error> {
        use serde::de::Error as _;

        let verb = match fields.get("type") {
            Some(Value::String(verb)) => Some(verb.clone()),
            // An absent (or null) type falls through to the relay path.
            None | Some(Value::Null) => None,
            Some(_) => {
                return Err(serde_json::Error::custom(r#""type" must be a string"#));
            }
        };

        match verb.as_deref() {
            Some("protocol_version") => {
                let msg: ProtocolVersionFields = serde_json::from_value(Value::Object(fields))?;
                Ok(Self::ProtocolVersion { version: msg.version })
            }
            Some("join") => {
                let msg: JoinFields = serde_json::from_value(Value::Object(fields))?;
                Ok(Self::Join {
                    channel: msg.channel,
                    connection_type: msg.connection_type,
                })
            }
            Some("stat") => {
                let msg: StatFields = serde_json::from_value(Value::Object(fields))?;
                Ok(Self::Stat { password: msg.password })
            }
            Some("pong") => Ok(Self::Pong),
            _ => Ok(Self::Relay(fields)),
        }
    }
}

/// Typed messages the server originates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Motd {
        motd: String,
        force_display: bool,
    },
    /// Sent to the joining session only; `clients` is the roster of
    /// pre-existing members, not including the joiner.
    ChannelJoined {
        channel: String,
        origin: u64,
        clients: Vec<MemberInfo>,
    },
    ClientJoined {
        client: MemberInfo,
    },
    ClientLeft {
        client: MemberInfo,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Kick,
    VersionMismatch,
    Error {
        error: String,
    },
    Stats {
        stats: Stats,
    },
}

/// Everything the session writer can put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Reply(Reply),
    /// A relayed channel message, all fields verbatim plus `origin`.
    Relay(Fields),
    /// The bare-`\n` keep-alive sentinel.
    Ping,
}

impl From<Reply> for Outbound {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}
