//! nvremoted - relay server for the NVDA Remote protocol.
//!
//! The server is a fan-out point for assistive-technology endpoints: clients
//! sharing a channel name exchange opaque JSON messages through it. It
//! authenticates nobody and inspects nothing beyond a handful of control
//! verbs; confidentiality, when present, is end-to-end between the peers or
//! TLS on the listening socket.
//!
//! # Architecture
//!
//! - [`network::Gateway`] accepts connections (optionally TLS) and spawns a
//!   session per client, plus a singleton ping ticker.
//! - Each session ([`session::serve`]) runs a reader task and a handler task
//!   under a supervisor; the handler owns the write half.
//! - Channels are independent tasks serving join, part, and broadcast
//!   inboxes; they are the sole mutators of their member lists.
//! - [`state::Registry`] is the single lock guarding the channel index,
//!   client accounting, and peak counters.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod network;
pub mod session;
pub mod state;
pub mod wire;
