//! Shared server state: channel tasks and the process-wide registry.

mod channel;
mod registry;

pub use channel::{is_e2e, ChannelHandle, ChannelRequest, ChannelUnavailable, JoinError, Member};
pub use registry::{Registry, Stats};
