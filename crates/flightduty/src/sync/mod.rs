//! Companion sync: wire protocol, transport, and both ends of the link.

pub mod bridge;
pub mod companion;
pub mod link;
pub mod protocol;

pub use bridge::{InboundOutcome, LinkState, SyncBridge};
pub use companion::{ArchivedLeg, CompanionMirror};
pub use link::{ChannelLink, CompanionLink};
pub use protocol::CompanionMessage;
