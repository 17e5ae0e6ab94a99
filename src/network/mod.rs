//! Peer-to-peer networking
//!
//! The wire messages, the [`PeerLink`] seam transports implement, an
//! in-process [`ChannelPeer`] transport, and per-peer [`Session`] dispatch.

pub mod peer;
pub mod protocol;
pub mod session;

pub use peer::{ChannelPeer, PeerEvent, PeerId, PeerLink};
pub use protocol::Message;
pub use session::Session;
