use crate::error::{ChainError, Result};
use crate::network::protocol::Message;
use log::trace;
use std::sync::mpsc::Sender;

pub type PeerId = u64;

/// Outbound half of a connection to one peer.
pub trait PeerLink {
    fn id(&self) -> PeerId;
    fn send(&self, message: &Message) -> Result<()>;
}

/// What a transport feeds into the node's event loop.
pub enum PeerEvent {
    PeerConnected(Box<dyn PeerLink>),
    Message { peer: PeerId, bytes: Vec<u8> },
    PeerDisconnected(PeerId),
    Shutdown,
}

/// In-process transport: encoded messages are posted straight into the
/// remote node's event queue.
pub struct ChannelPeer {
    id: PeerId,
    // how the remote side knows me
    local_id: PeerId,
    remote: Sender<PeerEvent>,
}

impl ChannelPeer {
    pub fn new(id: PeerId, local_id: PeerId, remote: Sender<PeerEvent>) -> ChannelPeer {
        ChannelPeer {
            id,
            local_id,
            remote,
        }
    }

    /// Connects two event queues to each other, announcing each side to the
    /// other with a `PeerConnected` event.
    pub fn link(
        a_id: PeerId,
        a_events: &Sender<PeerEvent>,
        b_id: PeerId,
        b_events: &Sender<PeerEvent>,
    ) -> Result<()> {
        let b_at_a = ChannelPeer::new(b_id, a_id, b_events.clone());
        let a_at_b = ChannelPeer::new(a_id, b_id, a_events.clone());
        a_events
            .send(PeerEvent::PeerConnected(Box::new(b_at_a)))
            .map_err(|_| ChainError::Network(format!("Peer {a_id} is gone")))?;
        b_events
            .send(PeerEvent::PeerConnected(Box::new(a_at_b)))
            .map_err(|_| ChainError::Network(format!("Peer {b_id} is gone")))?;
        Ok(())
    }
}

impl PeerLink for ChannelPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    fn send(&self, message: &Message) -> Result<()> {
        trace!("Sending {} to peer {}", message.name(), self.id);
        let bytes = message.encode()?;
        self.remote
            .send(PeerEvent::Message {
                peer: self.local_id,
                bytes,
            })
            .map_err(|_| ChainError::Network(format!("Peer {} disconnected", self.id)))
    }
}

impl Drop for ChannelPeer {
    fn drop(&mut self) {
        let _ = self.remote.send(PeerEvent::PeerDisconnected(self.local_id));
    }
}
