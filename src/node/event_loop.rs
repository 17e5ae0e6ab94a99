use crate::error::Result;
use crate::network::{Message, PeerEvent, PeerId, Session};
use crate::node::{Node, Notification};
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(100);

/// Drives a node: peer events, mined blocks and outgoing notifications are
/// all handled here, one at a time.
pub struct EventLoop {
    node: Node,
    events: Receiver<PeerEvent>,
    sender: Sender<PeerEvent>,
    notifications: Receiver<Notification>,
    sessions: HashMap<PeerId, Session>,
}

impl EventLoop {
    pub fn new(mut node: Node) -> EventLoop {
        let (sender, events) = mpsc::channel();
        let notifications = node.subscribe();
        EventLoop {
            node,
            events,
            sender,
            notifications,
            sessions: HashMap::new(),
        }
    }

    /// Transports post their events through this.
    pub fn sender(&self) -> Sender<PeerEvent> {
        self.sender.clone()
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut Node {
        &mut self.node
    }

    pub fn peer_count(&self) -> usize {
        self.sessions.len()
    }

    /// Waits up to `timeout` for peer events, then handles everything that
    /// is ready. Returns false once a shutdown was requested.
    pub fn tick(&mut self, timeout: Duration) -> Result<bool> {
        let first = match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => return Ok(false),
        };
        if let Some(event) = first {
            if !self.handle_event(event)? {
                return Ok(false);
            }
            while let Ok(event) = self.events.try_recv() {
                if !self.handle_event(event)? {
                    return Ok(false);
                }
            }
        }

        self.node.process_mined_blocks()?;
        self.forward_notifications();
        Ok(true)
    }

    pub fn run(&mut self) -> Result<()> {
        info!("Event loop running");
        while self.tick(TICK)? {}
        info!("Event loop stopped");
        Ok(())
    }

    fn handle_event(&mut self, event: PeerEvent) -> Result<bool> {
        match event {
            PeerEvent::PeerConnected(peer) => {
                let session = Session::new(peer);
                if let Err(e) = session.on_connect(&self.node) {
                    warn!("Could not greet peer {}: {e}", session.peer_id());
                }
                self.sessions.insert(session.peer_id(), session);
            }
            PeerEvent::Message { peer, bytes } => {
                let session = match self.sessions.get(&peer) {
                    Some(session) => session,
                    None => {
                        warn!("Message from unknown peer {peer}");
                        return Ok(true);
                    }
                };
                match Message::decode(&bytes) {
                    Ok(message) => {
                        if let Err(e) = session.handle_message(&mut self.node, message) {
                            error!("Error handling message from peer {peer}: {e}");
                        }
                    }
                    Err(e) => warn!("Dropping message from peer {peer}: {e}"),
                }
            }
            PeerEvent::PeerDisconnected(peer) => {
                if self.sessions.remove(&peer).is_some() {
                    info!("Peer {peer} disconnected");
                }
            }
            PeerEvent::Shutdown => return Ok(false),
        }
        Ok(true)
    }

    fn forward_notifications(&mut self) {
        while let Ok(notification) = self.notifications.try_recv() {
            for session in self.sessions.values() {
                if let Err(e) = session.forward(&self.node, &notification) {
                    warn!("Could not forward to peer {}: {e}", session.peer_id());
                }
            }
        }
    }
}
