use crate::error::Result;
use crate::network::peer::{PeerId, PeerLink};
use crate::network::protocol::Message;
use crate::node::{BlockStatus, Node, Notification};
use log::{debug, info, warn};

/// One connected peer as seen by the node: answers its requests and keeps it
/// fed with what the node learns.
pub struct Session {
    peer: Box<dyn PeerLink>,
}

impl Session {
    pub fn new(peer: Box<dyn PeerLink>) -> Session {
        Session { peer }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer.id()
    }

    /// Asks for the first block after my head.
    pub fn on_connect(&self, node: &Node) -> Result<()> {
        info!("Peer {} connected", self.peer.id());
        self.request_next(node)
    }

    fn request_next(&self, node: &Node) -> Result<()> {
        let index = node.get_head_block_index().map_or(0, |head| head + 1);
        self.peer.send(&Message::GetFullBlock { index })
    }

    pub fn handle_message(&self, node: &mut Node, message: Message) -> Result<()> {
        debug!("Peer {} sent {}", self.peer.id(), message.name());
        match message {
            Message::ReportTransaction { transaction } => {
                node.add_transaction(transaction)?;
            }
            Message::GetFullBlock { index } => match node.get_full_block(index)? {
                Some(block) => self.peer.send(&Message::ReportFullBlock { block })?,
                None => self.peer.send(&Message::ReportHeadBlockIndex {
                    index: node.get_head_block_index(),
                })?,
            },
            Message::ReportFullBlock { block } => {
                let index = block.index;
                let peer_head = block.head_index;
                let status = node.add_full_block(block)?;
                if status != BlockStatus::Accepted {
                    debug!("Block {index} from peer {} not adopted: {status:?}", self.peer.id());
                } else if peer_head > node.get_head_block_index() {
                    self.request_next(node)?;
                }
            }
            Message::GetHeadBlockIndex => {
                self.peer.send(&Message::ReportHeadBlockIndex {
                    index: node.get_head_block_index(),
                })?;
            }
            Message::ReportHeadBlockIndex { index } => {
                if index > node.get_head_block_index() {
                    self.request_next(node)?;
                }
            }
        }
        Ok(())
    }

    /// Relays a node notification to this peer.
    pub fn forward(&self, node: &Node, notification: &Notification) -> Result<()> {
        match notification {
            Notification::NewTransaction(transaction) => {
                self.peer.send(&Message::ReportTransaction {
                    transaction: transaction.clone(),
                })
            }
            Notification::NewBlock(block) => self.peer.send(&Message::ReportFullBlock {
                block: block.clone(),
            }),
            Notification::BlockStateRequested(state) => {
                warn!("Asking peer {} to fill in block state {state}", self.peer.id());
                self.request_next(node)
            }
        }
    }
}
