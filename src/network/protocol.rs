use crate::core::{FullBlockState, SignedTransaction};
use crate::error::{ChainError, Result};
use crate::utils::{deserialize, serialize};
use serde::{Deserialize, Serialize};

/// Peer-to-peer message types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum Message {
    ReportTransaction {
        transaction: SignedTransaction,
    },
    GetFullBlock {
        index: u32,
    },
    ReportFullBlock {
        block: FullBlockState,
    },
    GetHeadBlockIndex,
    /// `None` when the sender has no chain yet
    ReportHeadBlockIndex {
        index: Option<u32>,
    },
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Message> {
        deserialize(bytes)
            .map_err(|e| ChainError::Network(format!("Failed to decode message: {e}")))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Message::ReportTransaction { .. } => "report_transaction",
            Message::GetFullBlock { .. } => "get_full_block",
            Message::ReportFullBlock { .. } => "report_full_block",
            Message::GetHeadBlockIndex => "get_head_block_index",
            Message::ReportHeadBlockIndex { .. } => "report_head_block_index",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_round_trip() {
        let message = Message::ReportHeadBlockIndex { index: Some(7) };
        let bytes = message.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), message);
        assert_eq!(message.name(), "report_head_block_index");
    }

    #[test]
    fn test_garbage_is_network_error() {
        assert!(matches!(
            Message::decode(&[0xff, 0xff, 0xff]),
            Err(ChainError::Network(_))
        ));
    }
}
