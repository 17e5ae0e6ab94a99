use crate::core::SignedTransaction;
use crate::error::{ChainError, Result};
use crate::utils::{deserialize, hash, serialize, Digest, DIGEST_LEN};
use serde::{Deserialize, Serialize};

/// Serialized header width: prev(32) + version(2) + utc_time(4) + state(32) + nonce(8).
pub const BLOCK_HEADER_LEN: usize = DIGEST_LEN + 2 + 4 + DIGEST_LEN + 8;

/// A block header. The transactions live in the [`BlockState`] that `state`
/// names, so the header stays fixed-size and cheap to hash while mining.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct Block {
    pub prev_block: Digest,
    pub version: u16,
    pub utc_time: u32,
    pub state: Digest,
    pub nonce: u64,
}

impl Block {
    pub fn new(prev_block: Digest, utc_time: u32, state: Digest) -> Block {
        Block {
            prev_block,
            version: 0,
            utc_time,
            state,
            nonce: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_LEN] {
        let mut out = [0u8; BLOCK_HEADER_LEN];
        let mut pos = 0;
        out[pos..pos + DIGEST_LEN].copy_from_slice(self.prev_block.as_bytes());
        pos += DIGEST_LEN;
        out[pos..pos + 2].copy_from_slice(&self.version.to_le_bytes());
        pos += 2;
        out[pos..pos + 4].copy_from_slice(&self.utc_time.to_le_bytes());
        pos += 4;
        out[pos..pos + DIGEST_LEN].copy_from_slice(self.state.as_bytes());
        pos += DIGEST_LEN;
        out[pos..pos + 8].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Block> {
        if bytes.len() != BLOCK_HEADER_LEN {
            return Err(ChainError::InvalidBlock(format!(
                "Block header must be {BLOCK_HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let prev_block = Digest::from_slice(&bytes[0..32])?;
        let version = u16::from_le_bytes([bytes[32], bytes[33]]);
        let utc_time = u32::from_le_bytes([bytes[34], bytes[35], bytes[36], bytes[37]]);
        let state = Digest::from_slice(&bytes[38..70])?;
        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&bytes[70..78]);
        Ok(Block {
            prev_block,
            version,
            utc_time,
            state,
            nonce: u64::from_le_bytes(nonce),
        })
    }

    pub fn digest(&self) -> Digest {
        hash(&self.to_bytes())
    }
}

/// Per-block metadata, stored keyed by the block's `state` digest.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct BlockState {
    pub index: u32,
    pub generator: String,
    pub state_digest: Digest, // ledger digest after applying the transactions
    pub transactions: Vec<Digest>,
}

impl BlockState {
    pub fn digest(&self) -> Result<Digest> {
        Ok(hash(&serialize(self)?))
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<BlockState> {
        deserialize(bytes)
    }
}

/// Everything a peer needs to adopt one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct FullBlockState {
    pub index: u32,
    pub head_index: Option<u32>,
    pub block: Block,
    pub block_state: BlockState,
    pub transactions: Vec<SignedTransaction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        Block {
            prev_block: hash(b"parent"),
            version: 3,
            utc_time: 1_700_000_000,
            state: hash(b"state"),
            nonce: 0xdead_beef,
        }
    }

    #[test]
    fn test_header_round_trip() {
        let block = sample_block();
        let bytes = block.to_bytes();
        assert_eq!(bytes.len(), BLOCK_HEADER_LEN);
        assert_eq!(Block::from_bytes(&bytes).unwrap(), block);
    }

    #[test]
    fn test_header_rejects_short_input() {
        assert!(Block::from_bytes(&[0u8; BLOCK_HEADER_LEN - 1]).is_err());
    }

    #[test]
    fn test_nonce_changes_digest() {
        let block = sample_block();
        let mut other = block;
        other.nonce += 1;
        assert_ne!(block.digest(), other.digest());
    }

    #[test]
    fn test_block_state_round_trip() {
        let state = BlockState {
            index: 4,
            generator: "miner".to_string(),
            state_digest: hash(b"ledger"),
            transactions: vec![hash(b"a"), hash(b"b")],
        };
        let decoded = BlockState::deserialize(&state.serialize().unwrap()).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.digest().unwrap(), state.digest().unwrap());
    }
}
