// This is the chain model - how I decide whether a sequence of headers is valid
// The chain itself is just an ordered Vec<Block>; the node owns it
// Difficulty comes from the hashes the chain already has, there is no separate retarget schedule

use crate::core::target::{bit_length, meets_target, scale_target, to_bigint, MAX_HASH};
use crate::core::{Block, BLOCK_HEADER_LEN};
use crate::error::Result;
use crate::utils::{Digest, DIGEST_BITS};
use log::{info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

// How many earlier blocks feed the next hash target
pub const BLOCK_WINDOW: usize = 30;
// Minimum spacing between consecutive block timestamps
pub const SECONDS_PER_BLOCK: u32 = 15;
// How far ahead of my clock a block timestamp may be before I refuse it
pub const MAX_FUTURE_SECONDS: u32 = 30;

// The target for block `index`: the loosest hash among the previous BLOCK_WINDOW
// blocks, eased by 257/256 and capped at MAX_HASH. Only chain[..index] is read,
// so I can also ask for the target of the block that comes after the head.
pub fn calculate_hash_target(chain: &[Block], index: usize) -> Digest {
    if index == 0 || chain.is_empty() {
        return *MAX_HASH;
    }
    let end = index.min(chain.len());
    let start = end.saturating_sub(BLOCK_WINDOW);
    match chain[start..end].iter().map(Block::digest).max() {
        Some(loosest) => scale_target(&loosest),
        None => *MAX_HASH,
    }
}

// Coarse work estimate for reporting; chain selection never looks at it
pub fn calculate_difficulty(chain: &[Block]) -> i64 {
    (0..chain.len())
        .map(|i| {
            let target = calculate_hash_target(chain, i);
            i64::from(DIGEST_BITS) - i64::from(bit_length(&to_bigint(&target)))
        })
        .sum()
}

// Any single violation invalidates the whole chain
pub fn validate(chain: &[Block]) -> bool {
    let mut prev_hash = Digest::zero();
    let mut prev_time: Option<u32> = None;

    for (i, block) in chain.iter().enumerate() {
        if block.prev_block != prev_hash {
            warn!(
                "Block {i} links to {} but previous hash is {prev_hash}",
                block.prev_block
            );
            return false;
        }
        if let Some(prev_time) = prev_time {
            if i64::from(block.utc_time) - i64::from(prev_time) < i64::from(SECONDS_PER_BLOCK) {
                warn!(
                    "Block {i} at {} is less than {SECONDS_PER_BLOCK}s after {prev_time}",
                    block.utc_time
                );
                return false;
            }
        }
        let hash = block.digest();
        let target = calculate_hash_target(chain, i);
        if !meets_target(&hash, &target) {
            warn!("Block {i} hash {hash} is above target {target}");
            return false;
        }
        prev_hash = hash;
        prev_time = Some(block.utc_time);
    }
    true
}

// The chain file is a flat run of fixed-size headers. I rewrite it as a whole
// through a temp file so a crash leaves either the old or the new copy.
pub struct ChainFile {
    path: PathBuf,
}

impl ChainFile {
    pub fn new(path: impl Into<PathBuf>) -> ChainFile {
        ChainFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<Block>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let mut bytes = vec![];
        File::open(&self.path)?.read_to_end(&mut bytes)?;

        let chunks = bytes.chunks_exact(BLOCK_HEADER_LEN);
        if !chunks.remainder().is_empty() {
            warn!(
                "Ignoring {} trailing bytes in {}",
                chunks.remainder().len(),
                self.path.display()
            );
        }
        let chain = chunks.map(Block::from_bytes).collect::<Result<Vec<_>>>()?;
        info!("Loaded {} blocks from {}", chain.len(), self.path.display());
        Ok(chain)
    }

    pub fn save(&self, chain: &[Block]) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&tmp)?;
            for block in chain {
                file.write_all(&block.to_bytes())?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::mine_chain;
    use tempfile::tempdir;

    #[test]
    fn test_genesis_target_is_max() {
        assert_eq!(calculate_hash_target(&[], 0), *MAX_HASH);
        let chain = mine_chain(1, 1_000);
        assert_eq!(calculate_hash_target(&chain, 0), *MAX_HASH);
    }

    #[test]
    fn test_target_eases_loosest_prior_hash() {
        let chain = mine_chain(3, 1_000);
        let loosest = chain.iter().map(Block::digest).max().unwrap();
        assert_eq!(calculate_hash_target(&chain, 3), scale_target(&loosest));
    }

    #[test]
    fn test_valid_chain() {
        let chain = mine_chain(4, 1_000);
        assert!(validate(&chain));
        assert!(calculate_difficulty(&chain) >= 4 * 16);
    }

    #[test]
    fn test_byte_mutation_invalidates_chain() {
        let chain = mine_chain(4, 1_000);

        // every byte of a non-head block feeds the next block's link
        for i in 0..chain.len() - 1 {
            for pos in 0..BLOCK_HEADER_LEN {
                let mut bytes = chain[i].to_bytes();
                bytes[pos] ^= 0x01;
                let mut mutated = chain.clone();
                mutated[i] = Block::from_bytes(&bytes).unwrap();
                assert!(!validate(&mutated), "block {i} byte {pos}");
            }
        }
    }

    #[test]
    fn test_head_link_mutation_invalidates_chain() {
        let mut chain = mine_chain(3, 1_000);
        let last = chain.len() - 1;
        chain[last].prev_block.0[31] ^= 0x80;
        assert!(!validate(&chain));
    }

    #[test]
    fn test_timestamp_spacing_enforced() {
        let mut chain = mine_chain(3, 1_000);
        chain[2].utc_time = chain[1].utc_time + SECONDS_PER_BLOCK - 1;
        assert!(!validate(&chain));
    }

    #[test]
    fn test_chain_file_round_trip() {
        let dir = tempdir().unwrap();
        let file = ChainFile::new(dir.path().join("blockchain"));
        assert!(file.load().unwrap().is_empty());

        let chain = mine_chain(3, 1_000);
        file.save(&chain).unwrap();
        assert_eq!(file.load().unwrap(), chain);

        file.save(&chain[..1]).unwrap();
        assert_eq!(file.load().unwrap(), chain[..1].to_vec());
    }
}
