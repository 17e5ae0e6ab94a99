//! Test utilities for ledger and node testing

use crate::config::NodeConfig;
use crate::core::{calculate_hash_target, generate, Block, Command, SignedTransaction, Transaction};
use crate::node::Node;
use crate::storage::StateLog;
use crate::utils::{encode_address, generate_keypair, hash, Digest, PublicKey};
use std::cell::Cell;
use std::rc::Rc;
use tempfile::TempDir;

/// Small enough that opening a node does not stall the tests
pub const TEST_HASH_RATE_SAMPLE: u64 = 1_000;

/// A key pair plus the address derived from it
pub struct TestKey {
    pub public_key: PublicKey,
    pub pkcs8: Vec<u8>,
    pub address: String,
}

impl TestKey {
    pub fn new() -> TestKey {
        let (public_key, pkcs8) = generate_keypair().unwrap();
        let address = encode_address(&public_key);
        TestKey {
            public_key,
            pkcs8,
            address,
        }
    }
}

impl Default for TestKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a transaction from `commands` signed by every key in `signers`
pub fn signed(commands: Vec<Command>, signers: &[&TestKey]) -> SignedTransaction {
    let mut trx = SignedTransaction::new(Transaction::new(commands).unwrap());
    for key in signers {
        trx.sign(&key.pkcs8).unwrap();
    }
    trx
}

/// Open an empty state log in a temporary directory
pub fn open_test_log() -> (TempDir, StateLog) {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path().join("index_db")).unwrap();
    let log = StateLog::open(&db, dir.path().join("state.log")).unwrap();
    (dir, log)
}

pub fn test_config(dir: &TempDir) -> NodeConfig {
    NodeConfig {
        generator: "miner".to_string(),
        hash_rate_sample: TEST_HASH_RATE_SAMPLE,
        ..NodeConfig::for_data_dir(dir.path())
    }
}

/// Open a node whose clock reads the returned cell
pub fn open_test_node(start_time: u32) -> (TempDir, Node, Rc<Cell<u32>>) {
    let dir = tempfile::tempdir().unwrap();
    let (node, clock) = reopen_test_node(&dir, start_time);
    (dir, node, clock)
}

pub fn reopen_test_node(dir: &TempDir, start_time: u32) -> (Node, Rc<Cell<u32>>) {
    let clock = Rc::new(Cell::new(start_time));
    let reader = clock.clone();
    let node = Node::open_with_clock(test_config(dir), Box::new(move || Ok(reader.get()))).unwrap();
    (node, clock)
}

/// Mine `count` linked blocks, 15 seconds apart from `start_time`
pub fn mine_chain(count: usize, start_time: u32) -> Vec<Block> {
    let mut chain: Vec<Block> = Vec::with_capacity(count);
    for i in 0..count {
        let prev = chain.last().map(Block::digest).unwrap_or_else(Digest::zero);
        let mut block = Block::new(
            prev,
            start_time + 15 * i as u32,
            hash(format!("state {i}").as_bytes()),
        );
        let target = calculate_hash_target(&chain, i);
        assert!(generate(&mut block, &target, 0, u64::MAX));
        chain.push(block);
    }
    chain
}

/// Mine the node's next candidate and hand it back to the node
pub fn mine_next(node: &mut Node) -> Block {
    let mut candidate = node.build_candidate().unwrap();
    assert!(generate(&mut candidate.block, &candidate.target, 0, u64::MAX));
    candidate.block
}
