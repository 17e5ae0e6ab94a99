//! Core chain functionality
//!
//! Block headers, transactions, target math, chain validation and the
//! proof-of-work search.

pub mod block;
pub mod blockchain;
pub mod proof_of_work;
pub mod target;
pub mod transaction;

pub use block::{Block, BlockState, FullBlockState, BLOCK_HEADER_LEN};
pub use blockchain::{
    calculate_difficulty, calculate_hash_target, validate, ChainFile, BLOCK_WINDOW,
    MAX_FUTURE_SECONDS, SECONDS_PER_BLOCK,
};
pub use proof_of_work::{
    calculate_hash_rate, generate, spawn_miner, MinedBlock, MinerHandle, MiningJob, StopFlag,
};
pub use target::{bit_length, from_bigint, meets_target, scale_target, to_bigint, MAX_HASH};
pub use transaction::{Command, SignedTransaction, Transaction};
