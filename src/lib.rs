//! # Market Chain - My Proof-of-Work Ledger of Names and Stocks
//!
//! This is a small blockchain node where accounts are registered names and
//! every account can issue a stock named after itself. When I come back to
//! this code, here's what I need to remember:
//!
//! ## What I Built
//! - **Append-only state log**: every name edit, transfer and block boundary is
//!   a record in one file, indexed by sled trees
//! - **Layered views**: a candidate block sits on the head block, which sits on
//!   the durable log; each layer commits, aborts or rebases
//! - **Proof of work**: SHA-256 headers with a target retargeted over the last
//!   30 blocks, mined on a worker thread I can cancel
//! - **Consensus**: the head can be extended, or replaced once by a competitor
//!   with the same parent
//! - **Keyring**: ECDSA P-256 keys with Bitcoin-style addresses
//!
//! ## How I Organized My Code
//! - `core/`: targets, blocks, transactions, chain validation and mining
//! - `storage/`: the state log, views over it, the ledger rules and the pool
//! - `node/`: the controller that decides which blocks win, and its event loop
//! - `network/`: wire messages, the peer seam and per-peer sessions
//! - `wallet/`: key management and signing
//! - `config/`: node settings from TOML and the environment
//! - `utils/`: hashing, signatures and bincode helpers
//! - `cli/`: the command-line interface
//!
//! ## When I Need to Understand Something
//! 1. Start with `node/controller.rs` for how blocks are accepted
//! 2. Look at `storage/state_view.rs` for how the layers stack
//! 3. Check `storage/ledger.rs` for what each command does to balances

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod node;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::NodeConfig;
pub use core::{
    calculate_difficulty, calculate_hash_target, generate, validate, Block, BlockState,
    FullBlockState, SignedTransaction, Transaction, MAX_HASH,
};
pub use error::{ChainError, Result};
pub use network::{ChannelPeer, Message, PeerEvent, PeerId, PeerLink, Session};
pub use node::{BlockStatus, EventLoop, Node, Notification};
pub use storage::{StateLog, StateView, Tier, TransferLogEntry};
pub use utils::{current_utc_seconds, encode_address, validate_address_format, Digest, PublicKey};
pub use wallet::{Wallet, Wallets};
