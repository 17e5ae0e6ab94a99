//! The ledger node
//!
//! [`Node`] is the consensus controller: it owns the chain, the state views
//! and the transaction pool, and it mines through a background worker.
//! [`EventLoop`] serializes everything that reaches it from peers.

pub mod controller;
pub mod event_loop;
pub mod generation;

pub use controller::{BlockStatus, Clock, Node, Notification};
pub use event_loop::EventLoop;
pub use generation::CandidateBlock;
