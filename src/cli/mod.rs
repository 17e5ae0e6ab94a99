//! Command-line interface
//!
//! Argument parsing for the `market-chain` binary.

pub mod commands;

pub use commands::{Command, Opt};
