//! Local key storage
//!
//! Key pairs used to sign transactions, and the keyring file that holds them.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::Wallet;
pub use wallets::{Wallets, WALLET_FILE};
