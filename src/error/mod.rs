//! Error handling for the ledger node
//!
//! Every fallible operation in the crate returns [`Result`]. Command-level
//! rejections (bad signature, unknown name) are usually reported as `Ok(false)`
//! by the state views; the variants here cover the cases that must stop an
//! operation outright.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, ChainError>;

#[derive(Debug, Clone)]
pub enum ChainError {
    /// Key-value store failures
    Database(String),
    /// Signing, verification and key handling
    Crypto(String),
    /// Peer communication errors
    Network(String),
    /// A transaction or command could not be applied
    Transaction(String),
    /// Keyring errors
    Wallet(String),
    /// Configuration errors
    Config(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Invalid address format
    InvalidAddress(String),
    /// Balance too low for a transfer
    InsufficientFunds { required: u64, available: u64 },
    /// Block or chain validation errors
    InvalidBlock(String),
    /// Mining worker errors
    Mining(String),
    /// The state log is unreadable at the requested offset
    Corruption(String),
    /// A name that has never been registered
    UnknownName(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Database(msg) => write!(f, "Database error: {msg}"),
            ChainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            ChainError::Network(msg) => write!(f, "Network error: {msg}"),
            ChainError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            ChainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            ChainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            ChainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            ChainError::Io(msg) => write!(f, "I/O error: {msg}"),
            ChainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            ChainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            ChainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            ChainError::Mining(msg) => write!(f, "Mining error: {msg}"),
            ChainError::Corruption(msg) => write!(f, "State log corruption: {msg}"),
            ChainError::UnknownName(name) => write!(f, "Unknown name: {name}"),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<sled::Error> for ChainError {
    fn from(err: sled::Error) -> Self {
        ChainError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for ChainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for ChainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::Config(err.to_string())
    }
}
