//! Error types for nomadcoin

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    NotFound(String),
    InsufficientFunds { available: u64, requested: u64 },
    InvalidSignature(String),
    InvalidTransaction(String),
    InvalidBlock(String),
    DatabaseError(String),
    SerializationError(String),
    CryptoError(String),
    WalletError(String),
    IoError(String),
    NetworkError(String),
}

impl ChainError {
    /// Persistence, key material and decoding failures. These abort the
    /// operation in progress and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChainError::DatabaseError(_)
                | ChainError::SerializationError(_)
                | ChainError::CryptoError(_)
                | ChainError::WalletError(_)
                | ChainError::IoError(_)
        )
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ChainError::InsufficientFunds {
                available,
                requested,
            } => write!(
                f,
                "Insufficient funds: balance {} is less than {}",
                available, requested
            ),
            ChainError::InvalidSignature(msg) => write!(f, "Invalid signature: {}", msg),
            ChainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {}", msg),
            ChainError::InvalidBlock(msg) => write!(f, "Invalid block: {}", msg),
            ChainError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ChainError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            ChainError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            ChainError::WalletError(msg) => write!(f, "Wallet error: {}", msg),
            ChainError::IoError(msg) => write!(f, "IO error: {}", msg),
            ChainError::NetworkError(msg) => write!(f, "Network error: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
