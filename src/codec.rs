//! Byte encoding shared by the store and the peer protocol.
//!
//! Everything that is persisted or sent to a peer goes through these two
//! functions so both sides agree on one structure-preserving format.

use crate::error::{ChainError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| ChainError::SerializationError(format!("Failed to encode: {}", e)))
}

pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| ChainError::SerializationError(format!("Failed to decode: {}", e)))
}
