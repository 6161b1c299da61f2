//! Cryptographic primitives for nomadcoin

use crate::error::ChainError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, SECRET_KEY_SIZE, UNCOMPRESSED_PUBLIC_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Tag byte that prefixes an uncompressed SEC1 public key.
const UNCOMPRESSED_TAG: u8 = 0x04;

/// Hex length of an address: the X and Y coordinates, 32 bytes each.
pub const ADDRESS_HEX_LEN: usize = (UNCOMPRESSED_PUBLIC_KEY_SIZE - 1) * 2;

/// SHA-256 of `data`, hex encoded. Used for block hashes and transaction ids.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Result<Self, ChainError> {
        let secret_key = SecretKey::new(&mut OsRng);
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Creates a KeyPair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                ChainError::CryptoError(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                ChainError::CryptoError(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        Ok(Self::from_secret_key(secret_key))
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// The address is the public key's two curve coordinates, hex encoded
    /// back to back. Both halves are fixed width so the key can be rebuilt
    /// from the address alone.
    pub fn address(&self) -> String {
        let uncompressed = self.public_key.serialize_uncompressed();
        hex::encode(&uncompressed[1..])
    }

    /// Signs a hex payload and returns the two signature components (r, s)
    /// hex encoded back to back.
    pub fn sign(&self, payload_hex: &str) -> Result<String, ChainError> {
        let payload = hex::decode(payload_hex)
            .map_err(|e| ChainError::CryptoError(format!("Payload is not hex: {}", e)))?;
        let message = Message::from_digest(Sha256::digest(&payload).into());
        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        let compact: [u8; COMPACT_SIGNATURE_SIZE] = signature.serialize_compact();
        Ok(hex::encode(compact))
    }
}

/// Rebuilds the public key behind an address.
pub fn public_key_from_address(address: &str) -> Result<PublicKey, ChainError> {
    if address.len() != ADDRESS_HEX_LEN {
        return Err(ChainError::CryptoError(format!(
            "Address must be {} hex characters, got {}",
            ADDRESS_HEX_LEN,
            address.len()
        )));
    }
    let coordinates = hex::decode(address)
        .map_err(|e| ChainError::CryptoError(format!("Invalid hex address: {}", e)))?;

    let mut uncompressed = Vec::with_capacity(UNCOMPRESSED_PUBLIC_KEY_SIZE);
    uncompressed.push(UNCOMPRESSED_TAG);
    uncompressed.extend_from_slice(&coordinates);

    PublicKey::from_slice(&uncompressed)
        .map_err(|e| ChainError::CryptoError(format!("Address is not a curve point: {}", e)))
}

/// Checks `signature` over the hex `payload` against the key encoded in
/// `address`. Any malformed input simply fails verification.
pub fn verify(signature: &str, payload: &str, address: &str) -> bool {
    verify_signature(signature, payload, address).is_ok()
}

fn verify_signature(signature: &str, payload: &str, address: &str) -> Result<(), ChainError> {
    let public_key = public_key_from_address(address)?;

    let signature_bytes = hex::decode(signature)
        .map_err(|e| ChainError::CryptoError(format!("Invalid hex signature: {}", e)))?;
    if signature_bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Signature must be exactly {} bytes (compact), got {}",
            COMPACT_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }
    let signature = Signature::from_compact(&signature_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid signature: {}", e)))?;

    let payload = hex::decode(payload)
        .map_err(|e| ChainError::CryptoError(format!("Payload is not hex: {}", e)))?;
    let message = Message::from_digest(Sha256::digest(&payload).into());

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| ChainError::CryptoError("Signature verification failed".to_string()))
}
