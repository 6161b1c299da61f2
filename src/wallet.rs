//! The node's identity: one keypair, created on first start and reloaded
//! from its key file afterwards.

use crate::crypto::KeyPair;
use crate::error::ChainError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// On-disk form of the key file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletFile {
    address: String,
    secret_key_hex: String,
    created: String,
}

#[derive(Debug, Clone)]
pub struct Wallet {
    pub address: String,
    pub created: String,
    keypair: KeyPair,
}

impl Wallet {
    /// Creates a fresh wallet that is not yet persisted.
    pub fn generate() -> Result<Self, ChainError> {
        let keypair = KeyPair::generate()?;
        Ok(Self::from_keypair(keypair, chrono::Utc::now().to_rfc3339()))
    }

    fn from_keypair(keypair: KeyPair, created: String) -> Self {
        Wallet {
            address: keypair.address(),
            created,
            keypair,
        }
    }

    /// Loads the wallet at `path`, or generates and persists one when the file
    /// does not exist yet.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let path = path.as_ref();
        if path.exists() {
            let wallet = Self::load(path)?;
            info!(address = %wallet.address, path = %path.display(), "wallet.loaded");
            return Ok(wallet);
        }

        let wallet = Self::generate()?;
        wallet.save(path)?;
        info!(address = %wallet.address, path = %path.display(), "wallet.created");
        Ok(wallet)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let raw = fs::read(path.as_ref())?;
        let file: WalletFile = serde_json::from_slice(&raw)
            .map_err(|e| ChainError::WalletError(format!("Malformed key file: {}", e)))?;
        let secret = hex::decode(&file.secret_key_hex)
            .map_err(|e| ChainError::WalletError(format!("Malformed secret key: {}", e)))?;
        let keypair = KeyPair::from_secret_bytes(&secret)?;

        if keypair.address() != file.address {
            return Err(ChainError::WalletError(
                "Key file address does not match its secret key".to_string(),
            ));
        }

        Ok(Self::from_keypair(keypair, file.created))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ChainError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = WalletFile {
            address: self.address.clone(),
            secret_key_hex: self.keypair.secret_key_hex(),
            created: self.created.clone(),
        };
        fs::write(path, serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }

    /// Signs a hex payload with this wallet's key.
    pub fn sign(&self, payload_hex: &str) -> Result<String, ChainError> {
        self.keypair.sign(payload_hex)
    }
}
