//! nomadcoin - A minimal proof-of-work ledger with gossip-based replication
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Blockchain
//! - [`blockchain`] - Chain head, blocks, difficulty retarget and UTXO queries
//! - [`transaction`] - Transaction types, construction and validation
//! - [`mempool`] - Unconfirmed transaction pool
//!
//! ## Consensus
//! - [`miner`] - Proof-of-work nonce search
//!
//! ## Cryptography
//! - [`crypto`] - secp256k1 signatures and hex addresses
//!
//! ## State Management
//! - [`wallet`] - The node's persisted keypair
//! - [`persistence`] - Durable block store (SQLite) and in-memory store
//! - [`cache`] - Decoded block cache
//! - [`codec`] - Byte encoding for stored records and messages
//!
//! ## Networking
//! - [`network`] - Peer registry and websocket connections
//! - [`sync`] - Peer synchronization protocol
//!
//! ## Integration
//! - `api` - REST API and the peer upgrade endpoint
//! - `explorer` - HTML block explorer
//! - [`node`] - Startup orchestration
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Blockchain
// ============================================================================
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod miner;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod cache;
pub mod codec;
pub mod persistence;
pub mod wallet;

// ============================================================================
// Networking
// ============================================================================
pub mod network;
pub mod sync;

// ============================================================================
// Integration
// ============================================================================
#[cfg(feature = "api")]
pub mod api;
#[cfg(feature = "api")]
pub mod explorer;
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
