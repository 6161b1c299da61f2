// Thin re-export module: the ledger lives in `blockchain/core.rs`, split by
// responsibility (block and head management, difficulty, derived state).

pub mod core;
pub use core::*;
