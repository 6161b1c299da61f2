//! Proof-of-work search.
//!
//! Mining never touches shared state: it takes a candidate block by value and
//! returns it sealed, so callers can run it without holding any lock.

use crate::blockchain::Block;
use std::time::Instant;
use tracing::info;

/// Searches nonces from zero until the block hash carries `difficulty`
/// leading zero hex digits, then stamps the timestamp and hash.
pub fn mine_block(mut block: Block) -> Block {
    let target = "0".repeat(block.difficulty as usize);
    let started = Instant::now();
    block.nonce = 0;

    loop {
        let hash = block.calculate_hash();
        if hash.starts_with(&target) {
            block.timestamp = chrono::Utc::now().timestamp();
            block.hash = hash;
            break;
        }
        block.nonce = block.nonce.wrapping_add(1);
    }

    info!(
        height = block.height,
        difficulty = block.difficulty,
        nonce = block.nonce,
        elapsed_ms = %started.elapsed().as_millis(),
        hash = %block.hash,
        "block.mined"
    );
    block
}
