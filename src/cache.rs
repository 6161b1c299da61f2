//! Caching layer for decoded blocks
//!
//! Every history query walks the chain backwards one store lookup at a time.
//! Blocks are immutable once written, so recently decoded ones are kept in an
//! LRU cache keyed by hash. The cache must be cleared whenever the stored
//! chain is replaced wholesale.
use crate::blockchain::Block;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Number of blocks kept by [`BlockCache::default`].
pub const DEFAULT_BLOCK_CACHE_SIZE: usize = 256;

pub struct BlockCache {
    blocks: Mutex<LruCache<String, Block>>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            blocks: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, hash: &str) -> Option<Block> {
        self.blocks.lock().get(hash).cloned()
    }

    pub fn put(&self, block: &Block) {
        self.blocks.lock().put(block.hash.clone(), block.clone());
    }

    pub fn clear(&self) {
        self.blocks.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(hash: &str) -> Block {
        let mut block = Block::new(1, String::new(), 1, vec![]);
        block.hash = hash.to_string();
        block
    }

    #[test]
    fn test_put_and_get() {
        let cache = BlockCache::new(4);
        cache.put(&block("aa"));
        assert_eq!(cache.get("aa").map(|b| b.hash), Some("aa".to_string()));
        assert!(cache.get("bb").is_none());
    }

    #[test]
    fn test_eviction_and_clear() {
        let cache = BlockCache::new(2);
        cache.put(&block("aa"));
        cache.put(&block("bb"));
        cache.put(&block("cc"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("aa").is_none());

        cache.clear();
        assert!(cache.is_empty());
    }
}
