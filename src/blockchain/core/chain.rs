use crate::cache::BlockCache;
use crate::codec;
use crate::error::{ChainError, Result};
use crate::mempool::Mempool;
use crate::miner::mine_block;
use crate::persistence::Persistence;
use crate::transaction::Transaction;
use crate::wallet::Wallet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::difficulty::{retarget, DEFAULT_DIFFICULTY, RETARGET_INTERVAL};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub previous_hash: String,
    pub difficulty: u32,
    pub nonce: u64,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Unsealed candidate: no nonce search has run yet, so hash and
    /// timestamp are still empty.
    pub fn new(
        height: u64,
        previous_hash: String,
        difficulty: u32,
        transactions: Vec<Transaction>,
    ) -> Self {
        Block {
            height,
            hash: String::new(),
            previous_hash,
            difficulty,
            nonce: 0,
            timestamp: 0,
            transactions,
        }
    }

    /// Digest of everything the proof-of-work covers: height, parent,
    /// difficulty, nonce and every transaction in order. Transaction ids
    /// leave out signatures, so the input signatures are hashed as well.
    pub fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(self.difficulty.to_le_bytes());
        hasher.update(self.nonce.to_le_bytes());
        for tx in &self.transactions {
            hasher.update(tx.id.as_bytes());
            for tx_in in &tx.tx_ins {
                hasher.update(tx_in.signature.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    /// True when the stored hash is the digest of the stored content and
    /// carries the required leading zeros.
    pub fn meets_difficulty(&self) -> bool {
        let target = "0".repeat(self.difficulty as usize);
        self.hash.starts_with(&target) && self.calculate_hash() == self.hash
    }
}

/// The only small durable record: enough to resume without replaying blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub newest_hash: String,
    pub height: u64,
    pub current_difficulty: u32,
}

pub struct Blockchain {
    head: Mutex<ChainHead>,
    store: Arc<dyn Persistence>,
    cache: BlockCache,
    pub(crate) mempool: Arc<Mempool>,
    miner_address: String,
}

impl Blockchain {
    /// Restores the chain head from the store's checkpoint, or mines and
    /// persists the first block when the store is empty.
    pub fn initialize(
        store: Arc<dyn Persistence>,
        mempool: Arc<Mempool>,
        miner_address: impl Into<String>,
    ) -> Result<Self> {
        let checkpoint = store.load_checkpoint()?;
        let head = match checkpoint {
            Some(bytes) => codec::from_bytes::<ChainHead>(&bytes)?,
            None => ChainHead::default(),
        };

        let chain = Blockchain {
            head: Mutex::new(head),
            store,
            cache: BlockCache::default(),
            mempool,
            miner_address: miner_address.into(),
        };

        if chain.head().height == 0 {
            info!("No checkpoint found, mining the first block");
            chain.add_block()?;
        } else {
            let head = chain.head();
            info!(
                height = head.height,
                difficulty = head.current_difficulty,
                newest_hash = %head.newest_hash,
                "chain.restored"
            );
        }

        Ok(chain)
    }

    pub fn head(&self) -> ChainHead {
        self.head.lock().clone()
    }

    pub fn height(&self) -> u64 {
        self.head.lock().height
    }

    pub fn miner_address(&self) -> &str {
        &self.miner_address
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    /// Builds a signed spend of `amount` from `wallet` to `to` and admits it
    /// to the mempool.
    pub fn add_tx(&self, wallet: &Wallet, to: &str, amount: u64) -> Result<Transaction> {
        self.mempool.add_tx(self, wallet, to, amount)
    }

    /// Difficulty the next block must be mined at.
    pub fn difficulty(&self) -> Result<u32> {
        let head = self.head.lock();
        self.difficulty_for(&head)
    }

    fn difficulty_for(&self, head: &ChainHead) -> Result<u32> {
        if head.height == 0 {
            return Ok(DEFAULT_DIFFICULTY);
        }
        if head.height % RETARGET_INTERVAL != 0 {
            return Ok(head.current_difficulty);
        }
        let recent = self.walk(head, Some(RETARGET_INTERVAL as usize))?;
        Ok(retarget(head.current_difficulty, &recent))
    }

    /// Drains the mempool into a new block, mines it and makes it the head.
    ///
    /// The nonce search runs with no lock held; only the candidate snapshot
    /// and the final commit touch the chain head. If the head moved in
    /// between, the block is discarded and its transactions go back to the
    /// mempool.
    pub fn add_block(&self) -> Result<Block> {
        let candidate = self.candidate()?;
        self.commit(mine_block(candidate))
    }

    fn candidate(&self) -> Result<Block> {
        let transactions = self.mempool.confirm_txs(&self.miner_address);

        let head = self.head.lock();
        let prepared = self
            .difficulty_for(&head)
            .map(|difficulty| (head.height + 1, head.newest_hash.clone(), difficulty));
        drop(head);

        match prepared {
            Ok((height, previous_hash, difficulty)) => {
                Ok(Block::new(height, previous_hash, difficulty, transactions))
            }
            Err(e) => {
                self.mempool.restore(&transactions);
                Err(e)
            }
        }
    }

    fn commit(&self, block: Block) -> Result<Block> {
        let mut head = self.head.lock();
        let outcome = if head.newest_hash != block.previous_hash {
            Err(ChainError::InvalidBlock(format!(
                "Chain head moved to {} while mining on {}",
                head.newest_hash, block.previous_hash
            )))
        } else {
            let next = ChainHead {
                newest_hash: block.hash.clone(),
                height: block.height,
                current_difficulty: block.difficulty,
            };
            self.persist_block(&block)
                .and_then(|_| self.persist_head(&next))
                .map(|_| *head = next)
        };
        // Mempool before head is the lock order, so release the head first.
        drop(head);

        if let Err(e) = outcome {
            let returned = self.mempool.restore(&block.transactions);
            warn!(height = block.height, error = %e, returned, "block.discarded");
            return Err(e);
        }

        info!(
            height = block.height,
            hash = %block.hash,
            txs = block.transactions.len(),
            "block.added"
        );
        Ok(block)
    }

    /// Accepts a block announced by a peer as the new head. Neither its
    /// proof-of-work nor its signatures are checked here.
    pub fn add_peer_block(&self, block: Block) -> Result<()> {
        {
            let mut head = self.head.lock();
            self.persist_block(&block)?;
            let next = ChainHead {
                newest_hash: block.hash.clone(),
                height: head.height + 1,
                current_difficulty: block.difficulty,
            };
            self.persist_head(&next)?;
            *head = next;
        }

        let dropped = self.mempool.remove_confirmed(&block.transactions);
        info!(
            height = block.height,
            hash = %block.hash,
            dropped_from_mempool = dropped,
            "block.accepted_from_peer"
        );
        Ok(())
    }

    /// Adopts a full foreign chain, newest block first, in place of the
    /// local one. The decision to replace is the caller's. The store swaps
    /// blocks and checkpoint in one step, so a failed write keeps the old
    /// chain.
    pub fn replace(&self, chain: Vec<Block>) -> Result<()> {
        let Some(newest) = chain.first() else {
            warn!("Ignoring replacement with an empty chain");
            return Ok(());
        };
        let next = ChainHead {
            newest_hash: newest.hash.clone(),
            height: newest.height,
            current_difficulty: newest.difficulty,
        };

        let encoded = chain
            .iter()
            .map(|block| Ok((block.hash.clone(), codec::to_bytes(block)?)))
            .collect::<Result<Vec<_>>>()?;
        let checkpoint = codec::to_bytes(&next)?;

        let mut head = self.head.lock();
        self.store.replace_chain(&encoded, &checkpoint)?;
        self.cache.clear();
        *head = next;

        info!(
            height = head.height,
            newest_hash = %head.newest_hash,
            blocks = chain.len(),
            "chain.replaced"
        );
        Ok(())
    }

    /// Every block from the head back to the first one.
    pub fn blocks(&self) -> Result<Vec<Block>> {
        let head = self.head.lock();
        self.walk(&head, None)
    }

    pub fn find_block(&self, hash: &str) -> Result<Block> {
        let _head = self.head.lock();
        self.load_block(hash)
    }

    pub fn newest_block(&self) -> Result<Block> {
        let head = self.head.lock();
        self.load_block(&head.newest_hash)
    }

    /// Follows previous-hash links from the head, newest first, stopping at
    /// the block with an empty previous hash or after `limit` blocks.
    fn walk(&self, head: &ChainHead, limit: Option<usize>) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        let mut seen = HashSet::new();
        let mut hash = head.newest_hash.clone();

        while !hash.is_empty() && limit.map_or(true, |limit| blocks.len() < limit) {
            if !seen.insert(hash.clone()) {
                return Err(ChainError::InvalidBlock(format!(
                    "Chain loops back to block {}",
                    hash
                )));
            }
            let block = self.load_block(&hash).map_err(|e| match e {
                ChainError::NotFound(_) => {
                    ChainError::DatabaseError(format!("Chain is broken at block {}", hash))
                }
                other => other,
            })?;
            hash = block.previous_hash.clone();
            blocks.push(block);
        }

        Ok(blocks)
    }

    fn load_block(&self, hash: &str) -> Result<Block> {
        if let Some(block) = self.cache.get(hash) {
            return Ok(block);
        }
        let bytes = self
            .store
            .find_block(hash)?
            .ok_or_else(|| ChainError::NotFound(format!("Block {} not found", hash)))?;
        let block: Block = codec::from_bytes(&bytes)?;
        self.cache.put(&block);
        Ok(block)
    }

    fn persist_block(&self, block: &Block) -> Result<()> {
        self.store.save_block(&block.hash, &codec::to_bytes(block)?)?;
        self.cache.put(block);
        Ok(())
    }

    fn persist_head(&self, head: &ChainHead) -> Result<()> {
        self.store.save_checkpoint(&codec::to_bytes(head)?)
    }
}
