//! Unconfirmed transaction pool.
//!
//! All access goes through one lock. When a spend is being built the pool
//! lock is held for the whole construction, so two concurrent spends cannot
//! select the same output. Lock order: pool first, then chain head.

use crate::blockchain::Blockchain;
use crate::error::Result;
use crate::transaction::{make_coinbase_tx, make_spend_tx, OutPoint, Transaction, UTxOut};
use crate::wallet::Wallet;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct Mempool {
    txs: Mutex<HashMap<String, Transaction>>,
}

fn claimed_outputs(txs: &HashMap<String, Transaction>) -> HashSet<OutPoint> {
    txs.values()
        .flat_map(|tx| tx.tx_ins.iter())
        .filter(|tx_in| !tx_in.is_coinbase())
        .map(|tx_in| tx_in.outpoint())
        .collect()
}

/// Pending transactions in a stable order: oldest first, ties by id.
fn ordered(txs: &HashMap<String, Transaction>) -> Vec<Transaction> {
    let mut list: Vec<Transaction> = txs.values().cloned().collect();
    list.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    list
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a signed spend from `wallet` and admits it. A rejected spend
    /// leaves the pool untouched.
    pub fn add_tx(
        &self,
        chain: &Blockchain,
        wallet: &Wallet,
        to: &str,
        amount: u64,
    ) -> Result<Transaction> {
        let mut txs = self.txs.lock();
        let pending = claimed_outputs(&txs);
        let tx = make_spend_tx(chain, wallet, to, amount, &pending)?;
        txs.insert(tx.id.clone(), tx.clone());
        info!(tx_id = %tx.id, to = %to, amount, "mempool.tx_added");
        Ok(tx)
    }

    /// Stores a transaction received from a peer as-is.
    pub fn add_peer_tx(&self, tx: Transaction) {
        debug!(tx_id = %tx.id, "mempool.peer_tx_added");
        self.txs.lock().insert(tx.id.clone(), tx);
    }

    /// Drains every pending transaction and appends a reward for
    /// `miner_address`. The pool is empty afterwards.
    pub fn confirm_txs(&self, miner_address: &str) -> Vec<Transaction> {
        let mut txs = self.txs.lock();
        let mut confirmed = ordered(&txs);
        txs.clear();
        confirmed.push(make_coinbase_tx(miner_address));
        confirmed
    }

    /// True when a pending transaction already spends `output`.
    pub fn is_on_mempool(&self, output: &UTxOut) -> bool {
        let outpoint = output.outpoint();
        self.txs.lock().values().any(|tx| tx.spends(&outpoint))
    }

    /// Outputs claimed by pending transactions.
    pub fn claimed(&self) -> HashSet<OutPoint> {
        claimed_outputs(&self.txs.lock())
    }

    /// Puts back the spends of a block that was never committed. Rewards
    /// are skipped since the next block mints its own.
    pub fn restore(&self, txs: &[Transaction]) -> usize {
        let mut pool = self.txs.lock();
        let mut restored = 0;
        for tx in txs.iter().filter(|tx| !tx.is_coinbase()) {
            pool.insert(tx.id.clone(), tx.clone());
            restored += 1;
        }
        restored
    }

    /// Drops any pending transaction whose id appears in `confirmed`.
    pub fn remove_confirmed(&self, confirmed: &[Transaction]) -> usize {
        let mut txs = self.txs.lock();
        let before = txs.len();
        for tx in confirmed {
            txs.remove(&tx.id);
        }
        before - txs.len()
    }

    pub fn get_transaction(&self, id: &str) -> Option<Transaction> {
        self.txs.lock().get(id).cloned()
    }

    pub fn get_all_transactions(&self) -> Vec<Transaction> {
        ordered(&self.txs.lock())
    }

    pub fn len(&self) -> usize {
        self.txs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.lock().is_empty()
    }
}
