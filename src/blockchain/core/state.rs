//! Derived ledger views: every query walks the stored chain from the head.

use crate::error::Result;
use crate::transaction::{OutPoint, Transaction, TxIn, UTxOut};
use std::collections::{HashMap, HashSet};

use super::chain::Blockchain;

impl Blockchain {
    /// All confirmed transactions, newest block first, in block order.
    pub fn txs(&self) -> Result<Vec<Transaction>> {
        Ok(self
            .blocks()?
            .into_iter()
            .flat_map(|block| block.transactions)
            .collect())
    }

    pub fn find_tx(&self, id: &str) -> Result<Option<Transaction>> {
        Ok(self.txs()?.into_iter().find(|tx| tx.id == id))
    }

    /// Unspent outputs owned by `address`, skipping anything in `pending`.
    pub(crate) fn unspent_outputs(
        &self,
        address: &str,
        pending: &HashSet<OutPoint>,
    ) -> Result<Vec<UTxOut>> {
        let txs = self.txs()?;

        let spent: HashSet<OutPoint> = txs
            .iter()
            .flat_map(|tx| tx.tx_ins.iter())
            .filter(|tx_in| !tx_in.is_coinbase())
            .map(TxIn::outpoint)
            .collect();

        let mut unspent = Vec::new();
        for tx in &txs {
            for (index, output) in tx.tx_outs.iter().enumerate() {
                if output.address != address {
                    continue;
                }
                let candidate = UTxOut {
                    tx_id: tx.id.clone(),
                    index: index as i64,
                    amount: output.amount,
                    address: output.address.clone(),
                };
                let outpoint = candidate.outpoint();
                if spent.contains(&outpoint) || pending.contains(&outpoint) {
                    continue;
                }
                unspent.push(candidate);
            }
        }
        Ok(unspent)
    }

    /// Spendable outputs of `address`: confirmed, unspent and not claimed by
    /// a pending transaction.
    pub fn utxouts_by_address(&self, address: &str) -> Result<Vec<UTxOut>> {
        let pending = self.mempool.claimed();
        self.unspent_outputs(address, &pending)
    }

    /// Total of [`Self::utxouts_by_address`], saturating at `u64::MAX`.
    pub fn balance_by_address(&self, address: &str) -> Result<u64> {
        Ok(self
            .utxouts_by_address(address)?
            .iter()
            .fold(0u64, |total, output| total.saturating_add(output.amount)))
    }

    /// Confirmed transactions that pay to or spend from `address`.
    pub fn tx_history(&self, address: &str) -> Result<Vec<Transaction>> {
        let txs = self.txs()?;
        let owners: HashMap<OutPoint, &str> = txs
            .iter()
            .flat_map(|tx| {
                tx.tx_outs.iter().enumerate().map(move |(index, output)| {
                    (
                        OutPoint {
                            tx_id: tx.id.clone(),
                            index: index as i64,
                        },
                        output.address.as_str(),
                    )
                })
            })
            .collect();

        Ok(txs
            .iter()
            .filter(|tx| {
                tx.involves(address, |tx_in| {
                    owners.get(&tx_in.outpoint()).map(|owner| owner.to_string())
                })
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::blockchain::{Block, Blockchain};
    use crate::mempool::Mempool;
    use crate::persistence::InMemoryPersistence;
    use crate::transaction::{make_coinbase_tx, Transaction, TxIn, TxOut, MINER_REWARD};
    use std::sync::Arc;

    fn chain() -> Blockchain {
        Blockchain::initialize(
            Arc::new(InMemoryPersistence::new()),
            Arc::new(Mempool::new()),
            "miner",
        )
        .unwrap()
    }

    fn spend(from_tx: &str, index: i64, outs: Vec<(&str, u64)>) -> Transaction {
        Transaction::new(
            5,
            vec![TxIn {
                tx_id: from_tx.to_string(),
                index,
                signature: "sig".to_string(),
            }],
            outs.into_iter()
                .map(|(address, amount)| TxOut {
                    address: address.to_string(),
                    amount,
                })
                .collect(),
        )
    }

    fn accept(chain: &Blockchain, hash: &str, txs: Vec<Transaction>) {
        let head = chain.head();
        let mut block = Block::new(head.height + 1, head.newest_hash, 2, txs);
        block.hash = hash.to_string();
        chain.add_peer_block(block).unwrap();
    }

    #[test]
    fn test_miner_balance_grows_with_blocks() {
        let chain = chain();
        assert_eq!(chain.balance_by_address("miner").unwrap(), MINER_REWARD);
        chain.add_block().unwrap();
        assert_eq!(chain.balance_by_address("miner").unwrap(), 2 * MINER_REWARD);
        assert_eq!(chain.utxouts_by_address("miner").unwrap().len(), 2);
        assert_eq!(chain.balance_by_address("nobody").unwrap(), 0);
    }

    #[test]
    fn test_spent_outputs_are_excluded() {
        let chain = chain();
        let reward = chain.txs().unwrap()[0].clone();
        let transfer = spend(&reward.id, 0, vec![("alice", 30), ("miner", 20)]);
        accept(&chain, "b2", vec![transfer.clone()]);

        let miner = chain.utxouts_by_address("miner").unwrap();
        assert_eq!(miner.len(), 1);
        assert_eq!(miner[0].tx_id, transfer.id);
        assert_eq!(miner[0].index, 1);
        assert_eq!(chain.balance_by_address("alice").unwrap(), 30);
    }

    #[test]
    fn test_pending_spends_hide_outputs() {
        let chain = chain();
        let reward = chain.txs().unwrap()[0].clone();
        chain
            .mempool()
            .add_peer_tx(spend(&reward.id, 0, vec![("alice", 50)]));

        assert!(chain.utxouts_by_address("miner").unwrap().is_empty());
        assert_eq!(chain.balance_by_address("miner").unwrap(), 0);
    }

    #[test]
    fn test_find_tx() {
        let chain = chain();
        let reward = chain.txs().unwrap()[0].clone();
        assert_eq!(chain.find_tx(&reward.id).unwrap(), Some(reward));
        assert_eq!(chain.find_tx("missing").unwrap(), None);
    }

    #[test]
    fn test_tx_history_includes_sends_and_receipts() {
        let chain = chain();
        let reward = chain.txs().unwrap()[0].clone();
        let transfer = spend(&reward.id, 0, vec![("alice", 50)]);
        let unrelated = make_coinbase_tx("carol");
        accept(&chain, "b2", vec![transfer.clone(), unrelated.clone()]);

        let miner_history = chain.tx_history("miner").unwrap();
        assert_eq!(miner_history, vec![transfer.clone(), reward]);

        let alice_history = chain.tx_history("alice").unwrap();
        assert_eq!(alice_history, vec![transfer]);

        assert_eq!(chain.tx_history("carol").unwrap(), vec![unrelated]);
    }
}
