/// Transaction types for nomadcoin
use crate::crypto::sha256_hex;
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};

/// Signature placeholder carried by the single input of a reward transaction.
pub const COINBASE_SENTINEL: &str = "COINBASE";

/// Output index carried by the single input of a reward transaction.
pub const COINBASE_INDEX: i64 = -1;

/// Reference to one output of a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_id: String,
    pub index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub tx_id: String,
    pub index: i64,
    pub signature: String,
}

impl TxIn {
    pub fn is_coinbase(&self) -> bool {
        self.index == COINBASE_INDEX && self.signature == COINBASE_SENTINEL
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            tx_id: self.tx_id.clone(),
            index: self.index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub address: String,
    pub amount: u64,
}

/// An output that no input has consumed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UTxOut {
    pub tx_id: String,
    pub index: i64,
    pub amount: u64,
    pub address: String,
}

impl UTxOut {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            tx_id: self.tx_id.clone(),
            index: self.index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub timestamp: i64,
    pub tx_ins: Vec<TxIn>,
    pub tx_outs: Vec<TxOut>,
}

impl Transaction {
    /// Builds an unsigned transaction and stamps its content id.
    pub fn new(timestamp: i64, tx_ins: Vec<TxIn>, tx_outs: Vec<TxOut>) -> Self {
        let mut tx = Transaction {
            id: String::new(),
            timestamp,
            tx_ins,
            tx_outs,
        };
        tx.id = tx.calculate_id();
        tx
    }

    /// Content hash over timestamp, input references and outputs. The id
    /// itself and the input signatures are excluded, so signing does not
    /// change the id.
    pub fn calculate_id(&self) -> String {
        let mut content = Vec::new();
        content.extend_from_slice(&self.timestamp.to_le_bytes());
        for tx_in in &self.tx_ins {
            content.extend_from_slice(tx_in.tx_id.as_bytes());
            content.extend_from_slice(&tx_in.index.to_le_bytes());
        }
        for tx_out in &self.tx_outs {
            content.extend_from_slice(tx_out.address.as_bytes());
            content.extend_from_slice(&tx_out.amount.to_le_bytes());
        }
        sha256_hex(&content)
    }

    pub fn is_coinbase(&self) -> bool {
        self.tx_ins.len() == 1 && self.tx_ins[0].is_coinbase()
    }

    /// Sum of the output amounts. Amounts arrive from peers unchecked, so
    /// a sum past `u64::MAX` is an invalid transaction, not a panic.
    pub fn total_output(&self) -> Result<u64> {
        self.tx_outs
            .iter()
            .try_fold(0u64, |total, out| total.checked_add(out.amount))
            .ok_or_else(|| {
                ChainError::InvalidTransaction(format!(
                    "Outputs of transaction {} overflow",
                    self.id
                ))
            })
    }

    /// True when any input of this transaction consumes `outpoint`.
    pub fn spends(&self, outpoint: &OutPoint) -> bool {
        self.tx_ins
            .iter()
            .any(|tx_in| tx_in.tx_id == outpoint.tx_id && tx_in.index == outpoint.index)
    }

    /// True when the transaction pays to or spends from `address`. Spends are
    /// recognised through `owner_of`, which resolves an input's source output.
    pub fn involves<F>(&self, address: &str, owner_of: F) -> bool
    where
        F: Fn(&TxIn) -> Option<String>,
    {
        self.tx_outs.iter().any(|out| out.address == address)
            || self
                .tx_ins
                .iter()
                .filter(|tx_in| !tx_in.is_coinbase())
                .any(|tx_in| owner_of(tx_in).as_deref() == Some(address))
    }
}
