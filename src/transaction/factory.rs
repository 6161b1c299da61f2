//! Builds reward and spend transactions.

use super::types::{
    OutPoint, Transaction, TxIn, TxOut, COINBASE_INDEX, COINBASE_SENTINEL,
};
use crate::blockchain::Blockchain;
use crate::error::{ChainError, Result};
use crate::wallet::Wallet;
use std::collections::HashSet;

/// Amount minted to the miner of every block.
pub const MINER_REWARD: u64 = 50;

/// Reward transaction paying [`MINER_REWARD`] to `address`. It is never signed.
///
/// The sentinel input references no real output, so its source id carries a
/// random extra nonce that keeps two rewards to one miner in the same second
/// from sharing an id.
pub fn make_coinbase_tx(address: &str) -> Transaction {
    let tx_ins = vec![TxIn {
        tx_id: hex::encode(rand::random::<[u8; 8]>()),
        index: COINBASE_INDEX,
        signature: COINBASE_SENTINEL.to_string(),
    }];
    let tx_outs = vec![TxOut {
        address: address.to_string(),
        amount: MINER_REWARD,
    }];
    Transaction::new(chrono::Utc::now().timestamp(), tx_ins, tx_outs)
}

/// Builds, signs and validates a transfer of `amount` from `from` to `to`.
///
/// Outputs in `pending` are already claimed by unconfirmed transactions and
/// are neither counted towards the balance nor selected as inputs.
pub fn make_spend_tx(
    chain: &Blockchain,
    from: &Wallet,
    to: &str,
    amount: u64,
    pending: &HashSet<OutPoint>,
) -> Result<Transaction> {
    if amount == 0 {
        return Err(ChainError::InvalidTransaction(
            "Amount must be greater than zero".to_string(),
        ));
    }

    let unspent = chain.unspent_outputs(&from.address, pending)?;
    let balance = unspent
        .iter()
        .try_fold(0u64, |total, u| total.checked_add(u.amount))
        .ok_or_else(|| {
            ChainError::InvalidTransaction(format!(
                "Unspent outputs of {} overflow",
                from.address
            ))
        })?;
    if balance < amount {
        return Err(ChainError::InsufficientFunds {
            available: balance,
            requested: amount,
        });
    }

    let mut tx_ins = Vec::new();
    let mut total = 0u64;
    for output in &unspent {
        if total >= amount {
            break;
        }
        tx_ins.push(TxIn {
            tx_id: output.tx_id.clone(),
            index: output.index,
            signature: String::new(),
        });
        // Never past `balance`, which fit in a u64
        total += output.amount;
    }

    let mut tx_outs = Vec::new();
    let change = total - amount;
    if change > 0 {
        tx_outs.push(TxOut {
            address: from.address.clone(),
            amount: change,
        });
    }
    tx_outs.push(TxOut {
        address: to.to_string(),
        amount,
    });

    let mut tx = Transaction::new(chrono::Utc::now().timestamp(), tx_ins, tx_outs);
    sign(&mut tx, from)?;
    tx.validate(chain)?;
    Ok(tx)
}

/// Every input carries the same signature over the transaction id.
fn sign(tx: &mut Transaction, wallet: &Wallet) -> Result<()> {
    let signature = wallet.sign(&tx.id)?;
    for tx_in in &mut tx.tx_ins {
        tx_in.signature = signature.clone();
    }
    Ok(())
}
