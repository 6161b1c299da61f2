//! Transaction module split into types, construction and validation

pub mod factory;
pub mod types;
pub mod validation;

pub use factory::{make_coinbase_tx, make_spend_tx, MINER_REWARD};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    fn input(tx_id: &str, index: i64) -> TxIn {
        TxIn {
            tx_id: tx_id.to_string(),
            index,
            signature: "sig".to_string(),
        }
    }

    fn output(address: &str, amount: u64) -> TxOut {
        TxOut {
            address: address.to_string(),
            amount,
        }
    }

    #[test]
    fn test_id_covers_content() {
        let tx = Transaction::new(10, vec![input("aa", 0)], vec![output("bob", 5)]);
        let other_amount = Transaction::new(10, vec![input("aa", 0)], vec![output("bob", 6)]);
        let other_time = Transaction::new(11, vec![input("aa", 0)], vec![output("bob", 5)]);

        assert_eq!(tx.id.len(), 64);
        assert_ne!(tx.id, other_amount.id);
        assert_ne!(tx.id, other_time.id);
    }

    #[test]
    fn test_id_ignores_signatures() {
        let mut tx = Transaction::new(10, vec![input("aa", 0)], vec![output("bob", 5)]);
        let id = tx.id.clone();
        tx.tx_ins[0].signature = "something else".to_string();
        assert_eq!(tx.calculate_id(), id);
    }

    #[test]
    fn test_spends_matches_exact_outpoint() {
        let tx = Transaction::new(10, vec![input("aa", 1)], vec![output("bob", 5)]);
        assert!(tx.spends(&OutPoint {
            tx_id: "aa".to_string(),
            index: 1
        }));
        assert!(!tx.spends(&OutPoint {
            tx_id: "aa".to_string(),
            index: 0
        }));
    }

    #[test]
    fn test_involves_outputs_and_resolved_inputs() {
        let tx = Transaction::new(10, vec![input("aa", 0)], vec![output("bob", 5)]);
        assert!(tx.involves("bob", |_| None));
        assert!(tx.involves("alice", |_| Some("alice".to_string())));
        assert!(!tx.involves("carol", |_| Some("alice".to_string())));

        let reward = make_coinbase_tx("miner");
        assert!(!reward.involves("alice", |_| Some("alice".to_string())));
    }
}
