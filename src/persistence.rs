//! Database persistence layer for nomadcoin
//!
//! The ledger only ever talks to the store through [`Persistence`]: blocks
//! are opaque byte records keyed by their hash, and the chain head lives in
//! a single checkpoint record.

use crate::error::ChainError;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;

const CHECKPOINT_KEY: &str = "checkpoint";

/// Byte-keyed storage backend for blocks and the chain checkpoint.
pub trait Persistence: Send + Sync {
    fn find_block(&self, hash: &str) -> Result<Option<Vec<u8>>, ChainError>;
    fn save_block(&self, hash: &str, data: &[u8]) -> Result<(), ChainError>;
    fn save_checkpoint(&self, data: &[u8]) -> Result<(), ChainError>;
    fn load_checkpoint(&self) -> Result<Option<Vec<u8>>, ChainError>;
    fn delete_all_blocks(&self) -> Result<(), ChainError>;

    /// Swaps every stored block for `blocks` and writes `checkpoint`.
    /// Backends that can should do this atomically; the default does not.
    fn replace_chain(&self, blocks: &[(String, Vec<u8>)], checkpoint: &[u8]) -> Result<(), ChainError> {
        self.delete_all_blocks()?;
        for (hash, data) in blocks {
            self.save_block(hash, data)?;
        }
        self.save_checkpoint(checkpoint)
    }
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                hash TEXT PRIMARY KEY,
                data BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create blocks table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create metadata table: {}", e))
        })?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ChainError> {
        self.conn
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))
    }
}

impl Persistence for Database {
    fn find_block(&self, hash: &str) -> Result<Option<Vec<u8>>, ChainError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT data FROM blocks WHERE hash = ?1",
            params![hash],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("Failed to load block {}: {}", hash, e)))
    }

    fn save_block(&self, hash: &str, data: &[u8]) -> Result<(), ChainError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO blocks (hash, data) VALUES (?1, ?2)",
            params![hash, data],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save block: {}", e)))?;
        Ok(())
    }

    fn save_checkpoint(&self, data: &[u8]) -> Result<(), ChainError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![CHECKPOINT_KEY, data],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save checkpoint: {}", e)))?;
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Option<Vec<u8>>, ChainError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![CHECKPOINT_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("Failed to load checkpoint: {}", e)))
    }

    fn delete_all_blocks(&self) -> Result<(), ChainError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM blocks", [])
            .map_err(|e| ChainError::DatabaseError(format!("Failed to clear blocks: {}", e)))?;
        Ok(())
    }

    fn replace_chain(&self, blocks: &[(String, Vec<u8>)], checkpoint: &[u8]) -> Result<(), ChainError> {
        // One transaction, so a failed write leaves the old chain in place
        let conn_guard = self.conn()?;
        let tx = conn_guard.unchecked_transaction().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to start transaction: {}", e))
        })?;

        tx.execute("DELETE FROM blocks", [])
            .map_err(|e| ChainError::DatabaseError(format!("Failed to clear blocks: {}", e)))?;
        for (hash, data) in blocks {
            tx.execute(
                "INSERT OR REPLACE INTO blocks (hash, data) VALUES (?1, ?2)",
                params![hash, data],
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to save block: {}", e)))?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![CHECKPOINT_KEY, checkpoint],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save checkpoint: {}", e)))?;

        tx.commit().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryPersistence {
    blocks: Mutex<HashMap<String, Vec<u8>>>,
    checkpoint: Mutex<Option<Vec<u8>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.lock().map(|b| b.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> ChainError {
    ChainError::DatabaseError("Mutex poisoned".to_string())
}

impl Persistence for InMemoryPersistence {
    fn find_block(&self, hash: &str) -> Result<Option<Vec<u8>>, ChainError> {
        let blocks = self.blocks.lock().map_err(poisoned)?;
        Ok(blocks.get(hash).cloned())
    }

    fn save_block(&self, hash: &str, data: &[u8]) -> Result<(), ChainError> {
        let mut blocks = self.blocks.lock().map_err(poisoned)?;
        blocks.insert(hash.to_string(), data.to_vec());
        Ok(())
    }

    fn save_checkpoint(&self, data: &[u8]) -> Result<(), ChainError> {
        let mut checkpoint = self.checkpoint.lock().map_err(poisoned)?;
        *checkpoint = Some(data.to_vec());
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Option<Vec<u8>>, ChainError> {
        let checkpoint = self.checkpoint.lock().map_err(poisoned)?;
        Ok(checkpoint.clone())
    }

    fn delete_all_blocks(&self) -> Result<(), ChainError> {
        let mut blocks = self.blocks.lock().map_err(poisoned)?;
        blocks.clear();
        Ok(())
    }

    fn replace_chain(&self, blocks: &[(String, Vec<u8>)], checkpoint: &[u8]) -> Result<(), ChainError> {
        let mut stored = self.blocks.lock().map_err(poisoned)?;
        let mut head = self.checkpoint.lock().map_err(poisoned)?;
        *stored = blocks.iter().cloned().collect();
        *head = Some(checkpoint.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_store(store: &dyn Persistence) {
        assert_eq!(store.find_block("aa").unwrap(), None);
        assert_eq!(store.load_checkpoint().unwrap(), None);

        store.save_block("aa", b"first").unwrap();
        store.save_block("bb", b"second").unwrap();
        assert_eq!(store.find_block("aa").unwrap(), Some(b"first".to_vec()));

        store.save_checkpoint(b"head-1").unwrap();
        store.save_checkpoint(b"head-2").unwrap();
        assert_eq!(store.load_checkpoint().unwrap(), Some(b"head-2".to_vec()));

        store.delete_all_blocks().unwrap();
        assert_eq!(store.find_block("aa").unwrap(), None);
        assert_eq!(store.find_block("bb").unwrap(), None);
        // The checkpoint survives a block wipe.
        assert_eq!(store.load_checkpoint().unwrap(), Some(b"head-2".to_vec()));
    }

    #[test]
    fn test_database_open() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.conn.lock().unwrap().is_autocommit());
    }

    #[test]
    fn test_database_store_contract() {
        let db = Database::open(":memory:").unwrap();
        exercise_store(&db);
    }

    #[test]
    fn test_in_memory_store_contract() {
        let store = InMemoryPersistence::new();
        exercise_store(&store);
        assert_eq!(store.block_count(), 0);
    }

    fn exercise_replace(store: &dyn Persistence) {
        store.save_block("old", b"stale").unwrap();
        store.save_checkpoint(b"old-head").unwrap();

        let chain = vec![
            ("b2".to_string(), b"two".to_vec()),
            ("b1".to_string(), b"one".to_vec()),
        ];
        store.replace_chain(&chain, b"new-head").unwrap();

        assert_eq!(store.find_block("old").unwrap(), None);
        assert_eq!(store.find_block("b1").unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.find_block("b2").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.load_checkpoint().unwrap(), Some(b"new-head".to_vec()));
    }

    #[test]
    fn test_replace_chain() {
        exercise_replace(&Database::open(":memory:").unwrap());
        exercise_replace(&InMemoryPersistence::new());
    }

    #[test]
    fn test_failed_replace_keeps_old_chain() {
        let db = Database::open(":memory:").unwrap();
        db.save_block("old", b"stale").unwrap();
        db.save_checkpoint(b"old-head").unwrap();
        db.conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON blocks
                 WHEN NEW.hash = 'bad'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let chain = vec![
            ("good".to_string(), b"ok".to_vec()),
            ("bad".to_string(), b"boom".to_vec()),
        ];
        let err = db.replace_chain(&chain, b"new-head").unwrap_err();
        assert!(err.is_fatal());

        assert_eq!(db.find_block("old").unwrap(), Some(b"stale".to_vec()));
        assert_eq!(db.find_block("good").unwrap(), None);
        assert_eq!(db.load_checkpoint().unwrap(), Some(b"old-head".to_vec()));
    }

    #[test]
    fn test_database_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chain.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::open(path).unwrap();
            db.save_block("cafe", b"block").unwrap();
            db.save_checkpoint(b"head").unwrap();
        }

        let db = Database::open(path).unwrap();
        assert_eq!(db.find_block("cafe").unwrap(), Some(b"block".to_vec()));
        assert_eq!(db.load_checkpoint().unwrap(), Some(b"head".to_vec()));
    }
}
