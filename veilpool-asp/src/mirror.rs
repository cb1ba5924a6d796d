//! Durable mirror of the approved-label set.
//!
//! The mirror is split into two deliberately distinct capabilities:
//!
//! - [`MembershipCache`]: fast, unordered, eventually consistent. Backs
//!   membership checks and crash-recovery bookkeeping only.
//! - [`OrderedRebuildSource`]: slow, authoritative, ordered. The only
//!   legitimate input for tree construction.
//!
//! The tree's root depends on insertion order and the mirror stores an
//! unordered set, so [`OrderedRebuildSource`] is implemented for indexer
//! clients only. There is no path from the mirror to a tree.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::{debug, info};
use veilpool_common::{felt_to_hex, DepositEvent, Felt, IndexerApi, IndexerError, Page};

use crate::error::AspError;

/// Fast unordered membership view of the approved-label set.
pub trait MembershipCache: Send + Sync {
    fn contains_label(&self, pool: &str, label: Felt) -> Result<bool, AspError>;
    fn insert_label(&self, pool: &str, label: Felt) -> Result<(), AspError>;
    /// Atomically replace the whole label set and the last processed block.
    fn replace_labels(&self, pool: &str, labels: &[Felt], last_block: u64) -> Result<(), AspError>;
    fn label_count(&self, pool: &str) -> Result<u64, AspError>;
    fn last_processed_block(&self, pool: &str) -> Result<u64, AspError>;
    fn set_last_processed_block(&self, pool: &str, block: u64) -> Result<(), AspError>;
}

/// Authoritative, ordered deposit replay. Tree rebuilds must come from here.
#[async_trait]
pub trait OrderedRebuildSource: Send + Sync {
    /// Every deposit for the pool, ascending by `(blockNumber, logIndex)`.
    async fn deposits_in_order(
        &self,
        pool: &str,
        chain_id: u64,
        page_size: u32,
    ) -> Result<Vec<DepositEvent>, IndexerError>;
}

#[async_trait]
impl<T: IndexerApi + ?Sized> OrderedRebuildSource for T {
    async fn deposits_in_order(
        &self,
        pool: &str,
        chain_id: u64,
        page_size: u32,
    ) -> Result<Vec<DepositEvent>, IndexerError> {
        let mut all = Vec::new();
        let mut offset = 0u64;
        loop {
            let Page { data, has_more } = self
                .list_deposits(pool, chain_id, page_size, offset)
                .await?;
            let fetched = data.len() as u64;
            all.extend(data);
            if !has_more || fetched == 0 {
                break;
            }
            offset += fetched;
        }
        debug!(deposits = all.len(), pool, "ordered deposit replay complete");
        Ok(all)
    }
}

/// SQLite-backed [`MembershipCache`].
pub struct SqliteMirror {
    conn: Mutex<Connection>,
}

impl SqliteMirror {
    /// Open or create a mirror database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AspError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| AspError::Mirror(format!("mirror open failed: {e}")))?;
        Self::init_schema(&conn)?;
        info!("Opened ASP mirror at {:?}", path.as_ref());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory mirror (for testing).
    pub fn in_memory() -> Result<Self, AspError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AspError::Mirror(format!("in-memory mirror failed: {e}")))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), AspError> {
        conn.execute_batch(
            r#"
            -- Approved labels, keyed by pool. Unordered by design: only
            -- membership checks read this table.
            CREATE TABLE IF NOT EXISTS asp_labels (
                pool TEXT NOT NULL,
                label TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                PRIMARY KEY (pool, label)
            );

            -- Last processed block per pool.
            CREATE TABLE IF NOT EXISTS asp_sync (
                pool TEXT PRIMARY KEY,
                last_block INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .map_err(|e| AspError::Mirror(format!("schema init failed: {e}")))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AspError> {
        self.conn
            .lock()
            .map_err(|_| AspError::Mirror("mirror connection lock poisoned".into()))
    }
}

impl MembershipCache for SqliteMirror {
    fn contains_label(&self, pool: &str, label: Felt) -> Result<bool, AspError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM asp_labels WHERE pool = ? AND label = ?",
                params![pool, felt_to_hex(&label)],
                |row| row.get(0),
            )
            .map_err(|e| AspError::Mirror(format!("membership query failed: {e}")))?;
        Ok(count > 0)
    }

    fn insert_label(&self, pool: &str, label: Felt) -> Result<(), AspError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO asp_labels (pool, label) VALUES (?, ?)",
            params![pool, felt_to_hex(&label)],
        )
        .map_err(|e| AspError::Mirror(format!("label insert failed: {e}")))?;
        Ok(())
    }

    fn replace_labels(&self, pool: &str, labels: &[Felt], last_block: u64) -> Result<(), AspError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| AspError::Mirror(format!("mirror transaction failed: {e}")))?;
        tx.execute("DELETE FROM asp_labels WHERE pool = ?", params![pool])
            .map_err(|e| AspError::Mirror(format!("label clear failed: {e}")))?;
        for label in labels {
            tx.execute(
                "INSERT OR IGNORE INTO asp_labels (pool, label) VALUES (?, ?)",
                params![pool, felt_to_hex(label)],
            )
            .map_err(|e| AspError::Mirror(format!("label insert failed: {e}")))?;
        }
        tx.execute(
            "INSERT INTO asp_sync (pool, last_block) VALUES (?, ?)
             ON CONFLICT(pool) DO UPDATE SET last_block = excluded.last_block",
            params![pool, last_block as i64],
        )
        .map_err(|e| AspError::Mirror(format!("sync update failed: {e}")))?;
        tx.commit()
            .map_err(|e| AspError::Mirror(format!("mirror commit failed: {e}")))?;
        debug!(labels = labels.len(), last_block, pool, "mirror replaced");
        Ok(())
    }

    fn label_count(&self, pool: &str) -> Result<u64, AspError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM asp_labels WHERE pool = ?",
                params![pool],
                |row| row.get(0),
            )
            .map_err(|e| AspError::Mirror(format!("label count failed: {e}")))?;
        Ok(count as u64)
    }

    fn last_processed_block(&self, pool: &str) -> Result<u64, AspError> {
        let conn = self.lock()?;
        let block: Option<i64> = conn
            .query_row(
                "SELECT last_block FROM asp_sync WHERE pool = ?",
                params![pool],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(AspError::Mirror(format!("sync query failed: {other}"))),
            })?;
        Ok(block.unwrap_or(0) as u64)
    }

    fn set_last_processed_block(&self, pool: &str, block: u64) -> Result<(), AspError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO asp_sync (pool, last_block) VALUES (?, ?)
             ON CONFLICT(pool) DO UPDATE SET last_block = excluded.last_block",
            params![pool, block as i64],
        )
        .map_err(|e| AspError::Mirror(format!("sync update failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_round_trip() {
        let mirror = SqliteMirror::in_memory().unwrap();
        let label = Felt::from(42u64);

        assert!(!mirror.contains_label("pool-a", label).unwrap());
        mirror.insert_label("pool-a", label).unwrap();
        assert!(mirror.contains_label("pool-a", label).unwrap());
        // Pools are independent namespaces.
        assert!(!mirror.contains_label("pool-b", label).unwrap());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mirror = SqliteMirror::in_memory().unwrap();
        let label = Felt::from(7u64);
        mirror.insert_label("pool", label).unwrap();
        mirror.insert_label("pool", label).unwrap();
        assert_eq!(mirror.label_count("pool").unwrap(), 1);
    }

    #[test]
    fn test_replace_clears_previous_contents() {
        let mirror = SqliteMirror::in_memory().unwrap();
        mirror.insert_label("pool", Felt::from(1u64)).unwrap();
        mirror.insert_label("pool", Felt::from(2u64)).unwrap();

        mirror
            .replace_labels("pool", &[Felt::from(9u64)], 500)
            .unwrap();

        assert_eq!(mirror.label_count("pool").unwrap(), 1);
        assert!(!mirror.contains_label("pool", Felt::from(1u64)).unwrap());
        assert!(mirror.contains_label("pool", Felt::from(9u64)).unwrap());
        assert_eq!(mirror.last_processed_block("pool").unwrap(), 500);
    }

    #[test]
    fn test_last_block_defaults_to_zero() {
        let mirror = SqliteMirror::in_memory().unwrap();
        assert_eq!(mirror.last_processed_block("pool").unwrap(), 0);
        mirror.set_last_processed_block("pool", 123).unwrap();
        assert_eq!(mirror.last_processed_block("pool").unwrap(), 123);
    }
}
