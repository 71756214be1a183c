//! Ledger persistence (redb)
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `accounts` | owner id | `Account` JSON | one account per owner |
//! | `ledger` | (owner id, entry id) | `LedgerEntry` JSON | immutable entry history |
//! | `outbox` | seq | `OutboxRecord` JSON | outbound messages awaiting publish |
//! | `inbox` | message id | `InboxRecord` JSON | processed-message markers |
//! | `counters` | name | u64 | monotonic sequences |
//!
//! Writes that must be atomic (mutation + inbox marker + outbox row) share
//! one `WriteTransaction` owned by the caller; methods here open their
//! tables inside it and the caller commits once.

use std::path::Path;
use std::sync::Arc;

use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::model::{Account, EntryKind, InboxRecord, LedgerEntry, OutboxRecord};

const ACCOUNTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");
const LEDGER_TABLE: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("ledger");
const OUTBOX_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("outbox");
const INBOX_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("inbox");
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

const OUTBOX_SEQ: &str = "outbox";
const LEDGER_SEQ: &str = "ledger";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Ledger store. Cheap to clone; all clones share one database.
#[derive(Debug, Clone)]
pub struct LedgerStorage {
    db: Arc<Database>,
}

impl LedgerStorage {
    /// Open (or create) the database file and initialize tables.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    /// In-memory database for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    fn init_tables(&self) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let _ = txn.open_table(ACCOUNTS_TABLE)?;
            let _ = txn.open_table(LEDGER_TABLE)?;
            let _ = txn.open_table(OUTBOX_TABLE)?;
            let _ = txn.open_table(INBOX_TABLE)?;
            let mut counters = txn.open_table(COUNTERS_TABLE)?;
            if counters.get(OUTBOX_SEQ)?.is_none() {
                counters.insert(OUTBOX_SEQ, 0)?;
            }
            if counters.get(LEDGER_SEQ)?.is_none() {
                counters.insert(LEDGER_SEQ, 0)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Begin a write transaction. The caller owns it and commits through
    /// [`commit`](Self::commit); dropping it without committing rolls back.
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    pub fn commit(&self, txn: WriteTransaction) -> StorageResult<()> {
        Ok(txn.commit()?)
    }

    // ========== accounts ==========

    pub fn put_account(&self, txn: &WriteTransaction, account: &Account) -> StorageResult<()> {
        let mut table = txn.open_table(ACCOUNTS_TABLE)?;
        table.insert(account.user_id.as_str(), serde_json::to_vec(account)?.as_slice())?;
        Ok(())
    }

    pub fn get_account(&self, user_id: &str) -> StorageResult<Option<Account>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(ACCOUNTS_TABLE)?;
        let Some(guard) = table.get(user_id)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(guard.value())?))
    }

    /// Read an account inside a write transaction (read-your-writes).
    pub fn get_account_txn(
        &self,
        txn: &WriteTransaction,
        user_id: &str,
    ) -> StorageResult<Option<Account>> {
        let table = txn.open_table(ACCOUNTS_TABLE)?;
        let Some(guard) = table.get(user_id)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(guard.value())?))
    }

    // ========== ledger entries ==========

    /// Append an immutable entry, assigning it the next ledger sequence.
    pub fn append_entry(
        &self,
        txn: &WriteTransaction,
        user_id: &str,
        reference_id: &str,
        kind: EntryKind,
        amount: Decimal,
    ) -> StorageResult<LedgerEntry> {
        let id = self.next_seq(txn, LEDGER_SEQ)?;
        let entry = LedgerEntry {
            id,
            user_id: user_id.to_string(),
            reference_id: reference_id.to_string(),
            kind,
            amount,
            created_at: shared::now(),
        };
        let mut table = txn.open_table(LEDGER_TABLE)?;
        table.insert((user_id, id), serde_json::to_vec(&entry)?.as_slice())?;
        Ok(entry)
    }

    /// All entries of one account, oldest first.
    pub fn get_entries(&self, user_id: &str) -> StorageResult<Vec<LedgerEntry>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(LEDGER_TABLE)?;
        let mut entries = Vec::new();
        for row in table.range((user_id, 0)..=(user_id, u64::MAX))? {
            let (_, value) = row?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    // ========== outbox ==========

    /// Append an unpublished outbox row, assigning the next sequence.
    pub fn enqueue_outbox(
        &self,
        txn: &WriteTransaction,
        message_id: &str,
        kind: &str,
        payload: String,
    ) -> StorageResult<u64> {
        let seq = self.next_seq(txn, OUTBOX_SEQ)?;
        let record = OutboxRecord {
            seq,
            message_id: message_id.to_string(),
            kind: kind.to_string(),
            payload,
            created_at: shared::now(),
            processed_at: None,
        };
        let mut table = txn.open_table(OUTBOX_TABLE)?;
        table.insert(seq, serde_json::to_vec(&record)?.as_slice())?;
        Ok(seq)
    }

    /// Up to `limit` unpublished rows in insertion order.
    pub fn pending_outbox(&self, limit: usize) -> StorageResult<Vec<OutboxRecord>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(OUTBOX_TABLE)?;
        let mut pending = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            let record: OutboxRecord = serde_json::from_slice(value.value())?;
            if record.processed_at.is_none() {
                pending.push(record);
                if pending.len() >= limit {
                    break;
                }
            }
        }
        Ok(pending)
    }

    /// Stamp the given rows as published. Returns the number updated.
    pub fn mark_outbox_published(&self, seqs: &[u64]) -> StorageResult<usize> {
        let txn = self.db.begin_write()?;
        let mut marked = 0;
        {
            let mut table = txn.open_table(OUTBOX_TABLE)?;
            for &seq in seqs {
                let Some(bytes) = table.get(seq)?.map(|g| g.value().to_vec()) else {
                    continue;
                };
                let mut record: OutboxRecord = serde_json::from_slice(&bytes)?;
                record.processed_at = Some(shared::now());
                table.insert(seq, serde_json::to_vec(&record)?.as_slice())?;
                marked += 1;
            }
        }
        txn.commit()?;
        Ok(marked)
    }

    /// Full outbox history in insertion order, including published rows.
    pub fn all_outbox(&self) -> StorageResult<Vec<OutboxRecord>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(OUTBOX_TABLE)?;
        let mut records = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }

    // ========== inbox ==========

    pub fn is_inbox_processed(&self, message_id: &str) -> StorageResult<bool> {
        let read = self.db.begin_read()?;
        let table = read.open_table(INBOX_TABLE)?;
        let Some(guard) = table.get(message_id)? else {
            return Ok(false);
        };
        let record: InboxRecord = serde_json::from_slice(guard.value())?;
        Ok(record.processed_at.is_some())
    }

    /// Same check inside a write transaction, for the serialized re-check
    /// before applying an effect.
    pub fn is_inbox_processed_txn(
        &self,
        txn: &WriteTransaction,
        message_id: &str,
    ) -> StorageResult<bool> {
        let table = txn.open_table(INBOX_TABLE)?;
        let Some(guard) = table.get(message_id)? else {
            return Ok(false);
        };
        let record: InboxRecord = serde_json::from_slice(guard.value())?;
        Ok(record.processed_at.is_some())
    }

    /// Record a message as processed, snapshotting its payload.
    pub fn record_inbox(
        &self,
        txn: &WriteTransaction,
        message_id: &str,
        kind: &str,
        payload: String,
    ) -> StorageResult<()> {
        let now = shared::now();
        let record = InboxRecord {
            message_id: message_id.to_string(),
            kind: kind.to_string(),
            payload,
            received_at: now,
            processed_at: Some(now),
        };
        let mut table = txn.open_table(INBOX_TABLE)?;
        table.insert(message_id, serde_json::to_vec(&record)?.as_slice())?;
        Ok(())
    }

    fn next_seq(&self, txn: &WriteTransaction, name: &str) -> StorageResult<u64> {
        let mut table = txn.open_table(COUNTERS_TABLE)?;
        let next = table.get(name)?.map(|g| g.value()).unwrap_or(0) + 1;
        table.insert(name, next)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_roundtrip() {
        let storage = LedgerStorage::open_in_memory().unwrap();
        let account = Account::new("u1");

        let txn = storage.begin_write().unwrap();
        storage.put_account(&txn, &account).unwrap();
        storage.commit(txn).unwrap();

        assert_eq!(storage.get_account("u1").unwrap(), Some(account));
        assert_eq!(storage.get_account("u2").unwrap(), None);
    }

    #[test]
    fn ledger_entries_stay_per_account_and_ordered() {
        let storage = LedgerStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage
            .append_entry(&txn, "u1", "r1", EntryKind::Deposit, Decimal::from(10))
            .unwrap();
        storage
            .append_entry(&txn, "u2", "r2", EntryKind::Deposit, Decimal::from(20))
            .unwrap();
        storage
            .append_entry(&txn, "u1", "r3", EntryKind::Withdrawal, Decimal::from(5))
            .unwrap();
        storage.commit(txn).unwrap();

        let entries = storage.get_entries("u1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].reference_id, "r1");
        assert_eq!(entries[1].reference_id, "r3");
        assert!(entries[0].id < entries[1].id);
    }

    #[test]
    fn pending_outbox_respects_order_limit_and_processed_flag() {
        let storage = LedgerStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        for i in 0..4 {
            storage
                .enqueue_outbox(&txn, &format!("m{i}"), "Kind", "{}".to_string())
                .unwrap();
        }
        storage.commit(txn).unwrap();

        let first_two: Vec<u64> = storage
            .pending_outbox(2)
            .unwrap()
            .iter()
            .map(|r| r.seq)
            .collect();
        storage.mark_outbox_published(&first_two).unwrap();

        let pending = storage.pending_outbox(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].message_id, "m2");
        assert_eq!(pending[1].message_id, "m3");
        assert!(pending.iter().all(|r| r.processed_at.is_none()));

        let all = storage.all_outbox().unwrap();
        assert_eq!(all.len(), 4);
        assert!(all[0].processed_at.is_some());
    }

    #[test]
    fn mark_outbox_published_skips_unknown_rows() {
        let storage = LedgerStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        let seq = storage
            .enqueue_outbox(&txn, "m1", "Kind", "{}".to_string())
            .unwrap();
        storage.commit(txn).unwrap();

        assert_eq!(storage.mark_outbox_published(&[seq, 999]).unwrap(), 1);
    }

    #[test]
    fn inbox_marker_flips_after_record() {
        let storage = LedgerStorage::open_in_memory().unwrap();
        assert!(!storage.is_inbox_processed("m1").unwrap());

        let txn = storage.begin_write().unwrap();
        assert!(!storage.is_inbox_processed_txn(&txn, "m1").unwrap());
        storage
            .record_inbox(&txn, "m1", "Kind", "{}".to_string())
            .unwrap();
        assert!(storage.is_inbox_processed_txn(&txn, "m1").unwrap());
        storage.commit(txn).unwrap();

        assert!(storage.is_inbox_processed("m1").unwrap());
    }

    #[test]
    fn dropping_a_transaction_rolls_back_every_write() {
        let storage = LedgerStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.put_account(&txn, &Account::new("u1")).unwrap();
        storage
            .enqueue_outbox(&txn, "m1", "Kind", "{}".to_string())
            .unwrap();
        storage
            .record_inbox(&txn, "in1", "Kind", "{}".to_string())
            .unwrap();
        drop(txn);

        assert_eq!(storage.get_account("u1").unwrap(), None);
        assert!(storage.pending_outbox(10).unwrap().is_empty());
        assert!(!storage.is_inbox_processed("in1").unwrap());
    }

    #[test]
    fn sequences_are_monotonic_across_transactions() {
        let storage = LedgerStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        let first = storage
            .enqueue_outbox(&txn, "m1", "Kind", "{}".to_string())
            .unwrap();
        storage.commit(txn).unwrap();

        let txn = storage.begin_write().unwrap();
        let second = storage
            .enqueue_outbox(&txn, "m2", "Kind", "{}".to_string())
            .unwrap();
        storage.commit(txn).unwrap();

        assert_eq!(second, first + 1);
    }
}
