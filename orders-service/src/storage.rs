//! Order persistence (redb)
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | order id | `Order` JSON | order rows |
//! | `user_orders` | (owner id, order id) | () | owner lookup index |
//! | `outbox` | seq | `OutboxRecord` JSON | outbound messages awaiting publish |
//! | `inbox` | message id | `InboxRecord` JSON | processed-message markers |
//! | `counters` | name | u64 | monotonic sequences |
//!
//! The caller owns the `WriteTransaction` for any mutation that must be
//! atomic with its bookkeeping; methods here only open tables inside it.

use std::path::Path;
use std::sync::Arc;

use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use thiserror::Error;

use crate::model::{InboxRecord, Order, OutboxRecord};

const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");
const USER_ORDERS_TABLE: TableDefinition<(&str, &str), ()> = TableDefinition::new("user_orders");
const OUTBOX_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("outbox");
const INBOX_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("inbox");
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

const OUTBOX_SEQ: &str = "outbox";

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

/// Order store. Cheap to clone; all clones share one database.
#[derive(Debug, Clone)]
pub struct OrderStorage {
    db: Arc<Database>,
}

impl OrderStorage {
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
            let _ = txn.open_table(ORDERS_TABLE)?;
            let _ = txn.open_table(USER_ORDERS_TABLE)?;
            let _ = txn.open_table(OUTBOX_TABLE)?;
            let _ = txn.open_table(INBOX_TABLE)?;
            let mut counters = txn.open_table(COUNTERS_TABLE)?;
            if counters.get(OUTBOX_SEQ)?.is_none() {
                counters.insert(OUTBOX_SEQ, 0)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    pub fn commit(&self, txn: WriteTransaction) -> StorageResult<()> {
        Ok(txn.commit()?)
    }

    // ========== orders ==========

    /// Insert a new order and its owner-index row.
    pub fn insert_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        {
            let mut table = txn.open_table(ORDERS_TABLE)?;
            table.insert(order.id.as_str(), serde_json::to_vec(order)?.as_slice())?;
        }
        let mut index = txn.open_table(USER_ORDERS_TABLE)?;
        index.insert((order.user_id.as_str(), order.id.as_str()), ())?;
        Ok(())
    }

    /// Overwrite an existing order row. The owner index is untouched.
    pub fn put_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        table.insert(order.id.as_str(), serde_json::to_vec(order)?.as_slice())?;
        Ok(())
    }

    pub fn get_order(&self, order_id: &str) -> StorageResult<Option<Order>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(ORDERS_TABLE)?;
        let Some(guard) = table.get(order_id)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(guard.value())?))
    }

    /// Read an order inside a write transaction (read-your-writes).
    pub fn get_order_txn(
        &self,
        txn: &WriteTransaction,
        order_id: &str,
    ) -> StorageResult<Option<Order>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        let Some(guard) = table.get(order_id)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(guard.value())?))
    }

    /// All orders of one owner, newest first.
    pub fn get_user_orders(&self, user_id: &str) -> StorageResult<Vec<Order>> {
        let read = self.db.begin_read()?;
        let index = read.open_table(USER_ORDERS_TABLE)?;
        let orders_table = read.open_table(ORDERS_TABLE)?;
        let mut orders: Vec<Order> = Vec::new();
        for row in index.range((user_id, "")..)? {
            let (key, _) = row?;
            let (owner, order_id) = key.value();
            if owner != user_id {
                break;
            }
            if let Some(guard) = orders_table.get(order_id)? {
                orders.push(serde_json::from_slice(guard.value())?);
            }
        }
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
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
    use crate::model::OrderStatus;
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn order_created_at(user_id: &str, minutes_ago: i64) -> Order {
        let mut order = Order::new(user_id, Decimal::from(10), "item");
        order.created_at -= Duration::minutes(minutes_ago);
        order
    }

    #[test]
    fn order_roundtrip_including_status_update() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let mut order = Order::new("u1", Decimal::from(100), "a book");

        let txn = storage.begin_write().unwrap();
        storage.insert_order(&txn, &order).unwrap();
        storage.commit(txn).unwrap();
        assert_eq!(storage.get_order(&order.id).unwrap(), Some(order.clone()));

        order.status = OrderStatus::Finished;
        let txn = storage.begin_write().unwrap();
        storage.put_order(&txn, &order).unwrap();
        storage.commit(txn).unwrap();
        assert_eq!(
            storage.get_order(&order.id).unwrap().unwrap().status,
            OrderStatus::Finished
        );
    }

    #[test]
    fn user_orders_come_back_newest_first_and_per_owner() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let oldest = order_created_at("u1", 30);
        let newest = order_created_at("u1", 1);
        let other = order_created_at("u2", 5);

        let txn = storage.begin_write().unwrap();
        storage.insert_order(&txn, &oldest).unwrap();
        storage.insert_order(&txn, &newest).unwrap();
        storage.insert_order(&txn, &other).unwrap();
        storage.commit(txn).unwrap();

        let orders = storage.get_user_orders("u1").unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id, newest.id);
        assert_eq!(orders[1].id, oldest.id);
        assert!(storage.get_user_orders("u3").unwrap().is_empty());
    }

    #[test]
    fn dropping_a_transaction_rolls_back_order_and_outbox_together() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let order = Order::new("u1", Decimal::from(100), "a book");

        let txn = storage.begin_write().unwrap();
        storage.insert_order(&txn, &order).unwrap();
        storage
            .enqueue_outbox(&txn, "order-1", "Kind", "{}".to_string())
            .unwrap();
        drop(txn);

        assert_eq!(storage.get_order(&order.id).unwrap(), None);
        assert!(storage.get_user_orders("u1").unwrap().is_empty());
        assert!(storage.pending_outbox(10).unwrap().is_empty());
    }

    #[test]
    fn inbox_and_outbox_bookkeeping() {
        let storage = OrderStorage::open_in_memory().unwrap();

        let txn = storage.begin_write().unwrap();
        let seq = storage
            .enqueue_outbox(&txn, "m1", "Kind", "{}".to_string())
            .unwrap();
        storage
            .record_inbox(&txn, "in1", "Kind", "{}".to_string())
            .unwrap();
        storage.commit(txn).unwrap();

        assert!(storage.is_inbox_processed("in1").unwrap());
        assert_eq!(storage.mark_outbox_published(&[seq]).unwrap(), 1);
        assert!(storage.pending_outbox(10).unwrap().is_empty());
        assert_eq!(storage.all_outbox().unwrap().len(), 1);
    }
}
