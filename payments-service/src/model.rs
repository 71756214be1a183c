//! Ledger domain model
//!
//! Accounts and their immutable ledger entries, plus the outbox/inbox
//! bookkeeping records. Amounts are `Decimal` throughout; an account
//! balance is always reconstructible as the sum of its signed entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One account per owner, keyed by the owner id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = shared::now();
        Self {
            user_id: user_id.into(),
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Deposit,
    Withdrawal,
}

/// Immutable ledger entry. `reference_id` correlates the entry to the
/// operation that caused it (order id for withdrawals, `topup-{uuid}` for
/// deposits).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: u64,
    pub user_id: String,
    pub reference_id: String,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Amount with the sign of its effect on the balance.
    pub fn signed_amount(&self) -> Decimal {
        match self.kind {
            EntryKind::Deposit => self.amount,
            EntryKind::Withdrawal => -self.amount,
        }
    }
}

/// Outbound message awaiting publication, written in the same transaction
/// as the mutation that caused it. `processed_at` is stamped by the outbox
/// publisher once the broker accepted the publish; rows are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub seq: u64,
    pub message_id: String,
    pub kind: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Processed-message marker keyed by the incoming message id. Presence of
/// `processed_at` means the effect was already applied and a redelivery
/// must only be acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxRecord {
    pub message_id: String,
    pub kind: String,
    pub payload: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}
