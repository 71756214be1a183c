//! Payment ledger service
//!
//! Owns accounts and their transaction ledger. Commands arrive over the
//! payment request queue, results leave through the transactional outbox.
//!
//! ```text
//! payment-requests ──▶ CommandConsumer ──▶ AccountService
//!                                          │  one transaction:
//!                                          │  balance + ledger entry
//!                                          │  + inbox marker + outbox row
//!                                          ▼
//!                      OutboxPublisher ──▶ payment-responses
//! ```

pub mod api;
pub mod config;
pub mod consumer;
pub mod error;
pub mod model;
pub mod outbox;
pub mod service;
pub mod storage;

// Re-exports
pub use config::Config;
pub use consumer::CommandConsumer;
pub use error::{AppError, AppResult};
pub use model::{Account, EntryKind, InboxRecord, LedgerEntry, OutboxRecord};
pub use outbox::OutboxPublisher;
pub use service::{AccountService, PaymentOutcome};
pub use storage::{LedgerStorage, StorageError, StorageResult};
