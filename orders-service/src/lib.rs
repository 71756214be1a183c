//! Order coordinator service
//!
//! Owns orders. Creation writes the order row and a payment command into
//! the outbox in one transaction; results arrive over the payment response
//! queue and settle the order.
//!
//! ```text
//! create_order ──▶ OrderService ──▶ OutboxPublisher ──▶ payment-requests
//!                   one transaction:
//!                   order row + outbox row
//!
//! payment-responses ──▶ ResultConsumer ──▶ OrderService ──▶ OrderNotifier
//!                                           one transaction:
//!                                           status + inbox marker
//! ```

pub mod api;
pub mod config;
pub mod consumer;
pub mod error;
pub mod model;
pub mod notify;
pub mod outbox;
pub mod service;
pub mod storage;

// Re-exports
pub use config::Config;
pub use consumer::ResultConsumer;
pub use error::{AppError, AppResult};
pub use model::{InboxRecord, Order, OrderStatus, OutboxRecord};
pub use notify::OrderNotifier;
pub use outbox::OutboxPublisher;
pub use service::{ApplyOutcome, OrderService};
pub use storage::{OrderStorage, StorageError, StorageResult};
