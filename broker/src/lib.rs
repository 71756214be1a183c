//! Durable-queue message broker
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Broker                           │
//! │  ┌──────────────────┐      ┌─────────────────────────┐  │
//! │  │ queues: DashMap  │      │ connections: DashMap    │  │
//! │  │ name -> Queue    │      │ id -> CancellationToken │  │
//! │  └──────────────────┘      └─────────────────────────┘  │
//! └───────────────┬─────────────────────────────────────────┘
//!                 │ connect(settings)      credential check
//!                 ▼
//!            Connection ── declare_queue / publish / consume
//!                 │
//!                 ▼
//!             Consumer ──── recv / ack / nack(requeue)
//! ```
//!
//! # Delivery semantics
//!
//! At-least-once with manual acknowledgment. A received delivery stays
//! unacknowledged until `ack`; `nack(requeue = true)` and dropped consumers
//! put it back at the queue head with the `redelivered` flag set. Queue
//! contents survive connection loss (`disconnect_all`), so publishers and
//! consumers reconnect and pick up where they left off.

pub mod error;
pub mod hub;
pub mod settings;

// Re-exports
pub use error::{BrokerError, BrokerResult};
pub use hub::{Broker, Connection, Consumer, Delivery, QueueDepth, QueueOptions};
pub use settings::BrokerSettings;
