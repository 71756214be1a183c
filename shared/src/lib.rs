//! Wire contract shared by the order coordinator and the payment ledger
//!
//! The two services own their data exclusively; the message schema in
//! [`message`] is the only type-level contract between them.

pub mod message;
pub mod util;

// Re-exports
pub use message::{MessageError, PaymentProcessedEvent, ProcessPaymentCommand, WireMessage};
pub use util::{new_id, now};
