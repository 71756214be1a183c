//! Checkout host process
//!
//! Runs both services in one binary: the order coordinator and the payment
//! ledger, wired over the embedded broker. The library part holds the
//! process plumbing (logging, background task supervision) so the
//! integration tests can reuse it.

pub mod logger;
pub mod tasks;

pub use logger::init_logger;
pub use tasks::{BackgroundTasks, TaskKind};
