//! Broker error types

use thiserror::Error;

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Error, PartialEq)]
pub enum BrokerError {
    #[error("access refused for user '{0}'")]
    AccessRefused(String),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("queue '{0}' is not declared")]
    UnknownQueue(String),

    #[error("queue '{0}' already declared with different options")]
    QueueMismatch(String),

    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),
}
