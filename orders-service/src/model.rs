//! Order domain model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order lifecycle. The only valid transitions are New to Finished and
/// New to Cancelled; Processing is a reserved intermediate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Processing,
    Finished,
    Cancelled,
}

impl OrderStatus {
    /// Terminal states accept no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub description: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(user_id: impl Into<String>, amount: Decimal, description: impl Into<String>) -> Self {
        let now = shared::now();
        Self {
            id: shared::new_id(),
            user_id: user_id.into(),
            amount,
            description: description.into(),
            status: OrderStatus::New,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outbound message awaiting publication. Written atomically with the
/// order mutation that caused it; never deleted once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub seq: u64,
    pub message_id: String,
    pub kind: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Processed-message marker for incoming payment results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxRecord {
    pub message_id: String,
    pub kind: String,
    pub payload: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_orders_start_in_the_new_state() {
        let order = Order::new("u1", Decimal::from(100), "a book");
        assert_eq!(order.status, OrderStatus::New);
        assert!(!order.status.is_terminal());
        assert_eq!(order.id.len(), 36);
    }

    #[test]
    fn finished_and_cancelled_are_terminal() {
        assert!(OrderStatus::Finished.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
    }
}
