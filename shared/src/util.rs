//! Shared helpers

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Current wall-clock time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Fresh opaque id, used for orders, ledger references and outbox
/// message ids.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
