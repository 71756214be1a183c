//! Service configuration
//!
//! Loaded from environment variables with sensible defaults:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PAYMENTS_DB_PATH` | `payments.redb` | Database file path |
//! | `PAYMENTS_HTTP_PORT` | `8081` | HTTP listen port |
//! | `PAYMENTS_OUTBOX_POLL_MS` | `5000` | Outbox polling interval |
//! | `PAYMENTS_OUTBOX_BATCH` | `10` | Max rows published per cycle |
//!
//! Broker settings come from the `BROKER_*` variables, see
//! [`BrokerSettings`].

use broker::BrokerSettings;

#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the redb database file.
    pub db_path: String,
    /// HTTP listen port.
    pub http_port: u16,
    /// Outbox polling interval in milliseconds.
    pub outbox_poll_ms: u64,
    /// Max outbox rows published per polling cycle.
    pub outbox_batch: usize,
    /// Broker connection settings.
    pub broker: BrokerSettings,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("PAYMENTS_DB_PATH")
                .unwrap_or_else(|_| "payments.redb".to_string()),
            http_port: std::env::var("PAYMENTS_HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8081),
            outbox_poll_ms: std::env::var("PAYMENTS_OUTBOX_POLL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000),
            outbox_batch: std::env::var("PAYMENTS_OUTBOX_BATCH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            broker: BrokerSettings::from_env(),
        }
    }

    /// Environment config with the location-sensitive fields overridden,
    /// used by tests.
    pub fn with_overrides(db_path: impl Into<String>, http_port: u16) -> Self {
        Self {
            db_path: db_path.into(),
            http_port,
            ..Self::from_env()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
