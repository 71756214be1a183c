//! Broker connection settings

/// Default name of the queue carrying payment commands.
pub const DEFAULT_PAYMENT_REQUEST_QUEUE: &str = "payment-requests";
/// Default name of the queue carrying payment results.
pub const DEFAULT_PAYMENT_RESPONSE_QUEUE: &str = "payment-responses";

/// Connection parameters for the message broker, externally configured.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `BROKER_HOST` | `localhost` | Broker host |
/// | `BROKER_PORT` | `5672` | Broker port |
/// | `BROKER_USERNAME` | `guest` | Connection user |
/// | `BROKER_PASSWORD` | `guest` | Connection password |
/// | `BROKER_PAYMENT_REQUEST_QUEUE` | `payment-requests` | Payment command queue |
/// | `BROKER_PAYMENT_RESPONSE_QUEUE` | `payment-responses` | Payment result queue |
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub payment_request_queue: String,
    pub payment_response_queue: String,
}

impl BrokerSettings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("BROKER_HOST").unwrap_or(defaults.host),
            port: std::env::var("BROKER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            username: std::env::var("BROKER_USERNAME").unwrap_or(defaults.username),
            password: std::env::var("BROKER_PASSWORD").unwrap_or(defaults.password),
            payment_request_queue: std::env::var("BROKER_PAYMENT_REQUEST_QUEUE")
                .unwrap_or(defaults.payment_request_queue),
            payment_response_queue: std::env::var("BROKER_PAYMENT_RESPONSE_QUEUE")
                .unwrap_or(defaults.payment_response_queue),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            payment_request_queue: DEFAULT_PAYMENT_REQUEST_QUEUE.to_string(),
            payment_response_queue: DEFAULT_PAYMENT_RESPONSE_QUEUE.to_string(),
        }
    }
}
