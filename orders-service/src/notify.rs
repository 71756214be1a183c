//! Order update notifications
//!
//! Status changes fan out over a broadcast channel after the causing
//! transaction committed. Subscribers (the push gateway, tests) filter by
//! owner id themselves; delivery beyond the channel is someone else's
//! concern.

use tokio::sync::broadcast;
use tracing::debug;

use crate::model::Order;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct OrderNotifier {
    tx: broadcast::Sender<Order>,
}

impl OrderNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Order> {
        self.tx.subscribe()
    }

    /// Push an updated order to all subscribers. Lossy by design of the
    /// channel; having no subscribers is not an error.
    pub fn notify(&self, order: Order) {
        match self.tx.send(order) {
            Ok(subscribers) => debug!(subscribers, "order update delivered"),
            Err(_) => debug!("order update dropped, no subscribers"),
        }
    }
}

impl Default for OrderNotifier {
    fn default() -> Self {
        Self::new()
    }
}
