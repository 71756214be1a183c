//! Queue hub, connections and consumers
//!
//! The hub owns every declared queue plus the registry of live connections.
//! Messages live in per-queue state behind a mutex; consumers are woken
//! through a `Notify` so `recv` suspends without polling.
//!
//! Unacknowledged deliveries are tracked per consumer. Dropping a consumer
//! without acknowledging returns its deliveries to the queue head with the
//! `redelivered` flag set, which is what makes crash-then-redeliver
//! scenarios observable downstream.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{DashMap, Entry};
use parking_lot::Mutex;
use shared::WireMessage;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::settings::BrokerSettings;

/// Declaration options for a named queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// One received message, pending acknowledgment.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub message: WireMessage,
}

/// Ready/unacknowledged counts for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDepth {
    pub ready: usize,
    pub unacked: usize,
}

#[derive(Debug)]
struct QueuedMessage {
    message: WireMessage,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<QueuedMessage>,
    /// delivery tag -> (consumer id, message)
    unacked: HashMap<u64, (u64, WireMessage)>,
    next_tag: u64,
}

#[derive(Debug)]
struct Queue {
    name: String,
    options: QueueOptions,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Queue {
    fn new(name: &str, options: QueueOptions) -> Self {
        Self {
            name: name.to_string(),
            options,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn push(&self, message: WireMessage) {
        let mut state = self.state.lock();
        state.ready.push_back(QueuedMessage {
            message,
            redelivered: false,
        });
        drop(state);
        self.notify.notify_one();
    }

    /// Return every unacknowledged delivery of one consumer to the queue
    /// head, earliest tag frontmost.
    fn requeue_consumer(&self, consumer_id: u64) -> usize {
        let mut state = self.state.lock();
        let mut tags: Vec<u64> = state
            .unacked
            .iter()
            .filter(|(_, (owner, _))| *owner == consumer_id)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable_by(|a, b| b.cmp(a));
        let count = tags.len();
        for tag in tags {
            if let Some((_, message)) = state.unacked.remove(&tag) {
                state.ready.push_front(QueuedMessage {
                    message,
                    redelivered: true,
                });
            }
        }
        drop(state);
        if count > 0 {
            self.notify.notify_one();
        }
        count
    }

    fn depth(&self) -> QueueDepth {
        let state = self.state.lock();
        QueueDepth {
            ready: state.ready.len(),
            unacked: state.unacked.len(),
        }
    }
}

#[derive(Debug)]
struct HubInner {
    host: String,
    port: u16,
    username: String,
    password: String,
    queues: DashMap<String, Arc<Queue>>,
    connections: DashMap<u64, CancellationToken>,
    next_connection_id: AtomicU64,
    next_consumer_id: AtomicU64,
}

/// The broker endpoint. Cheap to clone; all clones share the same queues.
#[derive(Debug, Clone)]
pub struct Broker {
    inner: Arc<HubInner>,
}

impl Broker {
    /// Hub with default settings (guest/guest on localhost:5672).
    pub fn new() -> Self {
        Self::from_settings(&BrokerSettings::default())
    }

    /// Hub expecting the given host identity and credentials.
    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self {
            inner: Arc::new(HubInner {
                host: settings.host.clone(),
                port: settings.port,
                username: settings.username.clone(),
                password: settings.password.clone(),
                queues: DashMap::new(),
                connections: DashMap::new(),
                next_connection_id: AtomicU64::new(1),
                next_consumer_id: AtomicU64::new(1),
            }),
        }
    }

    /// Open a connection, validating credentials.
    pub fn connect(&self, settings: &BrokerSettings) -> BrokerResult<Connection> {
        if settings.username != self.inner.username || settings.password != self.inner.password {
            warn!(user = %settings.username, "broker refused connection");
            return Err(BrokerError::AccessRefused(settings.username.clone()));
        }
        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.inner.connections.insert(id, token.clone());
        debug!(
            host = %self.inner.host,
            port = self.inner.port,
            connection = id,
            "broker connection opened"
        );
        Ok(Connection {
            hub: self.inner.clone(),
            id,
            token,
        })
    }

    /// Sever every live connection. Queue contents survive; clients are
    /// expected to reconnect. Used to simulate a broker outage.
    pub fn disconnect_all(&self) {
        let count = self.inner.connections.len();
        for entry in self.inner.connections.iter() {
            entry.value().cancel();
        }
        self.inner.connections.clear();
        info!(connections = count, "broker dropped all connections");
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Ready/unacknowledged depth of a declared queue.
    pub fn queue_depth(&self, queue: &str) -> Option<QueueDepth> {
        self.inner.queues.get(queue).map(|q| q.depth())
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// One client connection. Closing it (or dropping it) invalidates every
/// consumer created from it.
#[derive(Debug)]
pub struct Connection {
    hub: Arc<HubInner>,
    id: u64,
    token: CancellationToken,
}

impl Connection {
    /// Declare a queue. Redeclaration with identical options is a no-op;
    /// conflicting options are refused.
    pub fn declare_queue(&self, name: &str, options: QueueOptions) -> BrokerResult<()> {
        self.ensure_open()?;
        match self.hub.queues.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get().options != options {
                    return Err(BrokerError::QueueMismatch(name.to_string()));
                }
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Queue::new(name, options)));
                info!(queue = name, "queue declared");
                Ok(())
            }
        }
    }

    /// Publish one message to a declared queue.
    pub fn publish(&self, queue: &str, message: WireMessage) -> BrokerResult<()> {
        self.ensure_open()?;
        let queue = self
            .hub
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        queue.push(message);
        Ok(())
    }

    /// Start consuming from a declared queue.
    pub fn consume(&self, queue: &str) -> BrokerResult<Consumer> {
        self.ensure_open()?;
        let queue = self
            .hub
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?
            .clone();
        let id = self.hub.next_consumer_id.fetch_add(1, Ordering::Relaxed);
        debug!(queue = %queue.name, consumer = id, "consumer attached");
        Ok(Consumer {
            queue,
            id,
            token: self.token.clone(),
        })
    }

    pub fn is_open(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn close(&self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
            self.hub.connections.remove(&self.id);
            debug!(connection = self.id, "broker connection closed");
        }
    }

    fn ensure_open(&self) -> BrokerResult<()> {
        if self.token.is_cancelled() {
            return Err(BrokerError::ConnectionClosed);
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Serialized consumer handle for one queue.
#[derive(Debug)]
pub struct Consumer {
    queue: Arc<Queue>,
    id: u64,
    token: CancellationToken,
}

impl Consumer {
    /// Next delivery, or `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            if self.token.is_cancelled() {
                return None;
            }
            if let Some(delivery) = self.pop_ready() {
                return Some(delivery);
            }
            tokio::select! {
                _ = self.queue.notify.notified() => {}
                _ = self.token.cancelled() => return None,
            }
        }
    }

    /// Acknowledge a delivery, removing it for good.
    pub fn ack(&self, delivery_tag: u64) -> BrokerResult<()> {
        let mut state = self.queue.state.lock();
        state
            .unacked
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))?;
        Ok(())
    }

    /// Reject a delivery. With `requeue` it returns to the queue head and
    /// will come back with `redelivered` set; without, it is dropped.
    pub fn nack(&self, delivery_tag: u64, requeue: bool) -> BrokerResult<()> {
        let mut state = self.queue.state.lock();
        let (_, message) = state
            .unacked
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))?;
        if requeue {
            state.ready.push_front(QueuedMessage {
                message,
                redelivered: true,
            });
            drop(state);
            self.queue.notify.notify_one();
        }
        Ok(())
    }

    fn pop_ready(&self) -> Option<Delivery> {
        let mut state = self.queue.state.lock();
        let queued = state.ready.pop_front()?;
        let tag = state.next_tag;
        state.next_tag += 1;
        state
            .unacked
            .insert(tag, (self.id, queued.message.clone()));
        Some(Delivery {
            delivery_tag: tag,
            redelivered: queued.redelivered,
            message: queued.message,
        })
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let requeued = self.queue.requeue_consumer(self.id);
        if requeued > 0 {
            debug!(
                queue = %self.queue.name,
                consumer = self.id,
                requeued,
                "consumer dropped with unacknowledged deliveries"
            );
        }
    }
}
