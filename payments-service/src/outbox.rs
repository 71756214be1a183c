//! Outbox publisher worker
//!
//! Polls the outbox table on a fixed interval and pushes unpublished rows
//! to the payment response queue. A row is marked published only after the
//! broker accepted it, and the marks for one cycle commit together after
//! the publish loop. The crash window between broker accept and the local
//! commit means a row can be published twice; the consuming side's inbox
//! absorbs that.
//!
//! The loop is never fatal: a failed cycle drops the connection, logs, and
//! the next tick reconnects.

use std::time::Duration;

use broker::{Broker, BrokerSettings, Connection, QueueOptions};
use shared::WireMessage;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AppResult;
use crate::storage::LedgerStorage;

pub struct OutboxPublisher {
    storage: LedgerStorage,
    broker: Broker,
    settings: BrokerSettings,
    poll_interval: Duration,
    batch_size: usize,
}

impl OutboxPublisher {
    pub fn new(storage: LedgerStorage, broker: Broker, config: &Config) -> Self {
        Self {
            storage,
            broker,
            settings: config.broker.clone(),
            poll_interval: Duration::from_millis(config.outbox_poll_ms),
            batch_size: config.outbox_batch,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            queue = %self.settings.payment_response_queue,
            interval_ms = self.poll_interval.as_millis() as u64,
            "outbox publisher started"
        );
        let mut connection: Option<Connection> = None;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Some(conn) = connection.take() {
                        conn.close();
                    }
                    info!("outbox publisher stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_pending(&mut connection) {
                        warn!(error = %e, "outbox cycle failed, will reconnect");
                        connection = None;
                    }
                }
            }
        }
    }

    /// One polling cycle. Publishes up to `batch_size` rows in insertion
    /// order; rows the broker refused stay pending and are logged, rows it
    /// accepted are stamped in a single commit afterwards.
    fn publish_pending(&self, connection: &mut Option<Connection>) -> AppResult<usize> {
        let pending = self.storage.pending_outbox(self.batch_size)?;
        if pending.is_empty() {
            return Ok(0);
        }

        let connected = connection.as_ref().is_some_and(|c| c.is_open());
        if !connected {
            let conn = self.broker.connect(&self.settings)?;
            conn.declare_queue(&self.settings.payment_response_queue, QueueOptions::default())?;
            debug!("outbox publisher connected to broker");
            *connection = Some(conn);
        }

        let mut published = Vec::new();
        if let Some(conn) = connection.as_ref() {
            for record in &pending {
                let message = WireMessage::new(
                    &record.message_id,
                    &record.kind,
                    record.payload.clone().into_bytes(),
                );
                match conn.publish(&self.settings.payment_response_queue, message) {
                    Ok(()) => published.push(record.seq),
                    Err(e) => {
                        warn!(
                            message_id = %record.message_id,
                            error = %e,
                            "outbox publish failed, row left for retry"
                        );
                    }
                }
            }
        }

        if !published.is_empty() {
            let marked = self.storage.mark_outbox_published(&published)?;
            debug!(published = marked, "outbox rows marked published");
        }
        Ok(published.len())
    }
}
