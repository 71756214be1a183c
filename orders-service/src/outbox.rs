//! Outbox publisher worker
//!
//! Polls the outbox table on a fixed interval and pushes unpublished rows
//! to the payment request queue. A row is marked published only after the
//! broker accepted it, and the marks for one cycle commit together after
//! the publish loop. The crash window between broker accept and the local
//! commit means a command can be published twice; the ledger side's inbox
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
use crate::storage::OrderStorage;

pub struct OutboxPublisher {
    storage: OrderStorage,
    broker: Broker,
    settings: BrokerSettings,
    poll_interval: Duration,
    batch_size: usize,
}

impl OutboxPublisher {
    pub fn new(storage: OrderStorage, broker: Broker, config: &Config) -> Self {
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
            queue = %self.settings.payment_request_queue,
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
            conn.declare_queue(&self.settings.payment_request_queue, QueueOptions::default())?;
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
                match conn.publish(&self.settings.payment_request_queue, message) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shared::ProcessPaymentCommand;

    fn config(broker_settings: BrokerSettings) -> Config {
        Config {
            db_path: "unused".to_string(),
            http_port: 0,
            outbox_poll_ms: 10,
            outbox_batch: 10,
            broker: broker_settings,
        }
    }

    fn enqueue_command(storage: &OrderStorage, order_id: &str) {
        let command = ProcessPaymentCommand {
            order_id: order_id.to_string(),
            user_id: "u1".to_string(),
            amount: Decimal::from(100),
        };
        let txn = storage.begin_write().unwrap();
        storage
            .enqueue_outbox(
                &txn,
                &format!("order-{order_id}"),
                ProcessPaymentCommand::KIND,
                serde_json::to_string(&command).unwrap(),
            )
            .unwrap();
        storage.commit(txn).unwrap();
    }

    #[tokio::test]
    async fn publishes_commands_to_the_request_queue_and_marks_them() {
        let storage = OrderStorage::open_in_memory().unwrap();
        enqueue_command(&storage, "o1");
        enqueue_command(&storage, "o2");
        let hub = Broker::new();
        let publisher =
            OutboxPublisher::new(storage.clone(), hub.clone(), &config(BrokerSettings::default()));

        assert_eq!(publisher.publish_pending(&mut None).unwrap(), 2);
        assert!(storage.pending_outbox(10).unwrap().is_empty());

        let conn = hub.connect(&BrokerSettings::default()).unwrap();
        let mut consumer = conn.consume("payment-requests").unwrap();
        for expected in ["order-o1", "order-o2"] {
            let delivery = consumer.recv().await.unwrap();
            assert_eq!(delivery.message.message_id, expected);
            let command: ProcessPaymentCommand =
                serde_json::from_slice(&delivery.message.payload).unwrap();
            assert_eq!(command.user_id, "u1");
            consumer.ack(delivery.delivery_tag).unwrap();
        }
    }

    #[test]
    fn an_open_connection_is_reused_across_cycles() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let hub = Broker::new();
        let publisher =
            OutboxPublisher::new(storage.clone(), hub.clone(), &config(BrokerSettings::default()));

        let mut connection = None;
        enqueue_command(&storage, "o1");
        publisher.publish_pending(&mut connection).unwrap();
        enqueue_command(&storage, "o2");
        publisher.publish_pending(&mut connection).unwrap();

        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.queue_depth("payment-requests").unwrap().ready, 2);
    }
}
