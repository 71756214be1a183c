//! Payment command consumer worker
//!
//! Serialized receive loop over the payment request queue. Every delivery
//! runs through [`AccountService::process_payment`]; acknowledgment happens
//! only after its transaction committed, so a crash in between yields a
//! redelivery that the inbox check absorbs.
//!
//! Failures are negatively acknowledged with requeue and retried without a
//! cap. A short pause after each nack keeps a poison message from spinning
//! the loop hot.

use std::time::Duration;

use broker::{Broker, BrokerResult, BrokerSettings, Connection, Consumer, Delivery, QueueOptions};
use shared::{ProcessPaymentCommand, WireMessage};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppResult;
use crate::service::{AccountService, PaymentOutcome};

const RECONNECT_DELAY_MS: u64 = 1_000;
const NACK_PAUSE_MS: u64 = 500;

pub struct CommandConsumer {
    service: AccountService,
    broker: Broker,
    settings: BrokerSettings,
}

impl CommandConsumer {
    pub fn new(service: AccountService, broker: Broker, settings: BrokerSettings) -> Self {
        Self {
            service,
            broker,
            settings,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(queue = %self.settings.payment_request_queue, "payment command consumer started");
        loop {
            match self.attach() {
                Ok((connection, consumer)) => self.drain(connection, consumer, &shutdown).await,
                Err(e) => warn!(error = %e, "broker attach failed"),
            }
            if shutdown.is_cancelled() {
                info!("payment command consumer stopped");
                return;
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("payment command consumer stopped");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(RECONNECT_DELAY_MS)) => {}
            }
        }
    }

    fn attach(&self) -> BrokerResult<(Connection, Consumer)> {
        let connection = self.broker.connect(&self.settings)?;
        connection.declare_queue(&self.settings.payment_request_queue, QueueOptions::default())?;
        let consumer = connection.consume(&self.settings.payment_request_queue)?;
        Ok((connection, consumer))
    }

    async fn drain(
        &self,
        connection: Connection,
        mut consumer: Consumer,
        shutdown: &CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    connection.close();
                    return;
                }
                delivery = consumer.recv() => match delivery {
                    Some(delivery) => self.handle(&consumer, delivery).await,
                    None => {
                        warn!("broker connection lost, reconnecting");
                        return;
                    }
                }
            }
        }
    }

    async fn handle(&self, consumer: &Consumer, delivery: Delivery) {
        let message_id = delivery.message.message_id.clone();
        match self.apply(&delivery.message) {
            Ok(_) => {
                if let Err(e) = consumer.ack(delivery.delivery_tag) {
                    warn!(message_id = %message_id, error = %e, "ack failed");
                }
            }
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "payment command failed, requeued");
                if let Err(e) = consumer.nack(delivery.delivery_tag, true) {
                    warn!(message_id = %message_id, error = %e, "nack failed");
                }
                tokio::time::sleep(Duration::from_millis(NACK_PAUSE_MS)).await;
            }
        }
    }

    fn apply(&self, message: &WireMessage) -> AppResult<PaymentOutcome> {
        let command: ProcessPaymentCommand = message.decode()?;
        self.service.process_payment(&message.message_id, &command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LedgerStorage;
    use rust_decimal::Decimal;

    fn stack() -> (AccountService, LedgerStorage, Broker) {
        let storage = LedgerStorage::open_in_memory().unwrap();
        let service = AccountService::new(storage.clone());
        (service, storage, Broker::new())
    }

    fn command_wire(order_id: &str, user_id: &str, amount: i64) -> WireMessage {
        let command = ProcessPaymentCommand {
            order_id: order_id.to_string(),
            user_id: user_id.to_string(),
            amount: Decimal::from(amount),
        };
        WireMessage::encode(
            format!("order-{order_id}"),
            ProcessPaymentCommand::KIND,
            &command,
        )
        .unwrap()
    }

    async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn processes_commands_and_acknowledges_them() {
        let (service, storage, hub) = stack();
        service.create_account("u1").unwrap();
        service.top_up("u1", Decimal::from(150)).unwrap();

        let shutdown = CancellationToken::new();
        let worker = CommandConsumer::new(service.clone(), hub.clone(), BrokerSettings::default());
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        let conn = hub.connect(&BrokerSettings::default()).unwrap();
        conn.declare_queue("payment-requests", QueueOptions::default())
            .unwrap();
        conn.publish("payment-requests", command_wire("o1", "u1", 100))
            .unwrap();

        let probe = storage.clone();
        wait_for("command processed", move || {
            probe.is_inbox_processed("order-o1").unwrap()
        })
        .await;
        wait_for("delivery acknowledged", || {
            let depth = hub.queue_depth("payment-requests").unwrap();
            depth.ready == 0 && depth.unacked == 0
        })
        .await;
        assert_eq!(service.get_account("u1").unwrap().balance, Decimal::from(50));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_delivery_is_acknowledged_without_a_second_effect() {
        let (service, storage, hub) = stack();
        service.create_account("u1").unwrap();
        service.top_up("u1", Decimal::from(150)).unwrap();

        let shutdown = CancellationToken::new();
        let worker = CommandConsumer::new(service.clone(), hub.clone(), BrokerSettings::default());
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        let conn = hub.connect(&BrokerSettings::default()).unwrap();
        conn.declare_queue("payment-requests", QueueOptions::default())
            .unwrap();
        let wire = command_wire("o1", "u1", 100);
        conn.publish("payment-requests", wire.clone()).unwrap();
        conn.publish("payment-requests", wire).unwrap();

        wait_for("both deliveries drained", || {
            let depth = hub.queue_depth("payment-requests").unwrap();
            depth.ready == 0 && depth.unacked == 0
        })
        .await;
        assert_eq!(service.get_account("u1").unwrap().balance, Decimal::from(50));
        assert_eq!(storage.all_outbox().unwrap().len(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_payload_is_requeued_not_dropped() {
        let (service, storage, hub) = stack();

        let shutdown = CancellationToken::new();
        let worker = CommandConsumer::new(service, hub.clone(), BrokerSettings::default());
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        let conn = hub.connect(&BrokerSettings::default()).unwrap();
        conn.declare_queue("payment-requests", QueueOptions::default())
            .unwrap();
        conn.publish(
            "payment-requests",
            WireMessage::new("poison", ProcessPaymentCommand::KIND, b"not json".to_vec()),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let depth = hub.queue_depth("payment-requests").unwrap();
        assert_eq!(depth.ready + depth.unacked, 1);
        assert!(!storage.is_inbox_processed("poison").unwrap());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
