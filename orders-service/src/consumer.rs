//! Payment result consumer worker
//!
//! Serialized receive loop over the payment response queue. Every delivery
//! runs through [`OrderService::apply_payment_result`]; acknowledgment
//! happens only after its transaction committed, so a crash in between
//! yields a redelivery that the inbox check absorbs.
//!
//! Failures are negatively acknowledged with requeue and retried without a
//! cap. A short pause after each nack keeps a poison message from spinning
//! the loop hot.

use std::time::Duration;

use broker::{Broker, BrokerResult, BrokerSettings, Connection, Consumer, Delivery, QueueOptions};
use shared::{PaymentProcessedEvent, WireMessage};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppResult;
use crate::service::{ApplyOutcome, OrderService};

const RECONNECT_DELAY_MS: u64 = 1_000;
const NACK_PAUSE_MS: u64 = 500;

pub struct ResultConsumer {
    service: OrderService,
    broker: Broker,
    settings: BrokerSettings,
}

impl ResultConsumer {
    pub fn new(service: OrderService, broker: Broker, settings: BrokerSettings) -> Self {
        Self {
            service,
            broker,
            settings,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(queue = %self.settings.payment_response_queue, "payment result consumer started");
        loop {
            match self.attach() {
                Ok((connection, consumer)) => self.drain(connection, consumer, &shutdown).await,
                Err(e) => warn!(error = %e, "broker attach failed"),
            }
            if shutdown.is_cancelled() {
                info!("payment result consumer stopped");
                return;
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("payment result consumer stopped");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(RECONNECT_DELAY_MS)) => {}
            }
        }
    }

    fn attach(&self) -> BrokerResult<(Connection, Consumer)> {
        let connection = self.broker.connect(&self.settings)?;
        connection.declare_queue(&self.settings.payment_response_queue, QueueOptions::default())?;
        let consumer = connection.consume(&self.settings.payment_response_queue)?;
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
                warn!(message_id = %message_id, error = %e, "payment result failed, requeued");
                if let Err(e) = consumer.nack(delivery.delivery_tag, true) {
                    warn!(message_id = %message_id, error = %e, "nack failed");
                }
                tokio::time::sleep(Duration::from_millis(NACK_PAUSE_MS)).await;
            }
        }
    }

    fn apply(&self, message: &WireMessage) -> AppResult<ApplyOutcome> {
        let event: PaymentProcessedEvent = message.decode()?;
        self.service.apply_payment_result(&message.message_id, &event)
    }
}
