//! Order operations and the payment-result effect
//!
//! `create_order` writes the order row and its payment command outbox row in
//! one transaction. `apply_payment_result` is the idempotent consumer core:
//! the inbox re-check, the status change and the processed marker commit
//! together, and subscribers are notified only after the commit.

use rust_decimal::Decimal;
use shared::{PaymentProcessedEvent, ProcessPaymentCommand};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::model::{Order, OrderStatus};
use crate::notify::OrderNotifier;
use crate::storage::OrderStorage;

/// What applying one payment-result event did.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The order moved to a terminal status.
    Updated(Order),
    /// Message id already processed; nothing was done.
    Duplicate,
    /// The event names an order this store has never seen.
    OrderMissing,
    /// The order was already settled by an earlier event.
    AlreadySettled,
}

#[derive(Debug, Clone)]
pub struct OrderService {
    storage: OrderStorage,
    notifier: OrderNotifier,
}

impl OrderService {
    pub fn new(storage: OrderStorage, notifier: OrderNotifier) -> Self {
        Self { storage, notifier }
    }

    /// Create an order and enqueue its payment command atomically. The
    /// command reaches the payment-requests queue only through the outbox,
    /// so a crash right after this call loses nothing.
    pub fn create_order(
        &self,
        user_id: &str,
        amount: Decimal,
        description: &str,
    ) -> AppResult<Order> {
        if user_id.trim().is_empty() {
            return Err(AppError::validation("user id must not be empty"));
        }
        if amount <= Decimal::ZERO {
            return Err(AppError::validation("order amount must be positive"));
        }
        let order = Order::new(user_id, amount, description);
        let command = ProcessPaymentCommand {
            order_id: order.id.clone(),
            user_id: order.user_id.clone(),
            amount: order.amount,
        };

        let txn = self.storage.begin_write()?;
        self.storage.insert_order(&txn, &order)?;
        self.storage.enqueue_outbox(
            &txn,
            &format!("order-{}", order.id),
            ProcessPaymentCommand::KIND,
            serde_json::to_string(&command)?,
        )?;
        self.storage.commit(txn)?;

        info!(order_id = %order.id, user_id, amount = %amount, "order created");
        Ok(order)
    }

    pub fn get_order(&self, order_id: &str) -> AppResult<Order> {
        self.storage
            .get_order(order_id)?
            .ok_or_else(|| AppError::not_found(format!("order {order_id} not found")))
    }

    /// All orders of one owner, newest first.
    pub fn get_user_orders(&self, user_id: &str) -> AppResult<Vec<Order>> {
        Ok(self.storage.get_user_orders(user_id)?)
    }

    /// Apply one payment-result event, exactly once per message id.
    ///
    /// Success finishes the order, failure cancels it; either way the status
    /// change and the processed marker commit in one transaction. An event
    /// for an unknown order is logged and dropped: the order must have
    /// existed to trigger a payment, so this is a data anomaly, not
    /// something a redelivery can fix. A settled order is never touched
    /// again, whatever later events claim.
    pub fn apply_payment_result(
        &self,
        message_id: &str,
        event: &PaymentProcessedEvent,
    ) -> AppResult<ApplyOutcome> {
        if self.storage.is_inbox_processed(message_id)? {
            debug!(message_id, "duplicate payment result skipped");
            return Ok(ApplyOutcome::Duplicate);
        }

        let txn = self.storage.begin_write()?;
        // Re-check under the write transaction; the cheap check above ran
        // without coordination.
        if self.storage.is_inbox_processed_txn(&txn, message_id)? {
            debug!(message_id, "duplicate payment result skipped");
            return Ok(ApplyOutcome::Duplicate);
        }

        let Some(mut order) = self.storage.get_order_txn(&txn, &event.order_id)? else {
            warn!(order_id = %event.order_id, message_id, "payment result for unknown order dropped");
            return Ok(ApplyOutcome::OrderMissing);
        };
        if order.status.is_terminal() {
            warn!(
                order_id = %order.id,
                status = ?order.status,
                message_id,
                "payment result for settled order ignored"
            );
            self.storage.record_inbox(
                &txn,
                message_id,
                PaymentProcessedEvent::KIND,
                serde_json::to_string(event)?,
            )?;
            self.storage.commit(txn)?;
            return Ok(ApplyOutcome::AlreadySettled);
        }

        order.status = if event.is_success {
            OrderStatus::Finished
        } else {
            OrderStatus::Cancelled
        };
        order.updated_at = shared::now();
        self.storage.put_order(&txn, &order)?;
        self.storage.record_inbox(
            &txn,
            message_id,
            PaymentProcessedEvent::KIND,
            serde_json::to_string(event)?,
        )?;
        self.storage.commit(txn)?;

        match order.status {
            OrderStatus::Finished => info!(order_id = %order.id, "order finished"),
            _ => warn!(
                order_id = %order.id,
                reason = event.failure_reason.as_deref().unwrap_or("unspecified"),
                "order cancelled"
            ),
        }
        self.notifier.notify(order.clone());
        Ok(ApplyOutcome::Updated(order))
    }
}
