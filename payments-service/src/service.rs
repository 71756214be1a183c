//! Account operations and the payment command effect
//!
//! `process_payment` is the idempotent consumer core: the inbox re-check,
//! the balance mutation, the ledger entry and the outbound result event all
//! commit in one transaction, or none of them do. Business rejections
//! (unknown account, insufficient funds) are normal outcomes that enqueue a
//! failure event; they never bubble up as errors.

use redb::WriteTransaction;
use rust_decimal::Decimal;
use shared::{PaymentProcessedEvent, ProcessPaymentCommand};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::model::{Account, EntryKind};
use crate::storage::LedgerStorage;

const REASON_ACCOUNT_NOT_FOUND: &str = "Account not found";
const REASON_INSUFFICIENT_FUNDS: &str = "Insufficient funds";

/// What processing one payment command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Balance debited, withdrawal recorded, success event enqueued.
    Charged,
    /// Business rejection; failure event enqueued, ledger untouched.
    Rejected(String),
    /// Message id already processed; nothing was done.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct AccountService {
    storage: LedgerStorage,
}

impl AccountService {
    pub fn new(storage: LedgerStorage) -> Self {
        Self { storage }
    }

    /// Create the owner's account. Each owner has at most one.
    pub fn create_account(&self, user_id: &str) -> AppResult<Account> {
        if user_id.trim().is_empty() {
            return Err(AppError::validation("user id must not be empty"));
        }
        let txn = self.storage.begin_write()?;
        if self.storage.get_account_txn(&txn, user_id)?.is_some() {
            return Err(AppError::conflict(format!(
                "account for user {user_id} already exists"
            )));
        }
        let account = Account::new(user_id);
        self.storage.put_account(&txn, &account)?;
        self.storage.commit(txn)?;
        info!(user_id, "account created");
        Ok(account)
    }

    /// Increase the balance and record a deposit under a fresh reference
    /// id. Top-ups are direct calls, not broker deliveries, so every call
    /// is an intentional new mutation.
    pub fn top_up(&self, user_id: &str, amount: Decimal) -> AppResult<Account> {
        if amount <= Decimal::ZERO {
            return Err(AppError::validation("top-up amount must be positive"));
        }
        let txn = self.storage.begin_write()?;
        let mut account = self
            .storage
            .get_account_txn(&txn, user_id)?
            .ok_or_else(|| AppError::not_found(format!("account for user {user_id} not found")))?;
        account.balance += amount;
        account.updated_at = shared::now();
        self.storage.put_account(&txn, &account)?;
        let reference = format!("topup-{}", shared::new_id());
        self.storage
            .append_entry(&txn, user_id, &reference, EntryKind::Deposit, amount)?;
        self.storage.commit(txn)?;
        info!(user_id, amount = %amount, balance = %account.balance, "account topped up");
        Ok(account)
    }

    pub fn get_account(&self, user_id: &str) -> AppResult<Account> {
        self.storage
            .get_account(user_id)?
            .ok_or_else(|| AppError::not_found(format!("account for user {user_id} not found")))
    }

    /// Apply one payment command, exactly once per message id.
    ///
    /// A success debits the balance and records a withdrawal keyed by the
    /// order id; both rejections leave the ledger untouched. All three
    /// outcomes enqueue exactly one result event and mark the message id
    /// processed in the same transaction.
    pub fn process_payment(
        &self,
        message_id: &str,
        command: &ProcessPaymentCommand,
    ) -> AppResult<PaymentOutcome> {
        if self.storage.is_inbox_processed(message_id)? {
            debug!(message_id, "duplicate payment command skipped");
            return Ok(PaymentOutcome::Duplicate);
        }

        let txn = self.storage.begin_write()?;
        // Re-check under the write transaction; the cheap check above ran
        // without coordination.
        if self.storage.is_inbox_processed_txn(&txn, message_id)? {
            debug!(message_id, "duplicate payment command skipped");
            return Ok(PaymentOutcome::Duplicate);
        }

        let outcome = match self.storage.get_account_txn(&txn, &command.user_id)? {
            None => {
                self.enqueue_result(&txn, command, Some(REASON_ACCOUNT_NOT_FOUND))?;
                PaymentOutcome::Rejected(REASON_ACCOUNT_NOT_FOUND.to_string())
            }
            Some(account) if account.balance < command.amount => {
                self.enqueue_result(&txn, command, Some(REASON_INSUFFICIENT_FUNDS))?;
                PaymentOutcome::Rejected(REASON_INSUFFICIENT_FUNDS.to_string())
            }
            Some(mut account) => {
                account.balance -= command.amount;
                account.updated_at = shared::now();
                self.storage.put_account(&txn, &account)?;
                self.storage.append_entry(
                    &txn,
                    &command.user_id,
                    &command.order_id,
                    EntryKind::Withdrawal,
                    command.amount,
                )?;
                self.enqueue_result(&txn, command, None)?;
                PaymentOutcome::Charged
            }
        };
        self.storage.record_inbox(
            &txn,
            message_id,
            ProcessPaymentCommand::KIND,
            serde_json::to_string(command)?,
        )?;
        self.storage.commit(txn)?;

        match &outcome {
            PaymentOutcome::Charged => {
                info!(order_id = %command.order_id, user_id = %command.user_id, amount = %command.amount, "payment charged");
            }
            PaymentOutcome::Rejected(reason) => {
                warn!(order_id = %command.order_id, user_id = %command.user_id, reason = %reason, "payment rejected");
            }
            PaymentOutcome::Duplicate => {}
        }
        Ok(outcome)
    }

    fn enqueue_result(
        &self,
        txn: &WriteTransaction,
        command: &ProcessPaymentCommand,
        failure: Option<&str>,
    ) -> AppResult<u64> {
        let event = match failure {
            None => PaymentProcessedEvent::success(&command.order_id),
            Some(reason) => PaymentProcessedEvent::failure(&command.order_id, reason),
        };
        let message_id = format!("payment-{}-{}", command.order_id, shared::new_id());
        let seq = self.storage.enqueue_outbox(
            txn,
            &message_id,
            PaymentProcessedEvent::KIND,
            serde_json::to_string(&event)?,
        )?;
        Ok(seq)
    }
}
