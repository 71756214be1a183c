//! Queue message schema
//!
//! Every delivery is a [`WireMessage`] envelope: the publishing side's
//! outbox message id, a type tag, and the JSON body of the typed payload.
//! Consumers key their inbox on `message_id`, so a republished envelope is
//! detectable without inspecting the body.
//!
//! Payload field names are PascalCase on the wire (`OrderId`, `IsSuccess`),
//! matching the published queue schema.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Envelope for every queue delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Outbox message id of the publishing side, inbox idempotency key of
    /// the consuming side.
    pub message_id: String,
    /// Payload type tag, one of the `KIND` constants below.
    pub kind: String,
    /// JSON body of the typed payload.
    pub payload: Vec<u8>,
}

impl WireMessage {
    pub fn new(message_id: impl Into<String>, kind: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            message_id: message_id.into(),
            kind: kind.into(),
            payload,
        }
    }

    /// Envelope a typed payload under the given id and type tag.
    pub fn encode<T: Serialize>(
        message_id: impl Into<String>,
        kind: &str,
        body: &T,
    ) -> Result<Self, MessageError> {
        Ok(Self {
            message_id: message_id.into(),
            kind: kind.to_string(),
            payload: serde_json::to_vec(body)?,
        })
    }

    /// Decode the payload as `T`.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, MessageError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Command asking the payment ledger to settle one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessPaymentCommand {
    pub order_id: String,
    pub user_id: String,
    pub amount: Decimal,
}

impl ProcessPaymentCommand {
    pub const KIND: &'static str = "ProcessPaymentCommand";
}

/// Outcome of processing one payment command.
///
/// Business failures (missing account, insufficient funds) travel here as
/// normal payload values, not as transport errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PaymentProcessedEvent {
    pub order_id: String,
    pub is_success: bool,
    pub failure_reason: Option<String>,
}

impl PaymentProcessedEvent {
    pub const KIND: &'static str = "PaymentProcessedEvent";

    pub fn success(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            is_success: true,
            failure_reason: None,
        }
    }

    pub fn failure(order_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            is_success: false,
            failure_reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_payload_uses_pascal_case_on_the_wire() {
        let cmd = ProcessPaymentCommand {
            order_id: "o-1".to_string(),
            user_id: "u-1".to_string(),
            amount: Decimal::new(10050, 2),
        };
        let json: serde_json::Value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["OrderId"], "o-1");
        assert_eq!(json["UserId"], "u-1");
        assert_eq!(json["Amount"], 100.5);
    }

    #[test]
    fn event_payload_uses_pascal_case_on_the_wire() {
        let event = PaymentProcessedEvent::failure("o-2", "Insufficient funds");
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["OrderId"], "o-2");
        assert_eq!(json["IsSuccess"], false);
        assert_eq!(json["FailureReason"], "Insufficient funds");
    }

    #[test]
    fn envelope_round_trips_a_typed_payload() {
        let cmd = ProcessPaymentCommand {
            order_id: "o-3".to_string(),
            user_id: "u-3".to_string(),
            amount: Decimal::new(42, 0),
        };
        let wire = WireMessage::encode("order-o-3", ProcessPaymentCommand::KIND, &cmd).unwrap();
        assert_eq!(wire.message_id, "order-o-3");
        assert_eq!(wire.kind, ProcessPaymentCommand::KIND);

        let decoded: ProcessPaymentCommand = wire.decode().unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn success_event_carries_no_failure_reason() {
        let event = PaymentProcessedEvent::success("o-4");
        assert!(event.is_success);
        assert!(event.failure_reason.is_none());
    }
}
