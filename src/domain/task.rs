use super::payment::PaymentId;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum TaskKind {
    #[serde(rename = "payment.created")]
    PaymentCreated,
}

/// "Attempt to settle payment X", as carried on the task channel.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct SettlementTask {
    pub payment_id: PaymentId,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub timestamp: DateTime<Utc>,
}

impl SettlementTask {
    pub fn payment_created(payment_id: PaymentId) -> Self {
        Self {
            payment_id,
            kind: TaskKind::PaymentCreated,
            timestamp: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Receipt for one claim of a task. Only the current claimant's receipt is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckHandle(Uuid);

impl AckHandle {
    pub fn new(receipt: Uuid) -> Self {
        Self(receipt)
    }
}

impl fmt::Display for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A claimed task as handed to a worker.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned id, stable across redeliveries.
    pub message_id: Uuid,
    pub payload: Vec<u8>,
    /// Number of earlier deliveries of this message (0 on first delivery).
    /// Maintained by the channel; read-only to workers.
    pub attempt: u32,
    pub handle: AckHandle,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterCause {
    /// Retry budget spent on transient failures.
    Exhausted,
    /// Payload could not be decoded.
    MalformedTask,
    /// The referenced payment does not exist.
    PaymentMissing,
    /// Any other error that retrying cannot fix.
    PermanentFailure,
}

impl DeadLetterCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterCause::Exhausted => "exhausted",
            DeadLetterCause::MalformedTask => "malformed_task",
            DeadLetterCause::PaymentMissing => "payment_missing",
            DeadLetterCause::PermanentFailure => "permanent_failure",
        }
    }
}

impl fmt::Display for DeadLetterCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task removed from the live queue for manual inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub message_id: Uuid,
    pub payload: Vec<u8>,
    /// `None` when the payload could not be decoded.
    pub payment_id: Option<PaymentId>,
    /// Last known attempt count.
    pub attempts: u32,
    pub cause: DeadLetterCause,
    pub last_error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_delivery(
        delivery: &Delivery,
        payment_id: Option<PaymentId>,
        attempts: u32,
        cause: DeadLetterCause,
        last_error: impl Into<String>,
    ) -> Self {
        Self {
            message_id: delivery.message_id,
            payload: delivery.payload.clone(),
            payment_id,
            attempts,
            cause,
            last_error: last_error.into(),
            dead_lettered_at: Utc::now(),
        }
    }
}
