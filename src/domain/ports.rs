use super::payment::{Payment, PaymentId, PaymentState};
use super::task::{AckHandle, DeadLetter, Delivery};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Result of a conditional state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// `true` only for the one caller whose write took effect.
    pub applied: bool,
    /// State of the payment after the operation.
    pub state: PaymentState,
}

/// Durable keyed record of payments.
///
/// Implementations must be safe for concurrent use by many workers.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts a new payment. Fails with `AlreadyExists` when the external
    /// reference is taken; the uniqueness check and the insert are atomic.
    async fn create(&self, payment: Payment) -> Result<()>;

    async fn get_by_id(&self, id: PaymentId) -> Result<Payment>;

    async fn get_by_reference(&self, reference: &str) -> Result<Payment>;

    /// Atomically moves `id` from `from` to `to`.
    ///
    /// Locks only the target record. If the current state is not `from`, or
    /// the move is not a legal transition, nothing is written and
    /// `applied == false` is returned without error. Fails with `NotFound`
    /// if the payment does not exist.
    async fn conditional_transition(
        &self,
        id: PaymentId,
        from: PaymentState,
        to: PaymentState,
    ) -> Result<Transition>;
}

/// At-least-once delivery queue of settlement tasks.
#[async_trait]
pub trait TaskChannel: Send + Sync {
    /// Enqueues a payload and returns its broker message id.
    async fn publish(&self, payload: Vec<u8>) -> Result<Uuid>;

    /// Waits for the next task and claims it for the visibility window.
    ///
    /// Must be cancellation-safe: dropping the future never loses a task.
    async fn receive(&self) -> Result<Delivery>;

    /// Removes a claimed task from the queue for good.
    async fn ack(&self, handle: &AckHandle) -> Result<()>;

    /// Releases a claimed task for redelivery after `redeliver_after`,
    /// with its delivery attempt incremented.
    async fn nack(&self, handle: &AckHandle, redeliver_after: Duration) -> Result<()>;
}

/// Append-only store of tasks that will not be retried automatically.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, letter: DeadLetter) -> Result<()>;

    /// All entries in arrival order.
    async fn list(&self) -> Result<Vec<DeadLetter>>;

    /// Removes and returns an entry, for operator-driven redrive.
    async fn take(&self, message_id: Uuid) -> Result<Option<DeadLetter>>;
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum SettlementOutcome {
    Success,
    Failure,
}

impl SettlementOutcome {
    pub fn target_state(&self) -> PaymentState {
        match self {
            SettlementOutcome::Success => PaymentState::SettledSuccess,
            SettlementOutcome::Failure => PaymentState::SettledFailed,
        }
    }
}

/// Decides whether a single settlement attempt succeeds.
///
/// Must not mutate the payment. An `Err` means the provider could not be
/// reached and is treated as transient.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(&self, payment: &Payment) -> Result<SettlementOutcome>;
}

pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type TaskChannelRef = Arc<dyn TaskChannel>;
pub type DeadLetterSinkRef = Arc<dyn DeadLetterSink>;
pub type DecisionProviderRef = Arc<dyn DecisionProvider>;
