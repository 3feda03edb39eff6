//! Per-task settlement protocol.
//!
//! Each delivery is driven to exactly one of three ends: acknowledged after a
//! terminal state was reached (by this worker or an earlier one), released for
//! redelivery after a transient failure, or moved to the dead-letter sink.

use super::retry::{AttemptPhase, RetryDecision, RetryPolicy};
use crate::config::SettlementConfig;
use crate::domain::payment::{PaymentId, PaymentState};
use crate::domain::ports::{
    DeadLetterSinkRef, DecisionProviderRef, PaymentStoreRef, TaskChannelRef, Transition,
};
use crate::domain::task::{DeadLetter, DeadLetterCause, Delivery, SettlementTask};
use crate::error::{PaymentError, Result};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How a single delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// This delivery applied the terminal transition.
    Settled {
        payment_id: PaymentId,
        state: PaymentState,
    },
    /// The payment was already terminal, either before this delivery started
    /// or because a concurrent delivery won the race. Acknowledged.
    AlreadySettled {
        payment_id: PaymentId,
        state: PaymentState,
    },
    /// Left unacknowledged; the channel will redeliver it.
    Retrying {
        payment_id: Option<PaymentId>,
        attempt: u32,
        after: Duration,
    },
    /// Removed from the live queue and forwarded to the dead-letter sink.
    DeadLettered {
        payment_id: Option<PaymentId>,
        cause: DeadLetterCause,
        attempts: u32,
    },
}

/// Runs the settlement protocol for one delivery at a time.
///
/// Holds no per-payment state: correctness under concurrent or duplicate
/// deliveries rests entirely on the store's conditional transition.
pub struct SettlementProcessor {
    store: PaymentStoreRef,
    channel: TaskChannelRef,
    dead_letters: DeadLetterSinkRef,
    decisions: DecisionProviderRef,
    retry_policy: RetryPolicy,
    decision_timeout: Duration,
}

impl SettlementProcessor {
    pub fn new(
        store: PaymentStoreRef,
        channel: TaskChannelRef,
        dead_letters: DeadLetterSinkRef,
        decisions: DecisionProviderRef,
        config: &SettlementConfig,
    ) -> Self {
        Self {
            store,
            channel,
            dead_letters,
            decisions,
            retry_policy: config.retry_policy.clone(),
            decision_timeout: config.decision_timeout,
        }
    }

    pub fn channel(&self) -> &TaskChannelRef {
        &self.channel
    }

    /// Processes one claimed delivery. Never fails: every error is contained
    /// and turned into a retry or a dead letter.
    pub async fn process(&self, delivery: Delivery) -> TaskOutcome {
        let task = match SettlementTask::decode(&delivery.payload) {
            Ok(task) => task,
            Err(e) => {
                error!(
                    message_id = %delivery.message_id,
                    attempt = delivery.attempt,
                    error = %e,
                    payload = %String::from_utf8_lossy(&delivery.payload),
                    "Malformed settlement task"
                );
                return self
                    .dead_letter(
                        &delivery,
                        None,
                        delivery.attempt,
                        DeadLetterCause::MalformedTask,
                        e.to_string(),
                    )
                    .await;
            }
        };
        let payment_id = task.payment_id;

        if self.retry_policy.phase(delivery.attempt) == AttemptPhase::Exhausted {
            if let Some(state) = self.terminal_state(payment_id).await {
                self.ack(&delivery, payment_id).await;
                return TaskOutcome::AlreadySettled { payment_id, state };
            }
            warn!(
                payment_id = %payment_id,
                message_id = %delivery.message_id,
                attempt = delivery.attempt,
                max_attempts = self.retry_policy.max_attempts,
                "Delivery attempts exhausted, dead-lettering without settlement"
            );
            return self
                .dead_letter(
                    &delivery,
                    Some(payment_id),
                    delivery.attempt,
                    DeadLetterCause::Exhausted,
                    "delivery attempts exhausted before processing",
                )
                .await;
        }

        debug!(
            payment_id = %payment_id,
            message_id = %delivery.message_id,
            attempt = delivery.attempt,
            "Processing settlement task"
        );

        match self.settle(payment_id).await {
            Ok(Transition {
                applied: true,
                state,
            }) => {
                info!(payment_id = %payment_id, state = %state, "Payment settled");
                self.ack(&delivery, payment_id).await;
                TaskOutcome::Settled { payment_id, state }
            }
            Ok(Transition {
                applied: false,
                state,
            }) => {
                info!(
                    payment_id = %payment_id,
                    state = %state,
                    "Payment already settled, acknowledging"
                );
                self.ack(&delivery, payment_id).await;
                TaskOutcome::AlreadySettled { payment_id, state }
            }
            Err(e) if e.is_transient() => self.retry_or_dead_letter(&delivery, payment_id, e).await,
            Err(e) => {
                let cause = match e {
                    PaymentError::NotFound(_) => DeadLetterCause::PaymentMissing,
                    _ => DeadLetterCause::PermanentFailure,
                };
                error!(
                    payment_id = %payment_id,
                    message_id = %delivery.message_id,
                    attempt = delivery.attempt,
                    error = %e,
                    "Permanent settlement failure"
                );
                self.dead_letter(
                    &delivery,
                    Some(payment_id),
                    delivery.attempt,
                    cause,
                    e.to_string(),
                )
                .await
            }
        }
    }

    /// Fetches, decides and applies. The decision is computed before the
    /// conditional transition so the store lock is held only for the write.
    async fn settle(&self, payment_id: PaymentId) -> Result<Transition> {
        let payment = self.store.get_by_id(payment_id).await?;
        if payment.state.is_terminal() {
            return Ok(Transition {
                applied: false,
                state: payment.state,
            });
        }

        let outcome = tokio::time::timeout(self.decision_timeout, self.decisions.decide(&payment))
            .await
            .map_err(|_| {
                PaymentError::Timeout(format!("settlement decision for payment {payment_id}"))
            })??;

        self.store
            .conditional_transition(payment_id, PaymentState::Pending, outcome.target_state())
            .await
    }

    async fn retry_or_dead_letter(
        &self,
        delivery: &Delivery,
        payment_id: PaymentId,
        cause: PaymentError,
    ) -> TaskOutcome {
        match self.retry_policy.on_transient_failure(delivery.attempt) {
            RetryDecision::Redeliver { after } => {
                warn!(
                    payment_id = %payment_id,
                    message_id = %delivery.message_id,
                    attempt = delivery.attempt,
                    retry_in_ms = after.as_millis() as u64,
                    error = %cause,
                    "Transient settlement failure, will retry"
                );
                self.release(delivery, after).await;
                TaskOutcome::Retrying {
                    payment_id: Some(payment_id),
                    attempt: delivery.attempt,
                    after,
                }
            }
            RetryDecision::DeadLetter { attempts } => {
                // A transition may have landed even though its reply was lost.
                if let Some(state) = self.terminal_state(payment_id).await {
                    self.ack(delivery, payment_id).await;
                    return TaskOutcome::AlreadySettled { payment_id, state };
                }

                warn!(
                    payment_id = %payment_id,
                    message_id = %delivery.message_id,
                    attempts,
                    error = %cause,
                    "Settlement retries exhausted, moving to dead letter"
                );
                self.dead_letter(
                    delivery,
                    Some(payment_id),
                    attempts,
                    DeadLetterCause::Exhausted,
                    cause.to_string(),
                )
                .await
            }
        }
    }

    /// Best-effort read used before dead-lettering for exhaustion, so a task
    /// never ends up both settled and dead-lettered.
    async fn terminal_state(&self, payment_id: PaymentId) -> Option<PaymentState> {
        match self.store.get_by_id(payment_id).await {
            Ok(payment) if payment.state.is_terminal() => Some(payment.state),
            _ => None,
        }
    }

    /// Forwards the delivery to the dead-letter sink, then removes it from the
    /// live queue. If the sink is unavailable the delivery is released instead,
    /// so it is never dropped on the floor.
    async fn dead_letter(
        &self,
        delivery: &Delivery,
        payment_id: Option<PaymentId>,
        attempts: u32,
        cause: DeadLetterCause,
        last_error: impl Into<String>,
    ) -> TaskOutcome {
        let letter = DeadLetter::from_delivery(delivery, payment_id, attempts, cause, last_error);
        match self.dead_letters.send(letter).await {
            Ok(()) => {
                if let Err(e) = self.channel.ack(&delivery.handle).await {
                    warn!(
                        message_id = %delivery.message_id,
                        error = %e,
                        "Failed to acknowledge dead-lettered task"
                    );
                }
                TaskOutcome::DeadLettered {
                    payment_id,
                    cause,
                    attempts,
                }
            }
            Err(e) => {
                let after = self
                    .retry_policy
                    .backoff_duration(delivery.attempt.saturating_add(1));
                error!(
                    message_id = %delivery.message_id,
                    error = %e,
                    "Dead-letter sink unavailable, releasing task"
                );
                self.release(delivery, after).await;
                TaskOutcome::Retrying {
                    payment_id,
                    attempt: delivery.attempt,
                    after,
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery, payment_id: PaymentId) {
        if let Err(e) = self.channel.ack(&delivery.handle).await {
            // The task will come back and take the already-settled fast path.
            warn!(
                payment_id = %payment_id,
                message_id = %delivery.message_id,
                error = %e,
                "Failed to acknowledge settled task"
            );
        }
    }

    async fn release(&self, delivery: &Delivery, after: Duration) {
        if let Err(e) = self.channel.nack(&delivery.handle, after).await {
            warn!(
                message_id = %delivery.message_id,
                error = %e,
                "Failed to release task; visibility window will redeliver it"
            );
        }
    }
}
