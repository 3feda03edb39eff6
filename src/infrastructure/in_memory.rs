use crate::domain::payment::{Payment, PaymentId, PaymentState};
use crate::domain::ports::{DeadLetterSink, PaymentStore, TaskChannel, Transition};
use crate::domain::task::{AckHandle, DeadLetter, Delivery};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct PaymentIndex {
    payments: HashMap<PaymentId, Arc<Mutex<Payment>>>,
    references: HashMap<String, PaymentId>,
}

/// A thread-safe in-memory payment store.
///
/// The index is guarded by an `RwLock` so that the reference uniqueness check
/// and the insert happen under one write lock. Each payment sits behind its own
/// `Mutex`, which plays the role of a row lock: conditional transitions on
/// different payments never contend.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    index: Arc<RwLock<PaymentIndex>>,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn row(&self, id: PaymentId) -> Result<Arc<Mutex<Payment>>> {
        let index = self.index.read().await;
        index
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, payment: Payment) -> Result<()> {
        let mut index = self.index.write().await;
        if index.references.contains_key(&payment.reference) {
            return Err(PaymentError::AlreadyExists(payment.reference));
        }
        if index.payments.contains_key(&payment.id) {
            return Err(PaymentError::AlreadyExists(payment.id.to_string()));
        }
        index.references.insert(payment.reference.clone(), payment.id);
        index
            .payments
            .insert(payment.id, Arc::new(Mutex::new(payment)));
        Ok(())
    }

    async fn get_by_id(&self, id: PaymentId) -> Result<Payment> {
        let row = self.row(id).await?;
        let payment = row.lock().await;
        Ok(payment.clone())
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Payment> {
        let row = {
            let index = self.index.read().await;
            index
                .references
                .get(reference)
                .and_then(|id| index.payments.get(id))
                .cloned()
                .ok_or_else(|| PaymentError::NotFound(reference.to_string()))?
        };
        let payment = row.lock().await;
        Ok(payment.clone())
    }

    async fn conditional_transition(
        &self,
        id: PaymentId,
        from: PaymentState,
        to: PaymentState,
    ) -> Result<Transition> {
        let row = self.row(id).await?;
        let mut payment = row.lock().await;
        let applied = payment.transition(from, to, Utc::now());
        if !applied {
            debug!(payment_id = %id, current = %payment.state, "Transition not applied");
        }
        Ok(Transition {
            applied,
            state: payment.state,
        })
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    message_id: Uuid,
    payload: Vec<u8>,
    attempt: u32,
}

#[derive(Default)]
struct ChannelState {
    ready: VecDeque<Envelope>,
    delayed: Vec<(Instant, Envelope)>,
    in_flight: HashMap<AckHandle, (Instant, Envelope)>,
}

impl ChannelState {
    /// Moves due redeliveries and expired claims back to the ready queue.
    fn promote(&mut self, now: Instant) {
        let (mut due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.delayed = waiting;
        due.sort_by_key(|(at, _)| *at);
        self.ready.extend(due.into_iter().map(|(_, envelope)| envelope));

        let expired: Vec<AckHandle> = self
            .in_flight
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in expired {
            if let Some((_, mut envelope)) = self.in_flight.remove(&handle) {
                envelope.attempt += 1;
                debug!(
                    message_id = %envelope.message_id,
                    attempt = envelope.attempt,
                    "Visibility window expired, redelivering"
                );
                self.ready.push_back(envelope);
            }
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        let delayed = self.delayed.iter().map(|(at, _)| *at);
        let claims = self.in_flight.values().map(|(deadline, _)| *deadline);
        delayed.chain(claims).min()
    }
}

/// An in-memory broker with single-claim visibility and redelivery.
///
/// A received task is hidden for `visibility_timeout`. If it is neither acked
/// nor nacked within that window it becomes ready again with its delivery
/// attempt incremented, exactly as a nack would.
#[derive(Clone)]
pub struct InMemoryTaskChannel {
    state: Arc<Mutex<ChannelState>>,
    notify: Arc<Notify>,
    visibility_timeout: Duration,
}

impl InMemoryTaskChannel {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState::default())),
            notify: Arc::new(Notify::new()),
            visibility_timeout,
        }
    }

    /// Tasks waiting for delivery, including delayed redeliveries.
    pub async fn pending_count(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.delayed.len()
    }

    /// Tasks currently claimed by a worker.
    pub async fn in_flight_count(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// `true` when nothing is ready, delayed or in flight.
    pub async fn is_drained(&self) -> bool {
        let state = self.state.lock().await;
        state.ready.is_empty() && state.delayed.is_empty() && state.in_flight.is_empty()
    }
}

#[async_trait]
impl TaskChannel for InMemoryTaskChannel {
    async fn publish(&self, payload: Vec<u8>) -> Result<Uuid> {
        let message_id = Uuid::new_v4();
        {
            let mut state = self.state.lock().await;
            state.ready.push_back(Envelope {
                message_id,
                payload,
                attempt: 0,
            });
        }
        self.notify.notify_one();
        Ok(message_id)
    }

    async fn receive(&self) -> Result<Delivery> {
        loop {
            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.promote(now);
                if let Some(envelope) = state.ready.pop_front() {
                    let handle = AckHandle::new(Uuid::new_v4());
                    let delivery = Delivery {
                        message_id: envelope.message_id,
                        payload: envelope.payload.clone(),
                        attempt: envelope.attempt,
                        handle,
                    };
                    state
                        .in_flight
                        .insert(handle, (now + self.visibility_timeout, envelope));
                    return Ok(delivery);
                }
                state.next_wake()
            };

            // A claim taken after this check expires no sooner than one
            // visibility window from now, so that bounds the idle wait.
            let wake_at = wake_at.unwrap_or_else(|| Instant::now() + self.visibility_timeout);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, handle: &AckHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| {
                PaymentError::ChannelError(format!("Unknown or expired receipt {handle}"))
            })
    }

    async fn nack(&self, handle: &AckHandle, redeliver_after: Duration) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            let (_, mut envelope) = state.in_flight.remove(handle).ok_or_else(|| {
                PaymentError::ChannelError(format!("Unknown or expired receipt {handle}"))
            })?;
            envelope.attempt += 1;
            if redeliver_after.is_zero() {
                state.ready.push_back(envelope);
            } else {
                state
                    .delayed
                    .push((Instant::now() + redeliver_after, envelope));
            }
        }
        self.notify.notify_one();
        Ok(())
    }
}

/// A thread-safe in-memory dead-letter sink, kept in arrival order.
#[derive(Default, Clone)]
pub struct InMemoryDeadLetterSink {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn send(&self, letter: DeadLetter) -> Result<()> {
        self.letters.write().await.push(letter);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.letters.read().await.clone())
    }

    async fn take(&self, message_id: Uuid) -> Result<Option<DeadLetter>> {
        let mut letters = self.letters.write().await;
        Ok(letters
            .iter()
            .position(|l| l.message_id == message_id)
            .map(|i| letters.remove(i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::{Amount, Currency, NewPayment};
    use crate::domain::task::DeadLetterCause;
    use rust_decimal_macros::dec;

    fn pending(reference: &str) -> Payment {
        let request = NewPayment::new(Amount::new(dec!(100.0)).unwrap(), Currency::Etb, reference);
        Payment::pending(request, Utc::now())
    }

    #[tokio::test]
    async fn test_in_memory_payment_store() {
        let store = InMemoryPaymentStore::new();
        let payment = pending("REF-0001");

        store.create(payment.clone()).await.unwrap();
        assert_eq!(store.get_by_id(payment.id).await.unwrap(), payment);
        assert_eq!(store.get_by_reference("REF-0001").await.unwrap(), payment);

        assert!(matches!(
            store.get_by_id(PaymentId::generate()).await,
            Err(PaymentError::NotFound(_))
        ));
        assert!(matches!(
            store.get_by_reference("REF-9999").await,
            Err(PaymentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let store = InMemoryPaymentStore::new();
        store.create(pending("REF-0001")).await.unwrap();

        let result = store.create(pending("REF-0001")).await;
        assert!(matches!(result, Err(PaymentError::AlreadyExists(r)) if r == "REF-0001"));
    }

    #[tokio::test]
    async fn test_conditional_transition() {
        let store = InMemoryPaymentStore::new();
        let payment = pending("REF-0001");
        store.create(payment.clone()).await.unwrap();

        let first = store
            .conditional_transition(payment.id, PaymentState::Pending, PaymentState::SettledFailed)
            .await
            .unwrap();
        assert_eq!(
            first,
            Transition {
                applied: true,
                state: PaymentState::SettledFailed
            }
        );

        let second = store
            .conditional_transition(payment.id, PaymentState::Pending, PaymentState::SettledSuccess)
            .await
            .unwrap();
        assert!(!second.applied);
        assert_eq!(second.state, PaymentState::SettledFailed);

        let stored = store.get_by_id(payment.id).await.unwrap();
        assert_eq!(stored.state, PaymentState::SettledFailed);
        assert!(stored.updated_at >= stored.created_at);

        assert!(matches!(
            store
                .conditional_transition(
                    PaymentId::generate(),
                    PaymentState::Pending,
                    PaymentState::SettledSuccess
                )
                .await,
            Err(PaymentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_channel_ack_removes_task() {
        let channel = InMemoryTaskChannel::new(Duration::from_secs(30));
        let message_id = channel.publish(b"task".to_vec()).await.unwrap();

        let delivery = channel.receive().await.unwrap();
        assert_eq!(delivery.message_id, message_id);
        assert_eq!(delivery.attempt, 0);
        assert_eq!(delivery.payload, b"task");
        assert_eq!(channel.in_flight_count().await, 1);

        channel.ack(&delivery.handle).await.unwrap();
        assert!(channel.is_drained().await);

        // A receipt can only be used once.
        assert!(matches!(
            channel.ack(&delivery.handle).await,
            Err(PaymentError::ChannelError(_))
        ));
    }

    #[tokio::test]
    async fn test_channel_single_claim() {
        let channel = InMemoryTaskChannel::new(Duration::from_secs(30));
        channel.publish(b"only".to_vec()).await.unwrap();

        let _claimed = channel.receive().await.unwrap();
        let second =
            tokio::time::timeout(Duration::from_millis(50), channel.receive()).await;
        assert!(second.is_err(), "claimed task must stay hidden");
        assert_eq!(channel.in_flight_count().await, 1);
    }

    #[tokio::test]
    async fn test_channel_nack_increments_attempt() {
        let channel = InMemoryTaskChannel::new(Duration::from_secs(30));
        let message_id = channel.publish(b"task".to_vec()).await.unwrap();

        let first = channel.receive().await.unwrap();
        channel.nack(&first.handle, Duration::ZERO).await.unwrap();

        let second = channel.receive().await.unwrap();
        assert_eq!(second.message_id, message_id);
        assert_eq!(second.attempt, 1);
        assert_ne!(second.handle, first.handle);

        // The old receipt is no longer valid.
        assert!(channel.ack(&first.handle).await.is_err());
        channel.ack(&second.handle).await.unwrap();
        assert!(channel.is_drained().await);
    }

    #[tokio::test]
    async fn test_channel_nack_delay() {
        let channel = InMemoryTaskChannel::new(Duration::from_secs(30));
        channel.publish(b"task".to_vec()).await.unwrap();

        let first = channel.receive().await.unwrap();
        let nacked_at = std::time::Instant::now();
        channel
            .nack(&first.handle, Duration::from_millis(80))
            .await
            .unwrap();
        assert_eq!(channel.pending_count().await, 1);

        let second = channel.receive().await.unwrap();
        assert!(nacked_at.elapsed() >= Duration::from_millis(80));
        assert_eq!(second.attempt, 1);
    }

    #[tokio::test]
    async fn test_channel_visibility_timeout_redelivers() {
        let channel = InMemoryTaskChannel::new(Duration::from_millis(50));
        let message_id = channel.publish(b"task".to_vec()).await.unwrap();

        let abandoned = channel.receive().await.unwrap();
        assert_eq!(abandoned.attempt, 0);

        let redelivered = tokio::time::timeout(Duration::from_secs(2), channel.receive())
            .await
            .expect("task should be redelivered after the visibility window")
            .unwrap();
        assert_eq!(redelivered.message_id, message_id);
        assert_eq!(redelivered.attempt, 1);
        assert!(channel.ack(&abandoned.handle).await.is_err());
    }

    #[tokio::test]
    async fn test_channel_wakes_waiting_receiver() {
        let channel = InMemoryTaskChannel::new(Duration::from_secs(30));
        let receiver = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.publish(b"late".to_vec()).await.unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(2), receiver)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn test_idle_receiver_picks_up_expired_claim() {
        let channel = InMemoryTaskChannel::new(Duration::from_millis(50));
        let receivers: Vec<_> = (0..2)
            .map(|_| {
                let channel = channel.clone();
                tokio::spawn(async move { channel.receive().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let message_id = channel.publish(b"task".to_vec()).await.unwrap();

        let mut attempts = Vec::new();
        for receiver in receivers {
            let delivery = tokio::time::timeout(Duration::from_secs(2), receiver)
                .await
                .expect("idle receiver should see the expired claim")
                .unwrap()
                .unwrap();
            assert_eq!(delivery.message_id, message_id);
            attempts.push(delivery.attempt);
        }
        attempts.sort();
        assert_eq!(attempts, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_cancelled_receive_loses_nothing() {
        let channel = InMemoryTaskChannel::new(Duration::from_secs(30));
        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), channel.receive()).await;
        assert!(cancelled.is_err());

        channel.publish(b"task".to_vec()).await.unwrap();
        assert_eq!(channel.pending_count().await, 1);
        let delivery = channel.receive().await.unwrap();
        assert_eq!(delivery.attempt, 0);
    }

    #[tokio::test]
    async fn test_dead_letter_sink() {
        let sink = InMemoryDeadLetterSink::new();
        let delivery = Delivery {
            message_id: Uuid::new_v4(),
            payload: b"{}".to_vec(),
            attempt: 2,
            handle: AckHandle::new(Uuid::new_v4()),
        };
        let letter = DeadLetter::from_delivery(
            &delivery,
            None,
            3,
            DeadLetterCause::Exhausted,
            "store unavailable",
        );

        sink.send(letter.clone()).await.unwrap();
        assert_eq!(sink.list().await.unwrap(), vec![letter.clone()]);

        assert_eq!(sink.take(delivery.message_id).await.unwrap(), Some(letter));
        assert!(sink.list().await.unwrap().is_empty());
        assert_eq!(sink.take(delivery.message_id).await.unwrap(), None);
    }
}
