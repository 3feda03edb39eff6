use crate::domain::payment::{NewPayment, Payment, PaymentId};
use crate::domain::ports::{PaymentStoreRef, TaskChannelRef};
use crate::domain::task::SettlementTask;
use crate::error::Result;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Producer side of the pipeline: creates payments and publishes their
/// settlement tasks.
///
/// A task is only ever published after the payment has been durably stored.
/// A publish failure does not undo the payment; it stays `Pending` until a
/// task for it is published again.
pub struct PaymentService {
    store: PaymentStoreRef,
    channel: TaskChannelRef,
}

impl PaymentService {
    pub fn new(store: PaymentStoreRef, channel: TaskChannelRef) -> Self {
        Self { store, channel }
    }

    /// Validates, persists and enqueues a new payment.
    ///
    /// Fails with `ValidationError` or `AlreadyExists` without publishing
    /// anything. Succeeds even if the publish step fails.
    pub async fn create_payment(&self, request: NewPayment) -> Result<Payment> {
        request.validate()?;

        let payment = Payment::pending(request, Utc::now());
        self.store.create(payment.clone()).await?;

        info!(
            payment_id = %payment.id,
            reference = %payment.reference,
            amount = %payment.amount,
            currency = %payment.currency,
            "Payment created"
        );

        if let Err(e) = self.publish_settlement(payment.id).await {
            warn!(
                payment_id = %payment.id,
                error = %e,
                "Failed to publish settlement task; payment stays pending"
            );
        }

        Ok(payment)
    }

    /// Publishes a settlement task for an already persisted payment.
    pub async fn publish_settlement(&self, payment_id: PaymentId) -> Result<Uuid> {
        let payload = SettlementTask::payment_created(payment_id).encode()?;
        let message_id = self.channel.publish(payload).await?;
        debug!(payment_id = %payment_id, message_id = %message_id, "Settlement task published");
        Ok(message_id)
    }

    pub async fn get_payment(&self, id: PaymentId) -> Result<Payment> {
        self.store.get_by_id(id).await
    }

    pub async fn get_payment_by_reference(&self, reference: &str) -> Result<Payment> {
        self.store.get_by_reference(reference).await
    }
}
