//! Operator-driven redrive of dead-lettered tasks.

use crate::domain::ports::{DeadLetterSinkRef, TaskChannelRef};
use crate::error::{PaymentError, Result};
use tracing::{info, warn};
use uuid::Uuid;

/// Moves a dead letter back onto the live queue as a fresh task.
///
/// The republished task starts again at attempt 0 under a new message id,
/// which is returned. If publishing fails the entry is put back in the sink.
pub async fn redrive(
    sink: &DeadLetterSinkRef,
    channel: &TaskChannelRef,
    message_id: Uuid,
) -> Result<Uuid> {
    let letter = sink
        .take(message_id)
        .await?
        .ok_or_else(|| PaymentError::NotFound(format!("dead letter {message_id}")))?;

    match channel.publish(letter.payload.clone()).await {
        Ok(new_id) => {
            info!(
                message_id = %message_id,
                new_message_id = %new_id,
                cause = %letter.cause,
                "Dead letter redriven"
            );
            Ok(new_id)
        }
        Err(e) => {
            warn!(message_id = %message_id, error = %e, "Redrive failed, restoring dead letter");
            sink.send(letter).await?;
            Err(e)
        }
    }
}

/// Redrives every entry currently in the sink. Returns the new message ids.
pub async fn redrive_all(sink: &DeadLetterSinkRef, channel: &TaskChannelRef) -> Result<Vec<Uuid>> {
    let letters = sink.list().await?;
    let mut redriven = Vec::with_capacity(letters.len());
    for letter in letters {
        redriven.push(redrive(sink, channel, letter.message_id).await?);
    }
    Ok(redriven)
}
