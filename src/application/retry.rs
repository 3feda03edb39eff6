//! Retry and dead-letter policy for settlement tasks.

use std::time::Duration;

/// Where a task stands in its retry budget, given its delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    /// First delivery (attempt 0).
    Fresh,
    /// Redelivery with budget left (1..max-1).
    Retrying,
    /// Budget spent (attempt >= max). Never settled again automatically.
    Exhausted,
}

/// What to do with a task whose delivery just failed transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave it unacknowledged and let the channel redeliver after `after`.
    Redeliver { after: Duration },
    /// Remove it from the live queue and forward it to the dead-letter sink.
    DeadLetter { attempts: u32 },
}

/// Bounded redelivery with exponential backoff.
///
/// The delay before attempt N+1 is `min(base_delay * 2^(N-1), max_delay)`,
/// where N is the 1-based number of the attempt that failed. With the
/// defaults (max 3, base 500ms) a task that always fails transiently is
/// delivered three times, redelivered twice, then dead-lettered.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of deliveries, including the first one.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Classifies a delivery attempt (0-based, as carried on the envelope).
    pub fn phase(&self, attempt: u32) -> AttemptPhase {
        if attempt >= self.max_attempts {
            AttemptPhase::Exhausted
        } else if attempt == 0 {
            AttemptPhase::Fresh
        } else {
            AttemptPhase::Retrying
        }
    }

    /// Decides the fate of a delivery whose processing failed transiently.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The delivery attempt that failed (0-based)
    pub fn on_transient_failure(&self, attempt: u32) -> RetryDecision {
        let failed = attempt.saturating_add(1);
        if failed >= self.max_attempts {
            RetryDecision::DeadLetter { attempts: failed }
        } else {
            RetryDecision::Redeliver {
                after: self.backoff_duration(failed),
            }
        }
    }

    /// Backoff before the next delivery.
    ///
    /// # Arguments
    ///
    /// * `failed_attempt` - The attempt number that just failed (1-based)
    pub fn backoff_duration(&self, failed_attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }
}
