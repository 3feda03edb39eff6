//! Runtime configuration for the settlement worker.

use crate::application::retry::RetryPolicy;
use crate::error::{PaymentError, Result};
use std::time::Duration;

/// Controls pool size, retry behavior and timeouts.
///
/// The pool size should track expected I/O concurrency (decision provider and
/// store round trips), not core count.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Number of concurrent workers. Default: 4.
    pub worker_count: usize,
    /// Redelivery budget and backoff.
    pub retry_policy: RetryPolicy,
    /// How long a claimed, unacknowledged task stays hidden before the
    /// channel redelivers it. Default: 30 seconds.
    pub visibility_timeout: Duration,
    /// Upper bound on a single decision provider call. Default: 10 seconds.
    pub decision_timeout: Duration,
    /// Pause after a failed `receive` before polling again. Default: 100ms.
    pub idle_backoff: Duration,
    /// Maximum wait for in-flight tasks during shutdown. Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            retry_policy: RetryPolicy::default(),
            visibility_timeout: Duration::from_secs(30),
            decision_timeout: Duration::from_secs(10),
            idle_backoff: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl SettlementConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(PaymentError::ValidationError(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.retry_policy.max_attempts == 0 {
            return Err(PaymentError::ValidationError(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
