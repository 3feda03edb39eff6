use crate::domain::payment::Payment;
use crate::domain::ports::{DecisionProvider, SettlementOutcome};
use crate::error::Result;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// Always returns the same outcome. Useful for dry runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticDecisionProvider {
    outcome: SettlementOutcome,
}

impl StaticDecisionProvider {
    pub fn new(outcome: SettlementOutcome) -> Self {
        Self { outcome }
    }

    pub fn approve_all() -> Self {
        Self::new(SettlementOutcome::Success)
    }

    pub fn decline_all() -> Self {
        Self::new(SettlementOutcome::Failure)
    }
}

#[async_trait]
impl DecisionProvider for StaticDecisionProvider {
    async fn decide(&self, _payment: &Payment) -> Result<SettlementOutcome> {
        Ok(self.outcome)
    }
}

/// Simulates an external settlement network whose success rate depends on
/// the payment's processing bank.
#[derive(Debug, Clone, Default)]
pub struct BankRateDecisionProvider {
    latency: Option<(Duration, Duration)>,
}

impl BankRateDecisionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for a random duration in `[min, max]` before each decision.
    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.latency = Some((min, max.max(min)));
        self
    }

    pub fn success_rate(bank_code: Option<&str>) -> f64 {
        match bank_code.map(str::to_ascii_uppercase).as_deref() {
            Some("CBE") => 0.95,
            Some("AWASH") => 0.90,
            Some("DASHEN") => 0.88,
            Some("ABYSSINIA") => 0.92,
            _ => 0.85,
        }
    }
}

#[async_trait]
impl DecisionProvider for BankRateDecisionProvider {
    async fn decide(&self, payment: &Payment) -> Result<SettlementOutcome> {
        if let Some((min, max)) = self.latency {
            let delay = rand::thread_rng().gen_range(min..=max);
            tokio::time::sleep(delay).await;
        }

        let rate = Self::success_rate(payment.bank_code.as_deref());
        let outcome = if rand::thread_rng().gen_bool(rate) {
            SettlementOutcome::Success
        } else {
            SettlementOutcome::Failure
        };
        Ok(outcome)
    }
}
