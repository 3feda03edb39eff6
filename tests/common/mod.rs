#![allow(dead_code)]

use async_trait::async_trait;
use paysettle::application::payments::PaymentService;
use paysettle::application::retry::RetryPolicy;
use paysettle::application::settlement::SettlementProcessor;
use paysettle::config::SettlementConfig;
use paysettle::domain::payment::{Amount, Currency, NewPayment, Payment, PaymentId, PaymentState};
use paysettle::domain::ports::{DecisionProviderRef, PaymentStore, Transition};
use paysettle::error::{PaymentError, Result};
use paysettle::infrastructure::in_memory::{
    InMemoryDeadLetterSink, InMemoryPaymentStore, InMemoryTaskChannel,
};
use rust_decimal_macros::dec;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Wraps an in-memory store and injects storage failures into
/// `conditional_transition`.
#[derive(Default)]
pub struct FlakyPaymentStore {
    inner: InMemoryPaymentStore,
    /// Number of upcoming transitions that fail before touching the row.
    failures_left: AtomicU32,
    /// Fail every transition until cleared.
    always_fail: AtomicBool,
    /// Apply the next transition, then report a failure anyway.
    lose_next_reply: AtomicBool,
    transition_calls: AtomicU32,
}

impl FlakyPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn fail_always(&self, on: bool) {
        self.always_fail.store(on, Ordering::SeqCst);
    }

    pub fn lose_next_reply(&self) {
        self.lose_next_reply.store(true, Ordering::SeqCst);
    }

    pub fn transition_calls(&self) -> u32 {
        self.transition_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentStore for FlakyPaymentStore {
    async fn create(&self, payment: Payment) -> Result<()> {
        self.inner.create(payment).await
    }

    async fn get_by_id(&self, id: PaymentId) -> Result<Payment> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Payment> {
        self.inner.get_by_reference(reference).await
    }

    async fn conditional_transition(
        &self,
        id: PaymentId,
        from: PaymentState,
        to: PaymentState,
    ) -> Result<Transition> {
        self.transition_calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(PaymentError::StorageError("database unavailable".to_string()));
        }
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(PaymentError::StorageError("database unavailable".to_string()));
        }
        let result = self.inner.conditional_transition(id, from, to).await?;
        if self.lose_next_reply.swap(false, Ordering::SeqCst) {
            return Err(PaymentError::StorageError("connection reset".to_string()));
        }
        Ok(result)
    }
}

/// Store, channel and sink wired together the way the binary wires them.
pub struct Harness {
    pub store: Arc<FlakyPaymentStore>,
    pub channel: Arc<InMemoryTaskChannel>,
    pub dead_letters: Arc<InMemoryDeadLetterSink>,
    pub service: PaymentService,
    pub config: SettlementConfig,
}

impl Harness {
    pub fn new(config: SettlementConfig) -> Self {
        let store = Arc::new(FlakyPaymentStore::new());
        let channel = Arc::new(InMemoryTaskChannel::new(config.visibility_timeout));
        let dead_letters = Arc::new(InMemoryDeadLetterSink::new());
        let service = PaymentService::new(store.clone(), channel.clone());
        Self {
            store,
            channel,
            dead_letters,
            service,
            config,
        }
    }

    pub fn processor(&self, decisions: DecisionProviderRef) -> Arc<SettlementProcessor> {
        Arc::new(SettlementProcessor::new(
            self.store.clone(),
            self.channel.clone(),
            self.dead_letters.clone(),
            decisions,
            &self.config,
        ))
    }

    pub async fn wait_drained(&self, limit: Duration) {
        tokio::time::timeout(limit, async {
            while !self.channel.is_drained().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task channel did not drain in time");
    }
}

/// Small timeouts and no backoff, so retry paths run fast.
pub fn fast_config(worker_count: usize) -> SettlementConfig {
    SettlementConfig {
        worker_count,
        retry_policy: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
        visibility_timeout: Duration::from_secs(5),
        decision_timeout: Duration::from_secs(1),
        idle_backoff: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(5),
    }
}

pub fn request(reference: &str) -> NewPayment {
    NewPayment::new(Amount::new(dec!(120.00)).unwrap(), Currency::Etb, reference)
        .with_bank_code("CBE")
}

pub fn generate_csv(path: &Path, rows: usize) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record([
        "reference",
        "amount",
        "currency",
        "bank_code",
        "description",
        "customer_name",
    ])?;

    for i in 1..=rows {
        wtr.write_record([
            format!("PAY-{i:05}").as_str(),
            "10.00",
            "USD",
            "DASHEN",
            "",
            "",
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
