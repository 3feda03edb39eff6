use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use paysettle::application::payments::PaymentService;
use paysettle::application::pool::WorkerPool;
use paysettle::application::retry::RetryPolicy;
use paysettle::application::settlement::SettlementProcessor;
use paysettle::config::SettlementConfig;
use paysettle::domain::ports::{DeadLetterSink, DecisionProviderRef, PaymentStoreRef};
use paysettle::infrastructure::decision::{BankRateDecisionProvider, StaticDecisionProvider};
use paysettle::infrastructure::in_memory::{
    InMemoryDeadLetterSink, InMemoryPaymentStore, InMemoryTaskChannel,
};
use paysettle::interfaces::csv::dead_letter_writer::DeadLetterWriter;
use paysettle::interfaces::csv::payment_reader::PaymentReader;
use paysettle::interfaces::csv::payment_writer::PaymentWriter;
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Decision {
    /// Success probability depends on the payment's bank code.
    BankRates,
    ApproveAll,
    DeclineAll,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input payments CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "PAYSETTLE_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Write dead-lettered tasks to this CSV file
    #[arg(long)]
    dead_letters: Option<PathBuf>,

    /// Number of concurrent settlement workers
    #[arg(long, env = "WORKER_CONCURRENCY", default_value_t = 4)]
    workers: usize,

    /// Deliveries per task before it is dead-lettered
    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    max_attempts: u32,

    /// Base delay for exponential redelivery backoff
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 500)]
    retry_delay_ms: u64,

    /// How long a claimed task stays hidden before it is redelivered
    #[arg(long, env = "VISIBILITY_TIMEOUT_MS", default_value_t = 30_000)]
    visibility_timeout_ms: u64,

    /// Upper bound on a single settlement decision
    #[arg(long, env = "DECISION_TIMEOUT_MS", default_value_t = 10_000)]
    decision_timeout_ms: u64,

    /// Maximum wait for in-flight tasks on shutdown
    #[arg(long, env = "SHUTDOWN_TIMEOUT_MS", default_value_t = 30_000)]
    shutdown_timeout_ms: u64,

    /// How settlement outcomes are decided
    #[arg(long, value_enum, default_value_t = Decision::BankRates)]
    decision: Decision,
}

impl Cli {
    fn settlement_config(&self) -> SettlementConfig {
        let defaults = SettlementConfig::default();
        SettlementConfig {
            worker_count: self.workers,
            retry_policy: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.retry_delay_ms),
                ..defaults.retry_policy
            },
            visibility_timeout: Duration::from_millis(self.visibility_timeout_ms),
            decision_timeout: Duration::from_millis(self.decision_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            ..defaults
        }
    }

    fn decision_provider(&self) -> DecisionProviderRef {
        match self.decision {
            Decision::BankRates => Arc::new(BankRateDecisionProvider::new()),
            Decision::ApproveAll => Arc::new(StaticDecisionProvider::approve_all()),
            Decision::DeclineAll => Arc::new(StaticDecisionProvider::decline_all()),
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<PaymentStoreRef> {
    use paysettle::infrastructure::rocksdb::RocksDbPaymentStore;

    match db_path {
        Some(path) => {
            let store = RocksDbPaymentStore::open(path).into_diagnostic()?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryPaymentStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<PaymentStoreRef> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' \
             feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryPaymentStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.settlement_config();
    config.validate().into_diagnostic()?;

    let store = open_store(cli.db_path.clone())?;
    let channel = Arc::new(InMemoryTaskChannel::new(config.visibility_timeout));
    let dead_letters = Arc::new(InMemoryDeadLetterSink::new());
    let service = PaymentService::new(store.clone(), channel.clone());

    // Intake
    let file = File::open(&cli.input).into_diagnostic()?;
    let mut seen = HashSet::new();
    let mut references = Vec::new();
    for request in PaymentReader::new(file).payments() {
        match request {
            Ok(request) => {
                if seen.insert(request.reference.clone()) {
                    references.push(request.reference.clone());
                }
                if let Err(e) = service.create_payment(request).await {
                    eprintln!("Error creating payment: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading payment: {}", e);
            }
        }
    }

    // Settlement
    let processor = Arc::new(SettlementProcessor::new(
        store.clone(),
        channel.clone(),
        dead_letters.clone(),
        cli.decision_provider(),
        &config,
    ));
    let pool = WorkerPool::start(processor, &config).into_diagnostic()?;

    let drained = async {
        while !channel.is_drained().await {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    };
    tokio::select! {
        _ = drained => info!("Task channel drained"),
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, shutting down"),
    }

    let stats = pool.shutdown().await;
    info!(
        settled = stats.settled,
        already_settled = stats.already_settled,
        retried = stats.retried,
        dead_lettered = stats.dead_lettered,
        "Settlement run finished"
    );

    // Report
    let mut payments = Vec::with_capacity(references.len());
    for reference in &references {
        match service.get_payment_by_reference(reference).await {
            Ok(payment) => payments.push(payment),
            Err(e) => warn!(reference = %reference, error = %e, "Payment not reported"),
        }
    }
    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(&payments).into_diagnostic()?;

    if let Some(path) = cli.dead_letters {
        let letters = dead_letters.list().await.into_diagnostic()?;
        let file = File::create(path).into_diagnostic()?;
        DeadLetterWriter::new(file)
            .write_dead_letters(&letters)
            .into_diagnostic()?;
    }

    Ok(())
}
