//! Fixed-size pool of settlement workers sharing one task channel.

use super::settlement::{SettlementProcessor, TaskOutcome};
use crate::config::SettlementConfig;
use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{Instrument, debug, info, info_span, warn};

/// Counters of task outcomes, as seen at one point in time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub settled: u64,
    pub already_settled: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

impl PoolStats {
    /// Deliveries that reached an end, including retries.
    pub fn processed(&self) -> u64 {
        self.settled + self.already_settled + self.retried + self.dead_lettered
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    settled: AtomicU64,
    already_settled: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

impl PoolCounters {
    fn record(&self, outcome: &TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Settled { .. } => &self.settled,
            TaskOutcome::AlreadySettled { .. } => &self.already_settled,
            TaskOutcome::Retrying { .. } => &self.retried,
            TaskOutcome::DeadLettered { .. } => &self.dead_lettered,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            settled: self.settled.load(Ordering::Relaxed),
            already_settled: self.already_settled.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Runs `worker_count` workers until [`WorkerPool::shutdown`] is called.
///
/// Workers share nothing but the processor (and through it the store, the
/// channel and the dead-letter sink). A worker that is waiting for a task stops
/// immediately on shutdown; one that is processing a task finishes it first.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    counters: Arc<PoolCounters>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawns the workers on the current tokio runtime.
    pub fn start(processor: Arc<SettlementProcessor>, config: &SettlementConfig) -> Result<Self> {
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(PoolCounters::default());

        info!(workers = config.worker_count, "Worker pool starting");

        let handles = (0..config.worker_count)
            .map(|worker_id| {
                let worker = Worker {
                    processor: Arc::clone(&processor),
                    counters: Arc::clone(&counters),
                    idle_backoff: config.idle_backoff,
                };
                let shutdown = shutdown_rx.clone();
                tokio::spawn(
                    worker
                        .run(shutdown)
                        .instrument(info_span!("worker", worker_id)),
                )
            })
            .collect();

        Ok(Self {
            shutdown_tx,
            handles,
            counters,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Signals every worker to stop and waits up to the configured shutdown
    /// timeout for in-flight tasks. Workers still running after that are
    /// aborted; their tasks stay unacknowledged and will be redelivered.
    pub async fn shutdown(self) -> PoolStats {
        let _ = self.shutdown_tx.send(true);

        let aborts: Vec<AbortHandle> = self.handles.iter().map(JoinHandle::abort_handle).collect();
        let all_workers = async {
            for handle in self.handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Worker terminated abnormally");
                }
            }
        };

        match tokio::time::timeout(self.shutdown_timeout, all_workers).await {
            Ok(()) => info!("Worker pool stopped gracefully"),
            Err(_) => {
                warn!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "Shutdown timeout exceeded, aborting remaining workers"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        self.counters.snapshot()
    }
}

struct Worker {
    processor: Arc<SettlementProcessor>,
    counters: Arc<PoolCounters>,
    idle_backoff: Duration,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!("Worker started");
        let channel = Arc::clone(self.processor.channel());

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Only the wait for a task is raced against shutdown. Once a task
            // is claimed it is processed to the end.
            let received = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                received = channel.receive() => received,
            };

            match received {
                Ok(delivery) => {
                    let outcome = self.processor.process(delivery).await;
                    self.counters.record(&outcome);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to receive task");
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(self.idle_backoff) => {}
                    }
                }
            }
        }

        debug!("Worker stopped");
    }
}
