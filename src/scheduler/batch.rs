use std::{collections::HashSet, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::{
    queue::{PendingRequest, RequestQueue},
    retry::RetryPolicy,
};
use crate::{
    error::{LedgerError, SubmitError},
    execution::{ReadyAccountRequest, TransactionSubmitter},
    funding::{SourceAccount, SourcePool},
    ledger::{models::Amount, LedgerClient},
};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Most requests folded into one transaction.
    pub batch_limit: usize,
    pub tick_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_limit: 300,
            tick_interval: Duration::from_secs(3),
            retry: RetryPolicy::default(),
        }
    }
}

/// What happened to the requests of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Created {
        batch_id: Uuid,
        source: String,
        hash: String,
        targets: Vec<String>,
    },
    Retrying {
        batch_id: Uuid,
        source: String,
        targets: Vec<String>,
        error: String,
    },
    /// The failed batch had in fact landed for this target.
    LateConfirmed { batch_id: Uuid, target: String },
    Mismatch {
        batch_id: Uuid,
        target: String,
        expected: Amount,
        observed: Amount,
    },
    Abandoned {
        batch_id: Uuid,
        target: String,
        attempts: u32,
        reason: String,
    },
}

/// Result of a single scheduler tick
#[derive(Debug)]
pub enum TickOutcome {
    Idle,
    /// Every source was busy; the drained entries went back to the queue head.
    NoSource { returned: usize },
    Dispatched {
        batch_id: Uuid,
        size: usize,
        handle: JoinHandle<()>,
    },
}

struct Batch {
    id: Uuid,
    entries: Vec<PendingRequest>,
    source: SourceAccount,
}

/// Drains the request queue into batches and runs each on its own source
pub struct BatchScheduler {
    config: SchedulerConfig,
    queue: Arc<RequestQueue>,
    pool: Arc<SourcePool>,
    submitter: Arc<TransactionSubmitter>,
    client: Arc<dyn LedgerClient>,
    outcomes: broadcast::Sender<BatchOutcome>,
}

impl BatchScheduler {
    pub fn new(
        config: SchedulerConfig,
        queue: Arc<RequestQueue>,
        pool: Arc<SourcePool>,
        submitter: Arc<TransactionSubmitter>,
        client: Arc<dyn LedgerClient>,
        outcomes: broadcast::Sender<BatchOutcome>,
    ) -> Self {
        Self {
            config,
            queue,
            pool,
            submitter,
            client,
            outcomes,
        }
    }

    /// Start ticking in the background until `shutdown` fires.
    ///
    /// Batches already dispatched keep running after shutdown.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.tick_interval;
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                batch_limit = self.config.batch_limit,
                tick_ms = period.as_millis() as u64,
                "batch scheduler started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        self.tick();
                    }
                }
            }

            info!(pending = self.queue.len(), "batch scheduler stopped");
        })
    }

    /// Run one scheduling step.
    pub fn tick(&self) -> TickOutcome {
        let entries = self
            .queue
            .pop_eligible(self.config.batch_limit, Instant::now());
        if entries.is_empty() {
            return TickOutcome::Idle;
        }

        let Some(source) = self.pool.acquire() else {
            let returned = entries.len();
            debug!(returned, pending = self.queue.len() + returned, "no source available");
            self.queue.return_front(entries);
            return TickOutcome::NoSource { returned };
        };

        let (entries, duplicates) = split_duplicate_targets(entries);
        if !duplicates.is_empty() {
            debug!(deferred = duplicates.len(), "holding back repeated targets");
            self.queue.return_front(duplicates);
        }

        let batch = Batch {
            id: Uuid::new_v4(),
            entries,
            source,
        };
        let batch_id = batch.id;
        let size = batch.entries.len();

        info!(
            %batch_id,
            source = %batch.source.address(),
            size,
            pending = self.queue.len(),
            "dispatching batch"
        );

        let worker = BatchWorker {
            retry: self.config.retry.clone(),
            queue: self.queue.clone(),
            pool: self.pool.clone(),
            submitter: self.submitter.clone(),
            client: self.client.clone(),
            outcomes: self.outcomes.clone(),
        };
        let span = tracing::info_span!("batch", %batch_id);
        let handle = tokio::spawn(worker.run(batch).instrument(span));

        TickOutcome::Dispatched {
            batch_id,
            size,
            handle,
        }
    }
}

/// A transaction may create each target only once; later repeats wait for another batch.
fn split_duplicate_targets(entries: Vec<PendingRequest>) -> (Vec<PendingRequest>, Vec<PendingRequest>) {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .partition(|p| seen.insert(p.request.target.clone()))
}

/// Everything a dispatched batch needs, detached from the scheduler
struct BatchWorker {
    retry: RetryPolicy,
    queue: Arc<RequestQueue>,
    pool: Arc<SourcePool>,
    submitter: Arc<TransactionSubmitter>,
    client: Arc<dyn LedgerClient>,
    outcomes: broadcast::Sender<BatchOutcome>,
}

impl BatchWorker {
    async fn run(self, batch: Batch) {
        let Batch {
            id,
            entries,
            source,
        } = batch;
        let requests: Vec<ReadyAccountRequest> =
            entries.iter().map(|p| p.request.clone()).collect();

        let result = self.submitter.submit(source.keypair(), &requests).await;
        let source_address = source.address().to_string();
        self.pool.release(source);

        match result {
            Ok(confirmation) => {
                info!(hash = %confirmation.hash, created = confirmation.targets.len(), "batch created");
                self.emit(BatchOutcome::Created {
                    batch_id: id,
                    source: source_address,
                    hash: confirmation.hash,
                    targets: confirmation.targets,
                });
            }
            Err(err) => {
                warn!(source = %source_address, error = %err, size = entries.len(), "batch failed");
                self.handle_failure(id, &source_address, entries, err).await;
            }
        }
    }

    /// Settle what already landed, then requeue the rest under the retry policy.
    async fn handle_failure(
        &self,
        batch_id: Uuid,
        source: &str,
        entries: Vec<PendingRequest>,
        err: SubmitError,
    ) {
        if err.is_ambiguous() {
            debug!("batch outcome unknown, re-checking targets");
        }
        let observed = join_all(
            entries
                .iter()
                .map(|p| self.client.get_account(&p.request.target)),
        )
        .await;

        let now = Instant::now();
        let mut retry = Vec::with_capacity(entries.len());

        for (mut entry, lookup) in entries.into_iter().zip(observed) {
            let target = entry.request.target.clone();
            match lookup {
                Ok(account) if account.balance == entry.request.balance => {
                    info!(target = %target, "account exists with requested balance after failed batch");
                    self.emit(BatchOutcome::LateConfirmed { batch_id, target });
                    continue;
                }
                Ok(account) => {
                    error!(
                        target = %target,
                        expected = %entry.request.balance,
                        observed = %account.balance,
                        "account exists with unexpected balance, dropping request"
                    );
                    self.emit(BatchOutcome::Mismatch {
                        batch_id,
                        target,
                        expected: entry.request.balance,
                        observed: account.balance,
                    });
                    continue;
                }
                Err(LedgerError::NotFound(_)) => {}
                Err(e) => debug!(target = %target, error = %e, "could not re-check target"),
            }

            entry.attempts += 1;
            if !self.retry.allows(entry.attempts) {
                error!(
                    target = %target,
                    attempts = entry.attempts,
                    error = %err,
                    "abandoning account request after repeated failures"
                );
                self.emit(BatchOutcome::Abandoned {
                    batch_id,
                    target,
                    attempts: entry.attempts,
                    reason: err.to_string(),
                });
                continue;
            }

            let backoff = self.retry.backoff(entry.attempts);
            entry.not_before = (!backoff.is_zero()).then(|| now + backoff);
            retry.push(entry);
        }

        if retry.is_empty() {
            return;
        }

        let targets = retry.iter().map(|p| p.request.target.clone()).collect();
        debug!(requeued = retry.len(), "returning failed requests to queue");
        self.queue.requeue(retry);
        self.emit(BatchOutcome::Retrying {
            batch_id,
            source: source.to_string(),
            targets,
            error: err.to_string(),
        });
    }

    fn emit(&self, outcome: BatchOutcome) {
        // no subscribers is fine
        let _ = self.outcomes.send(outcome);
    }
}
