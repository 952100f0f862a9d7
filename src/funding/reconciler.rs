// Startup reconciliation of source accounts
//
// 1. Look up every configured source on the ledger (bounded worker set)
// 2. Split into existing / missing
// 3. Create the missing ones from the operator account, one chunk at a time
// 4. Hand back everything usable

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::pool::SourceAccount;
use crate::{
    error::LedgerError,
    execution::{ReadyAccountRequest, TransactionSubmitter},
    ledger::{
        models::{AccountRecord, Amount},
        LedgerClient,
    },
    wallet::Keypair,
};

/// Submissions per chunk: the first try plus one for members still missing.
const CHUNK_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub workers: usize,
    pub batch_limit: usize,
    pub initial_source_balance: Amount,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: 50,
            batch_limit: 300,
            initial_source_balance: Amount(1_000_000_000_000),
        }
    }
}

/// Sources split by whether the ledger already knows them, each sorted by address
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub existing: Vec<SourceAccount>,
    pub missing: Vec<SourceAccount>,
}

pub struct Reconciler {
    client: Arc<dyn LedgerClient>,
    submitter: Arc<TransactionSubmitter>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        submitter: Arc<TransactionSubmitter>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            client,
            submitter,
            config,
        }
    }

    /// Classify, then create what is missing. Returns the sources safe to pool.
    pub async fn reconcile(
        &self,
        operator: &Keypair,
        sources: Vec<SourceAccount>,
    ) -> Vec<SourceAccount> {
        let total = sources.len();
        let Reconciliation {
            mut existing,
            missing,
        } = self.classify(sources).await;

        info!(
            total,
            existing = existing.len(),
            missing = missing.len(),
            "source accounts checked"
        );

        let created = self.create_missing(operator, missing).await;
        existing.extend(created);

        info!(usable = existing.len(), unusable = total - existing.len(), "✓ source reconciliation done");
        existing
    }

    /// Look every source up concurrently with at most `workers` lookups in flight.
    pub async fn classify(&self, sources: Vec<SourceAccount>) -> Reconciliation {
        let expected = sources.len();
        if expected == 0 {
            return Reconciliation::default();
        }

        let (job_tx, job_rx) = mpsc::channel::<SourceAccount>(expected);
        let (result_tx, mut result_rx) =
            mpsc::channel::<(SourceAccount, Result<AccountRecord, LedgerError>)>(expected);

        for source in sources {
            // capacity equals the job count, so this never waits
            if job_tx.send(source).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let job_rx = Arc::new(Mutex::new(job_rx));
        let workers = self.config.workers.clamp(1, expected);
        for _ in 0..workers {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let client = self.client.clone();
            tokio::spawn(async move {
                loop {
                    let next = jobs.lock().await.recv().await;
                    let Some(source) = next else { break };
                    let lookup = client.get_account(source.address()).await;
                    if results.send((source, lookup)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut out = Reconciliation::default();
        for _ in 0..expected {
            let Some((mut source, lookup)) = result_rx.recv().await else {
                break;
            };
            match lookup {
                Ok(account) => {
                    source.last_known_balance = account.balance;
                    out.existing.push(source);
                }
                Err(LedgerError::NotFound(_)) => out.missing.push(source),
                Err(e) => {
                    warn!(source = %source.address(), error = %e, "source lookup failed, treating as missing");
                    out.missing.push(source);
                }
            }
        }

        out.existing.sort_by(|a, b| a.address().cmp(b.address()));
        out.missing.sort_by(|a, b| a.address().cmp(b.address()));
        out
    }

    /// Create `missing` sources from `operator` in chunks of at most `batch_limit`.
    ///
    /// Chunks run one after another; a failed chunk never stops the next one.
    pub async fn create_missing(
        &self,
        operator: &Keypair,
        missing: Vec<SourceAccount>,
    ) -> Vec<SourceAccount> {
        let limit = self.config.batch_limit.max(1);
        let mut created = Vec::with_capacity(missing.len());
        let mut rest = missing;

        while !rest.is_empty() {
            let tail = rest.split_off(limit.min(rest.len()));
            let chunk = std::mem::replace(&mut rest, tail);
            created.extend(self.create_chunk(operator, chunk).await);
        }

        created
    }

    /// Submit one chunk. After a failure every member is looked up again:
    /// members that exist are kept, members still missing are resubmitted once.
    async fn create_chunk(&self, operator: &Keypair, chunk: Vec<SourceAccount>) -> Vec<SourceAccount> {
        let balance = self.config.initial_source_balance;
        let mut usable = Vec::with_capacity(chunk.len());
        let mut pending = chunk;

        for attempt in 1..=CHUNK_ATTEMPTS {
            if pending.is_empty() {
                break;
            }

            let requests: Vec<_> = pending
                .iter()
                .map(|s| ReadyAccountRequest::new(s.address(), balance))
                .collect();

            debug!(size = pending.len(), attempt, "creating source accounts");
            match self.submitter.submit(operator, &requests).await {
                Ok(confirmation) => {
                    info!(hash = %confirmation.hash, created = pending.len(), "source accounts created");
                    for source in pending.iter_mut() {
                        source.last_known_balance = balance;
                    }
                    usable.append(&mut pending);
                }
                Err(e) => {
                    error!(error = %e, size = pending.len(), attempt, "failed to create source accounts");
                    let (found, still_missing) = self.recheck(pending).await;
                    usable.extend(found);
                    pending = still_missing;
                }
            }
        }

        if !pending.is_empty() {
            error!(
                sources = ?pending.iter().map(|s| s.address()).collect::<Vec<_>>(),
                "source accounts could not be created"
            );
        }
        usable
    }

    /// Split sources into those the ledger shows and those it reports missing.
    /// Sources that still cannot be looked up are left out of both.
    async fn recheck(&self, sources: Vec<SourceAccount>) -> (Vec<SourceAccount>, Vec<SourceAccount>) {
        let lookups = join_all(sources.iter().map(|s| self.client.get_account(s.address()))).await;

        let mut found = Vec::new();
        let mut missing = Vec::new();
        for (mut source, lookup) in sources.into_iter().zip(lookups) {
            match lookup {
                Ok(account) => {
                    info!(source = %source.address(), balance = %account.balance, "source account exists");
                    source.last_known_balance = account.balance;
                    found.push(source);
                }
                Err(LedgerError::NotFound(_)) => missing.push(source),
                Err(e) => {
                    warn!(source = %source.address(), error = %e, "source still unreachable, leaving it out");
                }
            }
        }
        (found, missing)
    }
}
