use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    execution::{ReadyAccountRequest, SubmitterConfig, TransactionSubmitter},
    funding::{Reconciler, ReconcilerConfig, SourceAccount, SourcePool},
    ledger::LedgerClient,
    scheduler::{BatchOutcome, BatchScheduler, RequestQueue, SchedulerConfig},
    wallet::Keypair,
};

const OUTCOME_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub submitter: SubmitterConfig,
    pub scheduler: SchedulerConfig,
    pub reconciler: ReconcilerConfig,
}

/// Owns the source pool and request queue and drives batches through the ledger.
pub struct ProvisioningEngine {
    config: EngineConfig,
    client: Arc<dyn LedgerClient>,
    operator: Keypair,
    /// Configured sources not yet reconciled; emptied by `start`.
    unreconciled: Mutex<Vec<SourceAccount>>,
    pool: Arc<SourcePool>,
    queue: Arc<RequestQueue>,
    submitter: Arc<TransactionSubmitter>,
    outcomes: broadcast::Sender<BatchOutcome>,
    shutdown: CancellationToken,
}

impl ProvisioningEngine {
    pub fn new(
        config: EngineConfig,
        client: Arc<dyn LedgerClient>,
        operator: Keypair,
        sources: Vec<Keypair>,
    ) -> Self {
        let submitter = Arc::new(TransactionSubmitter::new(
            client.clone(),
            config.submitter.clone(),
        ));
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);

        Self {
            config,
            client,
            operator,
            unreconciled: Mutex::new(sources.into_iter().map(SourceAccount::new).collect()),
            pool: Arc::new(SourcePool::default()),
            queue: Arc::new(RequestQueue::new()),
            submitter,
            outcomes,
            shutdown: CancellationToken::new(),
        }
    }

    /// Reconcile the configured sources, fill the pool and start the scheduler.
    ///
    /// Requests enqueued before this call are kept and picked up by the first tick.
    pub async fn start(&self) -> JoinHandle<()> {
        let sources = std::mem::take(&mut *self.unreconciled.lock());
        let reconciler = Reconciler::new(
            self.client.clone(),
            self.submitter.clone(),
            self.config.reconciler.clone(),
        );

        for source in reconciler.reconcile(&self.operator, sources).await {
            self.pool.release(source);
        }
        if self.pool.is_empty() {
            warn!("no usable source accounts, requests will wait in the queue");
        }

        let scheduler = Arc::new(BatchScheduler::new(
            self.config.scheduler.clone(),
            self.queue.clone(),
            self.pool.clone(),
            self.submitter.clone(),
            self.client.clone(),
            self.outcomes.clone(),
        ));

        info!(sources = self.pool.len(), "provisioning engine started");
        scheduler.start(self.shutdown.child_token())
    }

    /// Queue an account for creation. Never blocks and never fails.
    pub fn create_account(&self, request: ReadyAccountRequest) {
        self.queue.enqueue(request);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchOutcome> {
        self.outcomes.subscribe()
    }

    pub fn client(&self) -> Arc<dyn LedgerClient> {
        self.client.clone()
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Stop scheduling new batches. In-flight batches run to completion.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
