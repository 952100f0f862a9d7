use std::{sync::Arc, time::Duration};

use tokio::time;
use tracing::{debug, error, info, instrument, warn};

use super::transaction::{ReadyAccountRequest, TransactionBody, TransactionEnvelope};
use crate::{
    error::{LedgerError, SubmitError},
    ledger::{models::Amount, LedgerClient},
    wallet::Keypair,
};

#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub network_id: Vec<u8>,
    pub base_fee: Amount,
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            network_id: Vec::new(),
            base_fee: Amount(10_000),
            confirm_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// A batch whose every target was observed with the requested balance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub hash: String,
    pub source: String,
    pub sequence_number: u64,
    pub targets: Vec<String>,
}

/// Builds, signs and submits create-account transactions, then waits until the
/// network shows the result.
pub struct TransactionSubmitter {
    client: Arc<dyn LedgerClient>,
    config: SubmitterConfig,
}

impl TransactionSubmitter {
    pub fn new(client: Arc<dyn LedgerClient>, config: SubmitterConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    /// Submit one transaction paying for every request from `source`.
    ///
    /// The sequence number is read fresh on every call, so a retry always
    /// produces a new transaction rather than resending an old one.
    #[instrument(skip(self, source, requests), fields(source = %source.address(), ops = requests.len()))]
    pub async fn submit(
        &self,
        source: &Keypair,
        requests: &[ReadyAccountRequest],
    ) -> Result<Confirmation, SubmitError> {
        let account = self
            .client
            .get_account(source.address())
            .await
            .map_err(|error| SubmitError::SourceUnavailable {
                source_address: source.address().to_string(),
                error,
            })?;

        let envelope = TransactionBody::create_accounts(
            source.address(),
            account.sequence_number,
            self.config.base_fee,
            requests,
        )?
        .sign(source, &self.config.network_id)?;

        debug!(hash = %envelope.hash, sequence = account.sequence_number, "submitting transaction");

        if let Err(error) = self.client.submit_transaction(&envelope).await {
            warn!(hash = %envelope.hash, %error, retryable = error.is_retryable(), "transaction submission failed");
            return Err(SubmitError::Rejected {
                hash: envelope.hash,
                error,
            });
        }

        let confirmation = self.confirm(&envelope).await?;
        info!(hash = %confirmation.hash, created = confirmation.targets.len(), "transaction confirmed");
        Ok(confirmation)
    }

    /// Poll until `envelope` is confirmed and every target carries its balance.
    pub async fn confirm(&self, envelope: &TransactionEnvelope) -> Result<Confirmation, SubmitError> {
        let timeout = self.config.confirm_timeout;

        match time::timeout(timeout, self.wait_for_confirmation(envelope)).await {
            Ok(result) => result,
            Err(_) => {
                error!(hash = %envelope.hash, "failed to confirm transaction before timeout");
                Err(SubmitError::Timeout {
                    hash: envelope.hash.clone(),
                    timeout_ms: timeout.as_millis(),
                })
            }
        }
    }

    async fn wait_for_confirmation(
        &self,
        envelope: &TransactionEnvelope,
    ) -> Result<Confirmation, SubmitError> {
        loop {
            match self.client.get_transaction(&envelope.hash).await {
                Ok(_) => {
                    if let Some(result) = self.check_targets(envelope).await {
                        return result;
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => debug!(hash = %envelope.hash, error = %e, "transaction lookup failed"),
            }

            time::sleep(self.config.poll_interval).await;
        }
    }

    /// `None` while some target cannot be read yet.
    async fn check_targets(
        &self,
        envelope: &TransactionEnvelope,
    ) -> Option<Result<Confirmation, SubmitError>> {
        let mut targets = Vec::with_capacity(envelope.body.operations.len());

        for (target, expected) in envelope.targets() {
            match self.client.get_account(target).await {
                Ok(account) if account.balance == expected => targets.push(target.to_string()),
                Ok(account) => {
                    error!(
                        hash = %envelope.hash,
                        target,
                        expected = %expected,
                        observed = %account.balance,
                        "created account balance mismatch"
                    );
                    return Some(Err(SubmitError::Mismatch {
                        hash: envelope.hash.clone(),
                        target: target.to_string(),
                        expected,
                        observed: account.balance,
                    }));
                }
                Err(LedgerError::NotFound(_)) => return None,
                Err(e) => {
                    debug!(target, error = %e, "target lookup failed");
                    return None;
                }
            }
        }

        Some(Ok(Confirmation {
            hash: envelope.hash.clone(),
            source: envelope.body.source.clone(),
            sequence_number: envelope.body.sequence_number,
            targets,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mock::{MockLedger, SubmitMode};

    const NETWORK: &[u8] = b"submitter-test";

    fn setup() -> (Arc<MockLedger>, TransactionSubmitter, Keypair) {
        let ledger = Arc::new(MockLedger::new(NETWORK));
        let source = Keypair::random();
        ledger.fund(source.address(), 1_000_000_000);
        let submitter = TransactionSubmitter::new(
            ledger.clone(),
            SubmitterConfig {
                network_id: NETWORK.to_vec(),
                base_fee: Amount(100),
                confirm_timeout: Duration::from_secs(10),
                poll_interval: Duration::from_millis(500),
            },
        );
        (ledger, submitter, source)
    }

    fn requests(n: usize, balance: u64) -> Vec<ReadyAccountRequest> {
        (0..n)
            .map(|_| ReadyAccountRequest::new(Keypair::random().address(), Amount(balance)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_creates_every_target() {
        let (ledger, submitter, source) = setup();
        let batch = requests(3, 5_000);

        let confirmation = submitter.submit(&source, &batch).await.unwrap();

        assert_eq!(confirmation.targets.len(), 3);
        assert_eq!(confirmation.sequence_number, 0);
        for request in &batch {
            assert_eq!(ledger.account(&request.target).unwrap().balance, request.balance);
        }
        let remaining = ledger.account(source.address()).unwrap();
        assert_eq!(remaining.balance, Amount(1_000_000_000 - 15_000 - 300));
        assert_eq!(remaining.sequence_number, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_is_fetched_fresh_each_time() {
        let (ledger, submitter, source) = setup();

        submitter.submit(&source, &requests(1, 10)).await.unwrap();
        let second = submitter.submit(&source, &requests(1, 10)).await.unwrap();

        assert_eq!(second.sequence_number, 1);
        let sent = ledger.submitted();
        assert_eq!(sent.len(), 2);
        assert_ne!(sent[0].hash, sent[1].hash);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_returns_without_polling() {
        let (ledger, submitter, source) = setup();
        ledger.set_mode(SubmitMode::RejectAll);

        let err = submitter.submit(&source, &requests(2, 10)).await.unwrap_err();

        assert!(matches!(err, SubmitError::Rejected { .. }));
        // only the sequence lookup
        assert_eq!(ledger.account_lookups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_source_is_reported() {
        let (_, submitter, _) = setup();
        let stranger = Keypair::random();

        let err = submitter.submit(&stranger, &requests(1, 10)).await.unwrap_err();

        assert!(matches!(err, SubmitError::SourceUnavailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_confirming_transaction_times_out() {
        let (ledger, submitter, source) = setup();
        ledger.set_mode(SubmitMode::NeverConfirm);

        let started = time::Instant::now();
        let err = submitter.submit(&source, &requests(1, 10)).await.unwrap_err();

        assert!(matches!(err, SubmitError::Timeout { timeout_ms: 10_000, .. }));
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_target_twice_is_rejected_whole() {
        let (ledger, submitter, source) = setup();
        let target = Keypair::random().address().to_string();
        let batch = vec![
            ReadyAccountRequest::new(target.clone(), Amount(10)),
            ReadyAccountRequest::new(target.clone(), Amount(10)),
        ];

        let err = submitter.submit(&source, &batch).await.unwrap_err();

        assert!(matches!(err, SubmitError::Rejected { .. }));
        assert!(ledger.account(&target).is_none());
        assert_eq!(ledger.account(source.address()).unwrap().sequence_number, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_mismatch_is_never_success() {
        let (ledger, submitter, source) = setup();
        let batch = requests(2, 1_000);
        ledger.distort(&batch[1].target, 999);

        let err = submitter.submit(&source, &batch).await.unwrap_err();

        match err {
            SubmitError::Mismatch {
                target,
                expected,
                observed,
                ..
            } => {
                assert_eq!(target, batch[1].target);
                assert_eq!(expected, Amount(1_000));
                assert_eq!(observed, Amount(999));
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transaction_landing_late_within_timeout_confirms() {
        let (ledger, submitter, source) = setup();
        ledger.set_mode(SubmitMode::Hold);
        let batch = requests(1, 42);

        let lander = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                time::sleep(Duration::from_secs(3)).await;
                ledger.land_held();
            })
        };

        let confirmation = submitter.submit(&source, &batch).await.unwrap();
        lander.await.unwrap();
        assert_eq!(confirmation.targets, vec![batch[0].target.clone()]);
    }
}
