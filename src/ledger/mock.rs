//! In-memory ledger used by tests across the crate.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    client::LedgerClient,
    models::{AccountRecord, Amount, TransactionRecord},
};
use crate::{error::LedgerError, execution::transaction::TransactionEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Validate and apply immediately.
    Apply,
    /// Refuse every submission as a validation failure.
    RejectAll,
    /// Accept but never apply; confirmation polls see nothing.
    NeverConfirm,
    /// Accept and hold until `land_held` is called.
    Hold,
    /// Apply, but never answer transaction lookups for it.
    Unindexed,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, AccountRecord>,
    transactions: HashMap<String, TransactionRecord>,
    held: Vec<TransactionEnvelope>,
    submitted: Vec<TransactionEnvelope>,
    distort: HashMap<String, Amount>,
    in_flight: HashSet<String>,
    overlaps: Vec<String>,
    unreachable: HashSet<String>,
}

pub struct MockLedger {
    network_id: Vec<u8>,
    state: Mutex<State>,
    mode: Mutex<SubmitMode>,
    transient_failures: AtomicUsize,
    submit_delay: Mutex<Duration>,
    account_lookups: AtomicUsize,
}

impl MockLedger {
    pub fn new(network_id: &[u8]) -> Self {
        Self {
            network_id: network_id.to_vec(),
            state: Mutex::new(State::default()),
            mode: Mutex::new(SubmitMode::Apply),
            transient_failures: AtomicUsize::new(0),
            submit_delay: Mutex::new(Duration::ZERO),
            account_lookups: AtomicUsize::new(0),
        }
    }

    pub fn fund(&self, address: &str, balance: u64) {
        self.state.lock().accounts.insert(
            address.to_string(),
            AccountRecord {
                address: address.to_string(),
                balance: Amount(balance),
                sequence_number: 0,
            },
        );
    }

    pub fn set_mode(&self, mode: SubmitMode) {
        *self.mode.lock() = mode;
    }

    /// Fail the next `n` submissions with a transport error.
    pub fn fail_next_submissions(&self, n: usize) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock() = delay;
    }

    /// Credit `amount` instead of the requested balance when `target` is created.
    pub fn distort(&self, target: &str, amount: u64) {
        self.state.lock().distort.insert(target.to_string(), Amount(amount));
    }

    /// Make account lookups for `address` fail with a transport error.
    pub fn make_unreachable(&self, address: &str) {
        self.state.lock().unreachable.insert(address.to_string());
    }

    /// Apply every held transaction.
    pub fn land_held(&self) {
        let mut state = self.state.lock();
        let held = std::mem::take(&mut state.held);
        for envelope in held {
            let _ = apply(&mut state, &envelope);
        }
    }

    pub fn account(&self, address: &str) -> Option<AccountRecord> {
        self.state.lock().accounts.get(address).cloned()
    }

    pub fn submitted(&self) -> Vec<TransactionEnvelope> {
        self.state.lock().submitted.clone()
    }

    /// Sources seen in two submissions at once.
    pub fn overlaps(&self) -> Vec<String> {
        self.state.lock().overlaps.clone()
    }

    pub fn account_lookups(&self) -> usize {
        self.account_lookups.load(Ordering::SeqCst)
    }
}

fn apply(state: &mut State, envelope: &TransactionEnvelope) -> Result<(), LedgerError> {
    let body = &envelope.body;
    let reject = |reason: String| LedgerError::Rejected { status: 400, reason };

    let source = state
        .accounts
        .get(&body.source)
        .cloned()
        .ok_or_else(|| reject(format!("source {} does not exist", body.source)))?;

    if source.sequence_number != body.sequence_number {
        return Err(reject(format!(
            "sequence mismatch: account at {}, transaction at {}",
            source.sequence_number, body.sequence_number
        )));
    }

    let mut total = body.fee;
    let mut seen = HashSet::new();
    for (target, amount) in envelope.targets() {
        if state.accounts.contains_key(target) {
            return Err(reject(format!("account {} already exists", target)));
        }
        if !seen.insert(target) {
            return Err(reject(format!("account {} created twice", target)));
        }
        total = total
            .checked_add(amount)
            .ok_or_else(|| reject("amount overflow".into()))?;
    }

    let remaining = source
        .balance
        .checked_sub(total)
        .ok_or_else(|| reject("insufficient funds".into()))?;

    let entry = state
        .accounts
        .get_mut(&body.source)
        .ok_or_else(|| reject(format!("source {} does not exist", body.source)))?;
    entry.balance = remaining;
    entry.sequence_number += 1;

    let created: Vec<(String, Amount)> = envelope
        .targets()
        .map(|(t, a)| (t.to_string(), a))
        .collect();
    for (target, amount) in created {
        let credited = state.distort.get(&target).copied().unwrap_or(amount);
        state.accounts.insert(
            target.clone(),
            AccountRecord {
                address: target,
                balance: credited,
                sequence_number: 0,
            },
        );
    }

    let ledger = state.transactions.len() as u64 + 1;
    state.transactions.insert(
        envelope.hash.clone(),
        TransactionRecord {
            hash: envelope.hash.clone(),
            source: Some(body.source.clone()),
            ledger: Some(ledger),
        },
    );
    Ok(())
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_account(&self, address: &str) -> Result<AccountRecord, LedgerError> {
        self.account_lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if state.unreachable.contains(address) {
            return Err(LedgerError::Transport("connection reset".into()));
        }
        state
            .accounts
            .get(address)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(address.to_string()))
    }

    async fn submit_transaction(&self, envelope: &TransactionEnvelope) -> Result<(), LedgerError> {
        let source = envelope.body.source.clone();
        {
            let mut state = self.state.lock();
            state.submitted.push(envelope.clone());
            if !state.in_flight.insert(source.clone()) {
                state.overlaps.push(source.clone());
            }
        }

        let delay = *self.submit_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = self.finish_submit(envelope);
        self.state.lock().in_flight.remove(&source);
        result
    }

    async fn get_transaction(&self, hash: &str) -> Result<TransactionRecord, LedgerError> {
        self.state
            .lock()
            .transactions
            .get(hash)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(hash.to_string()))
    }
}

impl MockLedger {
    fn finish_submit(&self, envelope: &TransactionEnvelope) -> Result<(), LedgerError> {
        let pending_failures = self.transient_failures.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.transient_failures
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(LedgerError::Transport("injected failure".into()));
        }

        if !envelope.verify(&self.network_id) {
            return Err(LedgerError::Rejected {
                status: 400,
                reason: "bad signature".into(),
            });
        }

        let mode = *self.mode.lock();
        let mut state = self.state.lock();
        match mode {
            SubmitMode::Apply => apply(&mut state, envelope),
            SubmitMode::RejectAll => Err(LedgerError::Rejected {
                status: 400,
                reason: "rejected by test".into(),
            }),
            SubmitMode::NeverConfirm => Ok(()),
            SubmitMode::Hold => {
                state.held.push(envelope.clone());
                Ok(())
            }
            SubmitMode::Unindexed => {
                apply(&mut state, envelope)?;
                state.transactions.remove(&envelope.hash);
                Ok(())
            }
        }
    }
}
