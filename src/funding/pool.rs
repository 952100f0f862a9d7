use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::debug;

use crate::{ledger::models::Amount, wallet::Keypair};

/// A funding account owned by the engine
#[derive(Debug)]
pub struct SourceAccount {
    keypair: Keypair,
    pub last_known_balance: Amount,
}

impl SourceAccount {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair,
            last_known_balance: Amount::ZERO,
        }
    }

    pub fn address(&self) -> &str {
        self.keypair.address()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

/// Sources not currently bound to an in-flight batch.
///
/// `acquire` moves the account out; the holder owns its keypair until it hands
/// the account back through `release`.
#[derive(Debug, Default)]
pub struct SourcePool {
    unused: Mutex<VecDeque<SourceAccount>>,
}

impl SourcePool {
    pub fn new(accounts: impl IntoIterator<Item = SourceAccount>) -> Self {
        Self {
            unused: Mutex::new(accounts.into_iter().collect()),
        }
    }

    /// Take the head of the pool. `None` means every source is busy.
    pub fn acquire(&self) -> Option<SourceAccount> {
        let source = self.unused.lock().pop_front();
        if let Some(source) = &source {
            debug!(source = %source.address(), "acquired source");
        }
        source
    }

    pub fn release(&self, source: SourceAccount) {
        let mut unused = self.unused.lock();
        debug!(source = %source.address(), unused = unused.len() + 1, "released source");
        unused.push_back(source);
    }

    pub fn len(&self) -> usize {
        self.unused.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.unused.lock().is_empty()
    }
}
