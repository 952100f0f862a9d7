use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::models::{AccountRecord, Amount};

// ========== REQUEST MODELS ==========

/// Query string of `/account/{address}`
#[derive(Debug, Default, Deserialize)]
pub struct CreateAccountQuery {
    /// Requested balance; the configured default when absent.
    pub balance: Option<String>,
    /// How long to wait for the account, in milliseconds.
    pub timeout: Option<u64>,
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountResponse {
    pub address: String,
    pub balance: Amount,
    pub sequence_number: u64,
}

impl From<AccountRecord> for AccountResponse {
    fn from(record: AccountRecord) -> Self {
        Self {
            address: record.address,
            balance: record.balance,
            sequence_number: record.sequence_number,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub sources_available: usize,
    pub pending_requests: usize,
}
