pub mod submitter;
pub mod transaction;

pub use submitter::{Confirmation, SubmitterConfig, TransactionSubmitter};
pub use transaction::{ReadyAccountRequest, TransactionEnvelope};
