// Source accounts that pay for account creation

pub mod pool;
pub mod reconciler;

pub use pool::{SourceAccount, SourcePool};
pub use reconciler::{Reconciler, ReconcilerConfig, Reconciliation};
