pub mod client;
#[cfg(test)]
pub mod mock;
pub mod models;

pub use client::{HttpLedgerClient, LedgerClient};
