use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::models::{AccountRecord, SubmitResponse, TransactionRecord};
use crate::{error::LedgerError, execution::transaction::TransactionEnvelope};

/// Remote ledger boundary
///
/// Every call may block on the network. Implementations must be cheap to share
/// across tasks.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current state of an account. `LedgerError::NotFound` if it does not exist.
    async fn get_account(&self, address: &str) -> Result<AccountRecord, LedgerError>;

    /// Submit a signed transaction. `Ok` means the node accepted it for inclusion.
    async fn submit_transaction(&self, envelope: &TransactionEnvelope) -> Result<(), LedgerError>;

    /// Look up a transaction by hash. `LedgerError::NotFound` until it is confirmed.
    async fn get_transaction(&self, hash: &str) -> Result<TransactionRecord, LedgerError>;
}

/// JSON/HTTP client for the node API
pub struct HttpLedgerClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpLedgerClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.endpoint, path)
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn get_account(&self, address: &str) -> Result<AccountRecord, LedgerError> {
        let response = self
            .client
            .get(self.url(&format!("/accounts/{}", address)))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<AccountRecord>().await?),
            StatusCode::NOT_FOUND => Err(LedgerError::NotFound(address.to_string())),
            status => Err(LedgerError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn submit_transaction(&self, envelope: &TransactionEnvelope) -> Result<(), LedgerError> {
        debug!(hash = %envelope.hash, "posting transaction");

        let response = self
            .client
            .post(self.url("/transactions"))
            .json(envelope)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let accepted: SubmitResponse = response.json().await.unwrap_or(SubmitResponse { hash: None });
            if let Some(hash) = accepted.hash.filter(|h| h != &envelope.hash) {
                return Err(LedgerError::Decode(format!(
                    "node acknowledged hash {} for {}",
                    hash, envelope.hash
                )));
            }
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(LedgerError::Rejected {
                    status: status.as_u16(),
                    reason: body,
                })
            }
            _ => Err(LedgerError::Status {
                status: status.as_u16(),
                body,
            }),
        }
    }

    async fn get_transaction(&self, hash: &str) -> Result<TransactionRecord, LedgerError> {
        let response = self
            .client
            .get(self.url(&format!("/transactions/{}", hash)))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<TransactionRecord>().await?),
            StatusCode::NOT_FOUND => Err(LedgerError::NotFound(hash.to_string())),
            status => Err(LedgerError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_api_prefix() {
        let client = HttpLedgerClient::new("http://localhost:12345/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.url("/accounts/abc"),
            "http://localhost:12345/api/v1/accounts/abc"
        );
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transport_error() {
        // Port 9 (discard) is closed on test hosts, so the connect fails fast.
        let client = HttpLedgerClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.get_account("abc").await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {:?}", err);
    }
}
