use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::models::*;
use crate::{
    engine::ProvisioningEngine,
    error::{AppError, AppResult, LedgerError},
    execution::ReadyAccountRequest,
    ledger::{
        models::{AccountRecord, Amount},
        LedgerClient,
    },
    wallet::{parse_key, ParsedKey},
};

/// Limits applied to client requests
#[derive(Debug, Clone)]
pub struct AccountLimits {
    pub default_balance: Amount,
    pub max_balance: Amount,
    pub default_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for AccountLimits {
    fn default() -> Self {
        Self {
            default_balance: Amount(1_000_000_000),
            max_balance: Amount(100_000_000_000),
            default_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(900),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProvisioningEngine>,
    pub limits: AccountLimits,
}

pub async fn root() -> &'static str {
    "OK"
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let sources_available = state.engine.pool_len();
    let pending_requests = state.engine.queue_len();

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        sources_available,
        pending_requests,
    })
}

/// Create an account and wait until the ledger shows it
/// GET|POST /account/:address?balance=&timeout=
#[instrument(skip(state, query))]
pub async fn create_account(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<CreateAccountQuery>,
) -> AppResult<Json<AccountResponse>> {
    match parse_key(&address) {
        Ok(ParsedKey::Address(_)) => {}
        Ok(ParsedKey::Secret) => return Err(AppError::SecretSupplied),
        Err(e) => return Err(AppError::InvalidAddress(e.to_string())),
    }

    let balance = requested_balance(query.balance.as_deref(), &state.limits)?;
    let timeout = match query.timeout {
        None => state.limits.default_timeout,
        Some(0) => return Err(AppError::BadRequest("timeout must be positive".into())),
        Some(ms) => Duration::from_millis(ms),
    };

    let client = state.engine.client();
    match client.get_account(&address).await {
        Ok(_) => return Err(AppError::AccountExists(address)),
        Err(LedgerError::NotFound(_)) => {}
        Err(e) => {
            error!(error = %e, "failed to check account");
            return Err(e.into());
        }
    }

    info!(%balance, timeout_ms = timeout.as_millis() as u64, "queueing account creation");
    state
        .engine
        .create_account(ReadyAccountRequest::new(address.clone(), balance));

    // Cancelled when this handler is dropped, e.g. on client disconnect.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let poll = tokio::spawn(wait_for_account(
        client,
        address,
        balance,
        state.limits.poll_interval,
        timeout,
        cancel,
    ));

    let account = poll
        .await
        .map_err(|e| AppError::Internal(format!("account poll failed: {}", e)))??;
    Ok(Json(account.into()))
}

fn requested_balance(raw: Option<&str>, limits: &AccountLimits) -> AppResult<Amount> {
    let balance = match raw {
        None | Some("") => limits.default_balance,
        Some(raw) => raw
            .parse::<Amount>()
            .map_err(|_| AppError::BadRequest(format!("invalid balance '{}'", raw)))?,
    };

    if balance == Amount::ZERO {
        return Err(AppError::BadRequest("balance must be positive".into()));
    }
    if balance > limits.max_balance {
        return Err(AppError::BadRequest(format!(
            "balance {} exceeds maximum {}",
            balance, limits.max_balance
        )));
    }
    Ok(balance)
}

/// Poll the ledger until `address` appears with `balance`.
async fn wait_for_account(
    client: Arc<dyn LedgerClient>,
    address: String,
    balance: Amount,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> AppResult<AccountRecord> {
    let poll = async {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%address, "client went away, stopped polling");
                    return Err(AppError::Internal("request cancelled".into()));
                }
                _ = time::sleep(interval) => {}
            }

            match client.get_account(&address).await {
                Ok(account) if account.balance == balance => return Ok(account),
                Ok(account) => {
                    error!(%address, expected = %balance, observed = %account.balance, "account created with unexpected balance");
                    return Err(AppError::BalanceMismatch {
                        address: address.clone(),
                        expected: balance,
                        observed: account.balance,
                    });
                }
                Err(LedgerError::NotFound(_)) => {}
                Err(e) => debug!(%address, error = %e, "account poll failed"),
            }
        }
    };

    match time::timeout(timeout, poll).await {
        Ok(result) => result,
        Err(_) => {
            warn!(%address, "account was not created before timeout");
            Err(AppError::CreationTimeout(address))
        }
    }
}
