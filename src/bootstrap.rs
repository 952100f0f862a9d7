use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{
    api::handler::{AccountLimits, AppState},
    config::Config,
    engine::ProvisioningEngine,
    error::AppResult,
    ledger::{HttpLedgerClient, LedgerClient},
};

/// Probe the node, reconcile sources and start the scheduler.
pub async fn initialize_app_state(config: Config) -> AppResult<(AppState, JoinHandle<()>)> {
    info!("Initializing application components ...");

    let client: Arc<dyn LedgerClient> =
        Arc::new(HttpLedgerClient::new(&config.endpoint, config.ledger_timeout)?);

    start_engine(config, client).await
}

pub async fn start_engine(
    config: Config,
    client: Arc<dyn LedgerClient>,
) -> AppResult<(AppState, JoinHandle<()>)> {
    match client.get_account(config.operator.address()).await {
        Ok(account) => info!(
            operator = %account.address,
            balance = %account.balance,
            "✅ Ledger node reachable"
        ),
        Err(e) => {
            error!(endpoint = %config.endpoint, error = %e, "failed to load operator account");
            return Err(e.into());
        }
    }

    let limits = AccountLimits {
        default_balance: config.default_balance,
        max_balance: config.max_balance,
        ..Default::default()
    };

    let engine = Arc::new(ProvisioningEngine::new(
        config.engine,
        client,
        config.operator,
        config.sources,
    ));
    let scheduler = engine.start().await;

    Ok((AppState { engine, limits }, scheduler))
}
