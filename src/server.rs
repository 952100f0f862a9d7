use axum::{middleware, routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::handler::{create_account, health_check, root, AppState},
    config::RateLimit,
    middleware::{rate_limit_middleware, RateLimitLayer},
};

pub fn create_app(state: AppState, rate_limit: RateLimit) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/account/:address", get(create_account).post(create_account))
        .layer(middleware::from_fn_with_state(
            RateLimitLayer::new(rate_limit),
            rate_limit_middleware,
        ))
        .layer(CorsLayer::very_permissive())
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(
    app: Router,
    bind_address: &str,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroU32, sync::Arc, time::Duration};

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        api::handler::AccountLimits,
        engine::{EngineConfig, ProvisioningEngine},
        ledger::mock::MockLedger,
        wallet::Keypair,
    };

    #[tokio::test]
    async fn test_rate_limit_returns_429() {
        let ledger = Arc::new(MockLedger::new(b"server-test"));
        let engine = Arc::new(ProvisioningEngine::new(
            EngineConfig::default(),
            ledger,
            Keypair::random(),
            Vec::new(),
        ));
        let state = AppState {
            engine,
            limits: AccountLimits::default(),
        };
        let app = create_app(
            state,
            RateLimit {
                limit: NonZeroU32::new(2).unwrap(),
                period: Duration::from_secs(3600),
            },
        );

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
            statuses.push(response.status());
        }

        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]);
    }
}
