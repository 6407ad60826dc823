//! Set Arbitrage Analyzer - server binary.
//!
//! Wires the rate-limited market client, catalog cache, run store and
//! orchestrator together and serves the REST + SSE surface.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use setarb_backend::analysis::{AnalysisParams, Orchestrator};
use setarb_backend::api::{create_router, AppState};
use setarb_backend::catalog::CatalogCache;
use setarb_backend::config::Config;
use setarb_backend::market::MarketClient;
use setarb_backend::middleware::request_logging;
use setarb_backend::rate_limit::RateLimiter;
use setarb_backend::storage::RunStore;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    let config = Arc::new(Config::from_env().context("Invalid configuration")?);
    config.prepare_dirs().context("Failed to prepare data directories")?;

    info!(
        port = config.port,
        database = %config.database_path,
        cache_dir = %config.cache_dir,
        "Set arbitrage analyzer starting"
    );

    // The limiter is process-wide: every upstream call in every worker goes
    // through this one instance.
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_requests,
        Duration::from_secs_f64(config.rate_limit_window),
    ));
    let client = MarketClient::new(
        limiter,
        config.market_v1_url.clone(),
        config.market_v2_url.clone(),
        Duration::from_secs(config.request_timeout_secs),
    )
    .context("Failed to build market client")?;

    let catalog = Arc::new(CatalogCache::new(config.catalog_file_path()));
    let store =
        Arc::new(RunStore::new(&config.database_path).context("Failed to open run store")?);

    let orchestrator = Arc::new(Orchestrator::new(
        client,
        catalog.clone(),
        store.clone(),
        config.analysis_workers,
        Duration::from_secs(config.analysis_timeout_secs),
    ));

    if config.poll_interval_secs > 0 {
        orchestrator.spawn_poll_loop(
            Duration::from_secs(config.poll_interval_secs),
            AnalysisParams {
                strategy: config.default_strategy,
                execution_mode: config.default_execution_mode,
                force_refresh: false,
                test_mode: false,
            },
        );
    }

    let state = AppState {
        config: config.clone(),
        orchestrator,
        store,
        catalog,
    };

    let app = create_router(state)
        .layer(axum::middleware::from_fn(request_logging))
        .layer(build_cors(&config.cors_origins)?);

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!(addr = %listener.local_addr()?, "API listening");

    axum::serve(listener, app).await.context("Server exited")?;
    Ok(())
}

fn build_cors(origins: &[String]) -> Result<CorsLayer> {
    if origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any));
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .with_context(|| format!("Invalid CORS origin: {o}"))
        })
        .collect::<Result<_>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "setarb_backend=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
