use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Args;
use crate::error::{GatewayError, Result};
use crate::forwarder::Forwarder;
use crate::handlers::{chat_handler, health_handler, method_not_allowed, metrics_handler};
use crate::rate_limit::{self, InMemoryRateStore, RateGate, RateStore};
use crate::state::AppState;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// creating the router with routes
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/chat", post(chat_handler).fallback(method_not_allowed))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Builds the pipeline from validated arguments and serves until Ctrl-C.
pub async fn run(args: Args) -> Result<()> {
    args.validate()?;

    let upstream = args.upstream()?;
    let store = rate_store(&args).await?;
    let gate = Arc::new(RateGate::new(store, args.rate_limit, args.rate_window()));
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| GatewayError::Config(format!("http client: {e}")))?;
    let forwarder = Forwarder::new(client, upstream.clone(), args.retry_policy());
    let state = Arc::new(AppState::new(gate.clone(), forwarder));

    // spawn the background sweeper
    let every = args.rate_window().max(MIN_SWEEP_INTERVAL);
    tokio::spawn(rate_limit::sweeper(gate, every));

    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(%addr, "gateway listening");
    info!(upstream = %upstream.url, "forwarding to upstream");
    info!(
        limit = args.rate_limit,
        window_secs = args.rate_window,
        "rate limit configured"
    );
    let policy = args.retry_policy();
    info!(
        timeout_ms = args.timeout_ms,
        attempts = policy.attempts(),
        backoff_ms = args.backoff_ms,
        backoff = ?policy.policy,
        "retry policy configured"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("gateway stopped");
    Ok(())
}

#[cfg_attr(not(feature = "redis"), allow(unused_variables))]
async fn rate_store(args: &Args) -> Result<Arc<dyn RateStore>> {
    #[cfg(feature = "redis")]
    if let Some(url) = args.redis_url.as_deref() {
        let store = rate_limit::RedisRateStore::connect(url).await?;
        return Ok(Arc::new(store));
    }

    Ok(Arc::new(InMemoryRateStore::new()))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
