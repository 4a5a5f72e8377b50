//! Price Stream Client Binary
//!
//! Connects to the configured price feed, subscribes the startup symbols,
//! and logs every price update until interrupted.
//!
//! # Usage
//!
//! ```bash
//! PRICE_STREAM_URL=wss://prices.example.com/ws \
//! PRICE_STREAM_SYMBOLS=AAPL,MSFT \
//!     cargo run --bin price-stream-client
//! ```
//!
//! # Environment Variables
//!
//! ## Feed
//! - `PRICE_STREAM_URL`: WebSocket endpoint (empty = do not connect)
//! - `PRICE_STREAM_API_KEY`: API key for the challenge handshake (optional)
//! - `PRICE_STREAM_SYMBOLS`: Comma separated symbols to subscribe at startup
//! - `PRICE_STREAM_ENABLED`: Master switch (default: true)
//!
//! ## Recovery
//! - `PRICE_STREAM_RECONNECT_INTERVAL_MS`: Initial backoff (default: 5000)
//! - `PRICE_STREAM_RECONNECT_MAX_MS`: Backoff cap (default: interval)
//! - `PRICE_STREAM_RECONNECT_MULTIPLIER`: Backoff growth (default: 1.0, fixed)
//! - `PRICE_STREAM_RECONNECT_JITTER`: Random spread of each delay (default: 0.0)
//! - `PRICE_STREAM_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 0)
//! - `PRICE_STREAM_CONNECT_TIMEOUT_SECS`: Transport open bound (default: 10)
//! - `PRICE_STREAM_AUTH_TIMEOUT_SECS`: Handshake bound (default: 10)
//! - `PRICE_STREAM_HEARTBEAT_INTERVAL_SECS`: Ping interval, 0 = off (default: 30)
//! - `PRICE_STREAM_HEARTBEAT_TIMEOUT_SECS`: Pong deadline (default: 60)
//!
//! ## Cache
//! - `PRICE_CACHE_PATH`: Snapshot file (default: price_cache.json)
//! - `PRICE_CACHE_EXPIRY_SECS`: Snapshot expiry (default: 86400)
//! - `PRICE_STREAM_UPDATE_CAPACITY`: Update channel capacity (default: 4096)
//!
//! ## Operations
//! - `PRICE_STREAM_HEALTH_PORT`: Health/metrics HTTP port, 0 = off (default: 8083)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-stream-client)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_stream_client::infrastructure::health::HealthServer;
use price_stream_client::infrastructure::persistence::FileSnapshotStore;
use price_stream_client::infrastructure::telemetry;
use price_stream_client::{ClientConfig, ConnectOutcome, StreamingClient, init_metrics};
use tokio::signal;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Bound on the final disconnect.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Price Stream Client");

    // Initialize Prometheus metrics
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus metrics unavailable");
    }

    let config = ClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store = Arc::new(FileSnapshotStore::new(config.cache.path.clone()));
    let client = StreamingClient::new(config.clone(), store).await;

    // Spawn health server
    if config.server.health_port != 0 {
        let health_state = Arc::new(client.health_state(env!("CARGO_PKG_VERSION")));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    // Spawn price logger
    let mut prices = Box::pin(client.price_stream());
    let logger_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = logger_shutdown.cancelled() => break,
                entry = prices.next() => match entry {
                    Some(entry) => tracing::info!(
                        symbol = %entry.symbol,
                        price = %entry.price,
                        observed_at = %entry.observed_at,
                        "Price update"
                    ),
                    None => break,
                },
            }
        }
    });

    for (symbol, entry) in client.track(&config.initial_symbols) {
        match entry {
            Some(entry) => tracing::info!(
                %symbol,
                price = %entry.price,
                source = ?entry.source,
                "Tracking symbol"
            ),
            None => tracing::info!(%symbol, "Tracking symbol, no price yet"),
        }
    }

    match client.start() {
        ConnectOutcome::Started | ConnectOutcome::AlreadyRunning => {
            tracing::info!("Price stream client ready");
        }
        ConnectOutcome::Disabled => tracing::warn!("Price streaming disabled by configuration"),
        ConnectOutcome::NoEndpoint => {
            tracing::warn!("PRICE_STREAM_URL not set, serving cached prices only");
        }
    }

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, client.stop())
        .await
        .is_err()
    {
        tracing::warn!("Timed out closing the price feed connection");
    }

    tracing::info!("Price stream client stopped");
    Ok(())
}

/// Load .env from the current directory, falling back to ancestors.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        url = %config.url,
        authenticated = config.credentials.is_some(),
        enabled = config.enabled,
        health_port = config.server.health_port,
        symbols = config.initial_symbols.len(),
        "Configuration loaded"
    );
    tracing::debug!(
        reconnect_ms = u64::try_from(config.reconnect.initial_delay.as_millis()).unwrap_or(u64::MAX),
        max_reconnect_attempts = config.reconnect.max_attempts,
        auth_timeout_secs = config.auth_timeout.as_secs(),
        cache_path = %config.cache.path.display(),
        "Client settings"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
