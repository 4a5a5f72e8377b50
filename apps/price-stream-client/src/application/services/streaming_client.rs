//! Streaming Client
//!
//! The public entry point. Wires the subscription registry, the price cache
//! and the connection manager together behind one cloneable handle.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use crate::application::ports::SnapshotStore;
use crate::domain::streaming::{ConnectionStatus, PriceEntry, Symbol};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::cache::PriceCache;
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::feed::{Authenticator, ConnectOutcome, ConnectionManager};
use crate::infrastructure::health::HealthServerState;
use crate::infrastructure::metrics;

struct Inner {
    config: ClientConfig,
    registry: Arc<SubscriptionRegistry>,
    cache: Arc<PriceCache>,
    manager: ConnectionManager,
}

/// Handle to a price streaming client.
///
/// Clones share one transport, one subscription set and one cache.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(FileSnapshotStore::new("price_cache.json"));
/// let client = StreamingClient::new(ClientConfig::from_env()?, store).await;
/// client.start();
/// client.subscribe(["AAPL", "MSFT"]);
///
/// let mut prices = client.price_stream();
/// while let Some(entry) = prices.next().await {
///     println!("{} {}", entry.symbol, entry.price);
/// }
/// ```
#[derive(Clone)]
pub struct StreamingClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingClient")
            .field("manager", &self.inner.manager)
            .field("subscriptions", &self.inner.registry.len())
            .field("cached_prices", &self.inner.cache.len())
            .finish()
    }
}

impl StreamingClient {
    /// Build a client, seeding the price cache from `store`.
    ///
    /// Nothing connects until [`start`](Self::start).
    pub async fn new(config: ClientConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let cache = Arc::new(
            PriceCache::load(store, config.cache.expiry, config.cache.update_capacity).await,
        );
        let registry = Arc::new(SubscriptionRegistry::new());
        let authenticator = Authenticator::new(config.credentials.clone(), config.auth_timeout);
        let manager = ConnectionManager::new(
            config.connection_settings(),
            authenticator,
            Arc::clone(&registry),
            Arc::clone(&cache),
        );

        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                cache,
                manager,
            }),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start streaming. Same as [`connect`](Self::connect).
    pub fn start(&self) -> ConnectOutcome {
        self.connect()
    }

    /// Stop streaming. Same as [`disconnect`](Self::disconnect).
    pub async fn stop(&self) {
        self.disconnect().await;
    }

    /// Open the transport if it is not already open or opening.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn connect(&self) -> ConnectOutcome {
        let outcome = self.inner.manager.connect();
        tracing::debug!(?outcome, "Connect requested");
        outcome
    }

    /// Close the transport normally. No reconnect follows.
    pub async fn disconnect(&self) {
        self.inner.manager.disconnect().await;
    }

    /// Drop the current transport and open a fresh one.
    pub async fn reconnect(&self) -> ConnectOutcome {
        self.inner.manager.disconnect().await;
        self.inner.manager.connect()
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.manager.status()
    }

    /// Watch channel for connection status changes.
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.manager.status_watch()
    }

    /// Check if the feed is authenticated and subscriptions are live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status().is_authenticated()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Add symbols to the subscription set.
    ///
    /// Returns the symbols that were newly added. Symbols already present
    /// produce no wire traffic.
    pub fn subscribe<I, S>(&self, symbols: I) -> Vec<Symbol>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let added = self.inner.registry.subscribe(symbols);
        if !added.is_empty() {
            tracing::info!(symbols = ?added, "Subscribing");
            self.changed();
        }
        added
    }

    /// Remove symbols from the subscription set.
    ///
    /// Returns the symbols that were present.
    pub fn unsubscribe<I, S>(&self, symbols: I) -> Vec<Symbol>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let removed = self.inner.registry.unsubscribe(symbols);
        if !removed.is_empty() {
            tracing::info!(symbols = ?removed, "Unsubscribing");
            self.changed();
        }
        removed
    }

    /// Get the subscribed symbols (sorted).
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Symbol> {
        self.inner.registry.symbols()
    }

    /// Subscribe and return the current price (if any) for each symbol.
    pub fn track<I, S>(&self, symbols: I) -> Vec<(Symbol, Option<PriceEntry>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols: Vec<Symbol> = symbols
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self.subscribe(&symbols);
        self.inner.cache.prices(&symbols)
    }

    fn changed(&self) {
        metrics::set_subscriptions(self.inner.registry.len());
        self.inner.manager.request_sync();
    }

    // =========================================================================
    // Prices
    // =========================================================================

    /// Latest price for a symbol.
    #[must_use]
    pub fn price(&self, symbol: &str) -> Option<PriceEntry> {
        self.inner.cache.get(symbol)
    }

    /// Latest price for each symbol, in input order.
    #[must_use]
    pub fn prices<I, S>(&self, symbols: I) -> Vec<(Symbol, Option<PriceEntry>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.cache.prices(symbols)
    }

    /// Every known price, sorted by symbol.
    #[must_use]
    pub fn all_prices(&self) -> Vec<PriceEntry> {
        self.inner.cache.all()
    }

    /// Number of symbols with a known price.
    #[must_use]
    pub fn cached_prices(&self) -> usize {
        self.inner.cache.len()
    }

    /// Receiver for live price updates.
    #[must_use]
    pub fn price_updates(&self) -> broadcast::Receiver<PriceEntry> {
        self.inner.cache.subscribe_updates()
    }

    /// Stream of live price updates. A slow consumer skips what it missed.
    #[must_use]
    pub fn price_stream(&self) -> impl Stream<Item = PriceEntry> + Send + 'static {
        BroadcastStream::new(self.price_updates()).filter_map(|item| match item {
            Ok(entry) => Some(entry),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Price stream consumer lagged, skipping updates");
                None
            }
        })
    }

    /// State for the health server.
    #[must_use]
    pub fn health_state(&self, version: impl Into<String>) -> HealthServerState {
        HealthServerState::new(
            version.into(),
            self.status_watch(),
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.cache),
        )
    }
}
