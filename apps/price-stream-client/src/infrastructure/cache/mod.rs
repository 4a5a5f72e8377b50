//! Price Cache
//!
//! In-memory last-known prices, seeded from the persisted snapshot and
//! mirrored back to it on every change. Live updates fan out to observers
//! over a tokio broadcast channel.
//!
//! # Expiry
//!
//! Expiry is coarse-grained: a snapshot older than the window is dropped
//! as a whole at load time, never symbol by symbol.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::application::ports::SnapshotStore;
use crate::domain::streaming::{PriceEntry, PriceSnapshot, Symbol};
use crate::infrastructure::metrics;

/// Default snapshot expiry.
pub const DEFAULT_CACHE_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Default capacity of the price update channel.
pub const DEFAULT_UPDATE_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
struct CacheState {
    persisted: HashMap<Symbol, Decimal>,
    saved_at: Option<DateTime<Utc>>,
    live: HashMap<Symbol, PriceEntry>,
}

impl CacheState {
    fn get(&self, symbol: &str) -> Option<PriceEntry> {
        if let Some(entry) = self.live.get(symbol) {
            return Some(entry.clone());
        }
        let price = self.persisted.get(symbol)?;
        let saved_at = self.saved_at.unwrap_or_else(Utc::now);
        Some(PriceEntry::cached(symbol.to_string(), *price, saved_at))
    }

    fn merged(&self) -> BTreeMap<Symbol, Decimal> {
        let mut data: BTreeMap<Symbol, Decimal> = self
            .persisted
            .iter()
            .map(|(symbol, price)| (symbol.clone(), *price))
            .collect();
        for (symbol, entry) in &self.live {
            data.insert(symbol.clone(), entry.price);
        }
        data
    }

    fn len(&self) -> usize {
        self.live.len()
            + self
                .persisted
                .keys()
                .filter(|symbol| !self.live.contains_key(*symbol))
                .count()
    }
}

/// Shared last-known price store.
pub struct PriceCache {
    state: RwLock<CacheState>,
    store: Arc<dyn SnapshotStore>,
    updates: broadcast::Sender<PriceEntry>,
}

impl std::fmt::Debug for PriceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceCache")
            .field("len", &self.len())
            .field("observers", &self.updates.receiver_count())
            .finish_non_exhaustive()
    }
}

impl PriceCache {
    /// Create a cache seeded from `store`.
    ///
    /// A snapshot older than `expiry` is ignored. Load or parse failures
    /// are logged and leave the cache empty.
    pub async fn load(store: Arc<dyn SnapshotStore>, expiry: Duration, capacity: usize) -> Self {
        let mut state = CacheState::default();

        match store.load().await {
            Ok(Some(snapshot)) if snapshot.is_fresh(Utc::now(), expiry) => {
                tracing::info!(
                    prices = snapshot.data.len(),
                    saved_at = %snapshot.saved_at,
                    "Loaded price cache snapshot"
                );
                state.persisted = snapshot.data.into_iter().collect();
                state.saved_at = Some(snapshot.saved_at);
            }
            Ok(Some(snapshot)) => {
                tracing::info!(
                    age_secs = snapshot.age(Utc::now()).as_secs(),
                    expiry_secs = expiry.as_secs(),
                    "Price cache snapshot expired, starting empty"
                );
            }
            Ok(None) => {
                tracing::debug!("No price cache snapshot found");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load price cache snapshot, starting empty");
            }
        }

        metrics::set_cached_prices(state.len());

        Self {
            state: RwLock::new(state),
            store,
            updates: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Record a live price, persist the merged snapshot, and notify observers.
    pub async fn apply(&self, entry: PriceEntry) {
        let snapshot = {
            let mut state = self.state.write();
            state.live.insert(entry.symbol.clone(), entry.clone());
            metrics::set_cached_prices(state.len());
            PriceSnapshot::now(state.merged())
        };

        if let Err(e) = self.store.save(&snapshot).await {
            metrics::record_snapshot_save_failure();
            tracing::warn!(error = %e, "Failed to persist price cache snapshot");
        }

        // No receivers is not an error.
        let _ = self.updates.send(entry);
    }

    /// Get the latest price for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<PriceEntry> {
        self.state.read().get(symbol.trim())
    }

    /// Get the latest price for each symbol, in input order.
    #[must_use]
    pub fn prices<I, S>(&self, symbols: I) -> Vec<(Symbol, Option<PriceEntry>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let state = self.state.read();
        symbols
            .into_iter()
            .map(|symbol| {
                let symbol = symbol.as_ref().trim();
                (symbol.to_string(), state.get(symbol))
            })
            .collect()
    }

    /// Get every known price, sorted by symbol.
    #[must_use]
    pub fn all(&self) -> Vec<PriceEntry> {
        let state = self.state.read();
        let mut symbols: Vec<&Symbol> = state.persisted.keys().chain(state.live.keys()).collect();
        symbols.sort();
        symbols.dedup();
        symbols
            .into_iter()
            .filter_map(|symbol| state.get(symbol))
            .collect()
    }

    /// Build the snapshot that would be persisted right now.
    #[must_use]
    pub fn snapshot(&self) -> PriceSnapshot {
        PriceSnapshot::now(self.state.read().merged())
    }

    /// Number of symbols with a known price.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    /// Check if no price is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a new receiver for live price updates.
    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<PriceEntry> {
        self.updates.subscribe()
    }

    /// Number of active update receivers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.updates.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use mockall::predicate::always;

    use super::*;
    use crate::application::ports::{MockSnapshotStore, StoreError};
    use crate::domain::streaming::PriceSource;
    use crate::infrastructure::persistence::MemorySnapshotStore;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn snapshot_aged(hours: i64) -> PriceSnapshot {
        let mut data = BTreeMap::new();
        data.insert("AAPL".to_string(), dec("187.23"));
        data.insert("MSFT".to_string(), dec("410.50"));
        PriceSnapshot {
            data,
            saved_at: Utc::now() - chrono::Duration::hours(hours),
        }
    }

    #[tokio::test]
    async fn fresh_snapshot_is_adopted_verbatim() {
        let snapshot = snapshot_aged(23);
        let store = Arc::new(MemorySnapshotStore::with_snapshot(snapshot.clone()));

        let cache = PriceCache::load(store, DEFAULT_CACHE_EXPIRY, 16).await;

        assert_eq!(cache.len(), 2);
        let aapl = cache.get("AAPL").unwrap();
        assert_eq!(aapl.price, dec("187.23"));
        assert_eq!(aapl.source, PriceSource::Cached);
        assert_eq!(aapl.observed_at, snapshot.saved_at);
        assert_eq!(cache.snapshot().data, snapshot.data);
    }

    #[tokio::test]
    async fn expired_snapshot_is_discarded_wholesale() {
        let store = Arc::new(MemorySnapshotStore::with_snapshot(snapshot_aged(25)));

        let cache = PriceCache::load(store, DEFAULT_CACHE_EXPIRY, 16).await;

        assert!(cache.is_empty());
        assert!(cache.get("AAPL").is_none());
    }

    #[tokio::test]
    async fn load_failure_starts_empty() {
        let mut store = MockSnapshotStore::new();
        store.expect_load().returning(|| {
            Err(StoreError::Io(std::io::Error::other("disk unavailable")))
        });

        let cache = PriceCache::load(Arc::new(store), DEFAULT_CACHE_EXPIRY, 16).await;
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn live_value_overrides_cached_value() {
        let store = Arc::new(MemorySnapshotStore::with_snapshot(snapshot_aged(1)));
        let cache = PriceCache::load(store.clone(), DEFAULT_CACHE_EXPIRY, 16).await;

        let now = Utc::now();
        cache
            .apply(PriceEntry::live("AAPL".to_string(), dec("190.00"), now))
            .await;

        let aapl = cache.get("AAPL").unwrap();
        assert_eq!(aapl.price, dec("190.00"));
        assert!(aapl.is_live());

        // MSFT still served from the snapshot
        assert_eq!(cache.get("MSFT").unwrap().source, PriceSource::Cached);
        assert_eq!(cache.len(), 2);

        // Persisted snapshot holds the merged view
        let saved = store.current().unwrap();
        assert_eq!(saved.data["AAPL"], dec("190.00"));
        assert_eq!(saved.data["MSFT"], dec("410.50"));
    }

    #[tokio::test]
    async fn apply_notifies_observers() {
        let cache = PriceCache::load(Arc::new(MemorySnapshotStore::new()), DEFAULT_CACHE_EXPIRY, 16)
            .await;
        let mut rx = cache.subscribe_updates();
        assert_eq!(cache.observer_count(), 1);

        cache
            .apply(PriceEntry::live("TSLA".to_string(), dec("250.1"), Utc::now()))
            .await;

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.symbol, "TSLA");
        assert_eq!(entry.price, dec("250.1"));
    }

    #[tokio::test]
    async fn save_failure_keeps_live_value() {
        let mut store = MockSnapshotStore::new();
        store.expect_load().returning(|| Ok(None));
        store
            .expect_save()
            .with(always())
            .times(1)
            .returning(|_| Err(StoreError::Io(std::io::Error::other("read-only"))));

        let cache = PriceCache::load(Arc::new(store), DEFAULT_CACHE_EXPIRY, 16).await;
        cache
            .apply(PriceEntry::live("AAPL".to_string(), dec("1"), Utc::now()))
            .await;

        assert_eq!(cache.get("AAPL").unwrap().price, dec("1"));
    }

    #[tokio::test]
    async fn prices_preserve_input_order() {
        let store = Arc::new(MemorySnapshotStore::with_snapshot(snapshot_aged(1)));
        let cache = PriceCache::load(store, DEFAULT_CACHE_EXPIRY, 16).await;

        let prices = cache.prices(["MSFT", "GOOG", " AAPL"]);

        assert_eq!(prices.len(), 3);
        assert_eq!(prices[0].0, "MSFT");
        assert!(prices[0].1.is_some());
        assert_eq!(prices[1].0, "GOOG");
        assert!(prices[1].1.is_none());
        assert_eq!(prices[2].0, "AAPL");
    }

    #[tokio::test]
    async fn all_lists_each_symbol_once() {
        let store = Arc::new(MemorySnapshotStore::with_snapshot(snapshot_aged(1)));
        let cache = PriceCache::load(store, DEFAULT_CACHE_EXPIRY, 16).await;
        cache
            .apply(PriceEntry::live("AAPL".to_string(), dec("191"), Utc::now()))
            .await;

        let all = cache.all();
        let symbols: Vec<&str> = all.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
        assert!(all[0].is_live());
    }
}
