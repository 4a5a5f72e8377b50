//! Subscription Registry
//!
//! Tracks the symbols consumers want prices for, independently of the
//! connection, together with the symbols the current transport has
//! actually been told about (the "wire set").
//!
//! # Design
//!
//! The desired set is the single source of truth. Outbound traffic is
//! always derived from the difference between the desired set and the wire
//! set, so a symbol whose desired state already matches what was last sent
//! never produces a message:
//!
//! - `subscribe`/`unsubscribe` only mutate the desired set and report what
//!   actually changed.
//! - `reconcile` yields the diff for an authenticated transport and marks it
//!   sent.
//! - `resync` yields the full set after a (re)authentication.
//! - `clear_wire` forgets the wire set when the transport goes away.
//!
//! Symbols are never pruned implicitly: dropping an observer leaves its
//! symbols subscribed so background updates continue.

use std::collections::BTreeSet;

use parking_lot::RwLock;

pub use super::streaming::Symbol;

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to apply on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols to subscribe to (sorted).
    pub subscribe: Vec<Symbol>,
    /// Symbols to unsubscribe from (sorted).
    pub unsubscribe: Vec<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// Registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Symbols consumers asked for.
    pub desired: usize,
    /// Symbols the current transport is subscribed to.
    pub on_wire: usize,
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    desired: BTreeSet<Symbol>,
    wire: BTreeSet<Symbol>,
}

/// Thread-safe, deduplicated set of symbols of interest.
///
/// # Example
///
/// ```rust
/// use price_stream_client::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
///
/// assert_eq!(registry.subscribe(["AAPL", "MSFT"]), vec!["AAPL", "MSFT"]);
/// assert!(registry.subscribe(["AAPL"]).is_empty());
///
/// // Only what changed since the last send goes out.
/// let changes = registry.reconcile();
/// assert_eq!(changes.subscribe, vec!["AAPL", "MSFT"]);
/// assert!(registry.reconcile().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add symbols to the desired set.
    ///
    /// Returns the symbols that were not already present, in input order
    /// and without duplicates. Blank symbols are ignored.
    pub fn subscribe<I, S>(&self, symbols: I) -> Vec<Symbol>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.write();
        let mut added = Vec::new();

        for symbol in symbols {
            let Some(symbol) = normalize(symbol.as_ref()) else {
                continue;
            };
            if state.desired.insert(symbol.clone()) {
                added.push(symbol);
            }
        }

        added
    }

    /// Remove symbols from the desired set.
    ///
    /// Returns the symbols that were actually present.
    pub fn unsubscribe<I, S>(&self, symbols: I) -> Vec<Symbol>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.write();
        let mut removed = Vec::new();

        for symbol in symbols {
            let Some(symbol) = normalize(symbol.as_ref()) else {
                continue;
            };
            if state.desired.remove(&symbol) {
                removed.push(symbol);
            }
        }

        removed
    }

    /// Compute the wire changes needed to match the desired set and mark
    /// them as sent.
    pub fn reconcile(&self) -> SubscriptionChanges {
        let mut state = self.state.write();

        let subscribe: Vec<Symbol> = state.desired.difference(&state.wire).cloned().collect();
        let unsubscribe: Vec<Symbol> = state.wire.difference(&state.desired).cloned().collect();

        let desired = state.desired.clone();
        state.wire = desired;

        SubscriptionChanges {
            subscribe,
            unsubscribe,
        }
    }

    /// Return the full desired set for a fresh transport and mark it sent.
    pub fn resync(&self) -> Vec<Symbol> {
        let mut state = self.state.write();
        let desired = state.desired.clone();
        let symbols = desired.iter().cloned().collect();
        state.wire = desired;
        symbols
    }

    /// Forget what the previous transport was subscribed to.
    pub fn clear_wire(&self) {
        self.state.write().wire.clear();
    }

    /// Get the desired symbols (sorted).
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.state.read().desired.iter().cloned().collect()
    }

    /// Check whether a symbol is desired.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.state.read().desired.contains(symbol.trim())
    }

    /// Number of desired symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().desired.len()
    }

    /// Check if nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().desired.is_empty()
    }

    /// Get registry counters.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            desired: state.desired.len(),
            on_wire: state.wire.len(),
        }
    }
}

fn normalize(symbol: &str) -> Option<Symbol> {
    let trimmed = symbol.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn subscribe_returns_only_new_symbols() {
        let registry = SubscriptionRegistry::new();

        assert_eq!(registry.subscribe(["AAPL"]), vec!["AAPL"]);
        assert_eq!(registry.subscribe(["AAPL", "MSFT"]), vec!["MSFT"]);
        assert!(registry.subscribe(["MSFT", "AAPL"]).is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn subscribe_deduplicates_within_call() {
        let registry = SubscriptionRegistry::new();

        let added = registry.subscribe(["TSLA", "TSLA", " TSLA "]);
        assert_eq!(added, vec!["TSLA"]);
    }

    #[test]
    fn blank_symbols_are_ignored() {
        let registry = SubscriptionRegistry::new();

        assert!(registry.subscribe(["", "   "]).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn symbols_keep_their_case() {
        let registry = SubscriptionRegistry::new();

        registry.subscribe(["btc-usd", "BTC-USD"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unsubscribe_returns_only_present_symbols() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(["AAPL", "MSFT"]);

        assert_eq!(registry.unsubscribe(["MSFT", "GOOG"]), vec!["MSFT"]);
        assert!(registry.unsubscribe(["MSFT"]).is_empty());
        assert_eq!(registry.symbols(), vec!["AAPL"]);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(["AAPL", "MSFT"]);

        let first = registry.reconcile();
        assert_eq!(first.subscribe, vec!["AAPL", "MSFT"]);
        assert!(first.unsubscribe.is_empty());

        assert!(registry.reconcile().is_empty());
    }

    #[test]
    fn reconcile_sends_only_the_delta() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(["AAPL", "MSFT"]);
        let _ = registry.reconcile();

        registry.subscribe(["GOOG"]);
        registry.unsubscribe(["AAPL"]);

        let changes = registry.reconcile();
        assert_eq!(changes.subscribe, vec!["GOOG"]);
        assert_eq!(changes.unsubscribe, vec!["AAPL"]);
    }

    #[test]
    fn add_then_remove_before_send_produces_no_traffic() {
        let registry = SubscriptionRegistry::new();

        registry.subscribe(["AAPL"]);
        registry.unsubscribe(["AAPL"]);

        assert!(registry.reconcile().is_empty());
    }

    #[test]
    fn resync_returns_full_set_and_marks_it_sent() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(["MSFT", "AAPL"]);

        assert_eq!(registry.resync(), vec!["AAPL", "MSFT"]);
        assert!(registry.reconcile().is_empty());
        assert_eq!(
            registry.stats(),
            SubscriptionStats {
                desired: 2,
                on_wire: 2
            }
        );
    }

    #[test]
    fn clear_wire_keeps_desired_set() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(["AAPL"]);
        let _ = registry.resync();

        registry.clear_wire();

        assert_eq!(registry.symbols(), vec!["AAPL"]);
        assert_eq!(registry.stats().on_wire, 0);
        assert_eq!(registry.reconcile().subscribe, vec!["AAPL"]);
    }

    #[test]
    fn unsubscribe_of_unsent_symbol_after_disconnect_is_silent() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(["AAPL", "MSFT"]);
        let _ = registry.resync();
        registry.clear_wire();

        registry.unsubscribe(["AAPL"]);

        let changes = registry.reconcile();
        assert_eq!(changes.subscribe, vec!["MSFT"]);
        assert!(changes.unsubscribe.is_empty());
    }

    #[test]
    fn contains_trims_input() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(["AAPL"]);

        assert!(registry.contains(" AAPL"));
        assert!(!registry.contains("MSFT"));
    }

    #[test]
    fn thread_safety_concurrent_subscriptions() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let mut handles = vec![];

        for i in 0..10 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                r.subscribe([format!("SYM{i}"), "SHARED".to_string()])
            }));
        }

        let added: Vec<Vec<Symbol>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // SHARED is reported as new by exactly one caller
        let shared_count = added
            .iter()
            .filter(|a| a.contains(&"SHARED".to_string()))
            .count();
        assert_eq!(shared_count, 1);
        assert_eq!(registry.len(), 11);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(Vec<String>),
        Unsubscribe(Vec<String>),
        Reconcile,
        Disconnect,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let symbols = prop::collection::vec(prop::sample::select(vec!["A", "B", "C", "D", "E"]), 0..4)
            .prop_map(|v| v.into_iter().map(String::from).collect::<Vec<_>>());
        prop_oneof![
            symbols.clone().prop_map(Op::Subscribe),
            symbols.prop_map(Op::Unsubscribe),
            Just(Op::Reconcile),
            Just(Op::Disconnect),
        ]
    }

    proptest! {
        #[test]
        fn resync_matches_desired_set(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let registry = SubscriptionRegistry::new();
            let mut model = BTreeSet::new();

            for op in ops {
                match op {
                    Op::Subscribe(symbols) => {
                        registry.subscribe(&symbols);
                        model.extend(symbols);
                    }
                    Op::Unsubscribe(symbols) => {
                        registry.unsubscribe(&symbols);
                        for s in &symbols {
                            model.remove(s);
                        }
                    }
                    Op::Reconcile => {
                        let _ = registry.reconcile();
                    }
                    Op::Disconnect => registry.clear_wire(),
                }
            }

            registry.clear_wire();
            let resync = registry.resync();
            prop_assert_eq!(resync, model.into_iter().collect::<Vec<_>>());
        }

        #[test]
        fn reconcile_never_repeats_itself(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let registry = SubscriptionRegistry::new();

            for op in ops {
                match op {
                    Op::Subscribe(symbols) => { registry.subscribe(&symbols); }
                    Op::Unsubscribe(symbols) => { registry.unsubscribe(&symbols); }
                    Op::Reconcile => {
                        let _ = registry.reconcile();
                        prop_assert!(registry.reconcile().is_empty());
                    }
                    Op::Disconnect => registry.clear_wire(),
                }
            }
        }
    }
}
