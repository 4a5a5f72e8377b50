//! Streaming Domain Types
//!
//! Prices, cache snapshots, and the connection status surface shared with
//! consumers. No I/O happens here.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Prices
// =============================================================================

/// A symbol string (ticker or instrument identifier).
pub type Symbol = String;

/// Where a price value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    /// Received on the live transport during this process lifetime.
    Live,
    /// Seeded from the persisted snapshot and not yet refreshed.
    Cached,
}

/// Last known price for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEntry {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Last price.
    pub price: Decimal,
    /// When the price was observed (server timestamp, arrival time, or
    /// snapshot time for cached values).
    pub observed_at: DateTime<Utc>,
    /// Origin of the value.
    pub source: PriceSource,
}

impl PriceEntry {
    /// Create a live entry.
    #[must_use]
    pub const fn live(symbol: Symbol, price: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self {
            symbol,
            price,
            observed_at,
            source: PriceSource::Live,
        }
    }

    /// Create an entry seeded from a persisted snapshot.
    #[must_use]
    pub const fn cached(symbol: Symbol, price: Decimal, saved_at: DateTime<Utc>) -> Self {
        Self {
            symbol,
            price,
            observed_at: saved_at,
            source: PriceSource::Cached,
        }
    }

    /// Check if the value was received live.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self.source, PriceSource::Live)
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Persisted price-cache record.
///
/// # Wire Format (JSON)
/// ```json
/// {"data": {"AAPL": "187.23", "MSFT": "410.5"}, "timestamp": 1718000000000}
/// ```
///
/// Prices are written as decimal strings; plain JSON numbers are accepted on
/// load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Symbol to price map.
    pub data: BTreeMap<Symbol, Decimal>,
    /// When the snapshot was written (epoch milliseconds on the wire).
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub saved_at: DateTime<Utc>,
}

impl PriceSnapshot {
    /// Create a snapshot stamped with the current time.
    #[must_use]
    pub fn now(data: BTreeMap<Symbol, Decimal>) -> Self {
        Self {
            data,
            saved_at: Utc::now(),
        }
    }

    /// Age of the snapshot relative to `now`. Snapshots from the future
    /// have zero age.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.saved_at).to_std().unwrap_or_default()
    }

    /// Check whether the snapshot is still inside the expiry window.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, expiry: std::time::Duration) -> bool {
        self.age(now) <= expiry
    }
}

// =============================================================================
// Connection Status
// =============================================================================

/// Lifecycle state of the single transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, handshake running.
    Authenticating,
    /// Handshake complete (or not required); subscriptions are live.
    Authenticated,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
        }
    }

    /// Numeric code used for the connection-state gauge.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Authenticating => 2.0,
            Self::Authenticated => 3.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last error surfaced to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum StatusError {
    /// Transport failed or closed unexpectedly.
    Transport(String),
    /// Server rejected the credential or challenge response.
    AuthRejected(String),
    /// Handshake did not finish in time.
    AuthTimeout,
    /// Application error reported by the server; connection stays open.
    Server(String),
}

impl StatusError {
    /// Check if this error came from authentication (rejection or timeout).
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::AuthRejected(_) | Self::AuthTimeout)
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::AuthRejected(msg) => write!(f, "authentication rejected: {msg}"),
            Self::AuthTimeout => f.write_str("authentication timed out"),
            Self::Server(msg) => write!(f, "server error: {msg}"),
        }
    }
}

/// Snapshot of client connectivity for display.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionStatus {
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// A reconnect is scheduled.
    pub reconnecting: bool,
    /// Consecutive reconnect attempts since the last successful handshake.
    pub reconnect_attempts: u32,
    /// Most recent error, cleared on successful authentication.
    pub last_error: Option<StatusError>,
    /// When the current session was established.
    pub connected_since: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    /// Check if subscriptions are live.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self.state, ConnectionState::Authenticated)
    }

    /// Check if the last failure was an authentication failure, so a
    /// consumer can show a credential warning instead of "reconnecting".
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(
            self.last_error,
            Some(StatusError::AuthRejected(_) | StatusError::AuthTimeout)
        )
    }
}
