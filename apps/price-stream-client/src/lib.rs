#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Stream Client - Real-time Price Feed
//!
//! Maintains one authenticated WebSocket connection to a price server,
//! keeps the subscribed symbol set in sync across reconnects, and serves
//! the latest prices (persisted across restarts) to any number of
//! consumers in the process.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types and rules, no I/O
//!   - `streaming`: Prices, snapshots, connection status
//!   - `subscription`: Desired vs. wire subscription sets
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Snapshot store interface
//!   - `services`: The `StreamingClient` facade
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: WebSocket codec, handshake, connection loop
//!   - `cache`: Price cache and update fan-out
//!   - `persistence`: File and in-memory snapshot stores
//!   - `config`: Environment configuration
//!   - `health`, `metrics`, `telemetry`: Operations
//!
//! # Data Flow
//!
//! ```text
//! Consumers ── subscribe/unsubscribe ──► SubscriptionRegistry
//!     ▲                                        │ resync / diff
//!     │                                        ▼
//!     │                                ConnectionManager ◄──── WebSocket ────► Price server
//!     │                                        │ price_update
//!     │                                        ▼
//!     └──────────── broadcast ─────────── PriceCache ── save ──► SnapshotStore
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{
    ConnectionState, ConnectionStatus, PriceEntry, PriceSnapshot, PriceSource, StatusError,
    Symbol,
};
pub use domain::subscription::{SubscriptionChanges, SubscriptionRegistry, SubscriptionStats};

// Application
pub use application::ports::{SnapshotStore, StoreError};
pub use application::services::StreamingClient;

// Infrastructure config
pub use infrastructure::config::{CacheSettings, ClientConfig, ConfigError, ServerSettings};

// Feed
pub use infrastructure::feed::{
    ConnectOutcome, Credentials, HeartbeatConfig, ReconnectConfig, sign_challenge,
};

// Persistence
pub use infrastructure::persistence::{FileSnapshotStore, MemorySnapshotStore};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
