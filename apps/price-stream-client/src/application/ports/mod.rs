//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SnapshotStore`: durable key-value slot holding the price-cache snapshot

use async_trait::async_trait;

use crate::domain::streaming::PriceSnapshot;

/// Errors raised by snapshot persistence adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying storage I/O failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored record could not be encoded or decoded.
    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Durable storage for the single price-cache snapshot.
///
/// Implementations only need to hold one record. `load` returns `Ok(None)`
/// when nothing has been saved yet.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Read the stored snapshot, if any.
    async fn load(&self) -> Result<Option<PriceSnapshot>, StoreError>;

    /// Replace the stored snapshot.
    async fn save(&self, snapshot: &PriceSnapshot) -> Result<(), StoreError>;
}
