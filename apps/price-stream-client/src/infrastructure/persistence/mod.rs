//! Snapshot Persistence Adapters
//!
//! Implementations of the `SnapshotStore` port:
//!
//! - `FileSnapshotStore`: one JSON file, replaced atomically on save
//! - `MemorySnapshotStore`: process-local slot for tests and embedding

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{SnapshotStore, StoreError};
use crate::domain::streaming::PriceSnapshot;

// =============================================================================
// File Store
// =============================================================================

/// Stores the snapshot as a JSON file.
///
/// Saves write to a uniquely named temporary file in the target directory
/// and rename it over the target. A crash mid-write never leaves a truncated
/// snapshot, and concurrent writers never share a temporary file.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    /// Create a store backed by `path`. The file does not need to exist.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> Result<Option<PriceSnapshot>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn save(&self, snapshot: &PriceSnapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(snapshot)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// Keeps the snapshot in memory.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slot: RwLock<Option<PriceSnapshot>>,
}

impl MemorySnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with a snapshot.
    #[must_use]
    pub fn with_snapshot(snapshot: PriceSnapshot) -> Self {
        Self {
            slot: RwLock::new(Some(snapshot)),
        }
    }

    /// Get the currently stored snapshot.
    #[must_use]
    pub fn current(&self) -> Option<PriceSnapshot> {
        self.slot.read().clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<PriceSnapshot>, StoreError> {
        Ok(self.current())
    }

    async fn save(&self, snapshot: &PriceSnapshot) -> Result<(), StoreError> {
        *self.slot.write() = Some(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::*;

    fn sample_snapshot() -> PriceSnapshot {
        let mut data = BTreeMap::new();
        data.insert("AAPL".to_string(), Decimal::from_str("187.23").unwrap());
        data.insert("MSFT".to_string(), Decimal::from_str("410.50").unwrap());
        PriceSnapshot::now(data)
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("prices.json"));

        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("nested").join("prices.json"));
        let snapshot = sample_snapshot();

        store.save(&snapshot).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();

        assert_eq!(loaded.data, snapshot.data);
        assert_eq!(
            loaded.saved_at.timestamp_millis(),
            snapshot.saved_at.timestamp_millis()
        );
        let leftovers = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn file_store_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("prices.json"));

        store.save(&sample_snapshot()).await.unwrap();
        store.save(&PriceSnapshot::now(BTreeMap::new())).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded.data.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn file_store_concurrent_writers_share_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.json");
        let first = FileSnapshotStore::new(&path);
        let second = FileSnapshotStore::new(&path);
        let snapshot = sample_snapshot();

        let mut saves = Vec::new();
        for i in 0..16 {
            let store = if i % 2 == 0 { first.clone() } else { second.clone() };
            let snapshot = snapshot.clone();
            saves.push(tokio::spawn(async move { store.save(&snapshot).await }));
        }
        for save in saves {
            save.await.unwrap().unwrap();
        }

        let loaded = first.load().await.unwrap().unwrap();
        assert_eq!(loaded.data, snapshot.data);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn file_store_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result = FileSnapshotStore::new(path).load().await;
        assert!(matches!(result, Err(StoreError::Encoding(_))));
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemorySnapshotStore::new();
        assert!(store.load().await.unwrap().is_none());

        let snapshot = sample_snapshot();
        tokio_test::assert_ok!(store.save(&snapshot).await);
        assert_eq!(store.current(), Some(snapshot));
    }
}
