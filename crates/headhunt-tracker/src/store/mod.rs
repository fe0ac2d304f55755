//! Snapshot store: holds the latest successfully extracted snapshot.
//!
//! Two implementations are provided:
//!
//! - [`MemoryStore`] keeps an immutable snapshot behind a short-held lock and
//!   swaps it wholesale on every write.
//! - [`SqliteStore`] persists the snapshot across restarts with per-key
//!   upserts, all of one write inside a single transaction.
//!
//! Both merge banners by name: a write replaces the global portion and the
//! full metric triple of every banner it carries, and keeps banners it does
//! not mention.

pub mod memory;
pub mod sqlite;

use crate::config::StoreConfig;
use crate::error::TrackerError;
use crate::model::{BannerSnapshot, Snapshot};
use std::sync::Arc;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage for the single latest snapshot.
pub trait SnapshotStore: Send + Sync {
    /// Apply one run's snapshot. Writing the same snapshot twice is a no-op.
    fn write(&self, snapshot: &Snapshot) -> Result<(), TrackerError>;

    /// The current snapshot, or [`TrackerError::StoreUnavailable`] before the first write.
    fn read(&self) -> Result<Arc<Snapshot>, TrackerError>;

    /// One banner by exact name, or [`TrackerError::UnknownBanner`] listing the
    /// stored names. Before the first write this is [`TrackerError::StoreUnavailable`].
    fn read_banner(&self, name: &str) -> Result<BannerSnapshot, TrackerError> {
        let snapshot = self.read()?;
        snapshot
            .banners
            .get(name)
            .cloned()
            .ok_or_else(|| TrackerError::UnknownBanner {
                name: name.to_string(),
                available: snapshot.banner_names(),
            })
    }

    /// Names of the stored banners, sorted. Empty before the first write.
    fn banner_names(&self) -> Result<Vec<String>, TrackerError> {
        match self.read() {
            Ok(snapshot) => Ok(snapshot.banner_names()),
            Err(TrackerError::StoreUnavailable) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// Open the store selected by configuration.
pub fn open(config: &StoreConfig) -> Result<Arc<dyn SnapshotStore>, TrackerError> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreConfig::Sqlite { path } => Ok(Arc::new(SqliteStore::open(path)?)),
    }
}
