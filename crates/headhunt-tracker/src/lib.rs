//! Headhunt telemetry harvester.
//!
//! Renders a third-party headhunt dashboard in headless Chromium on a fixed
//! interval, extracts global and per-banner metrics with a class-marker
//! heuristic, and keeps the latest snapshot for a small JSON read API.

pub mod api;
pub mod config;
pub mod error;
pub mod extraction;
pub mod harvest;
pub mod model;
pub mod renderer;
pub mod scheduler;
pub mod store;

pub use config::Config;
pub use error::TrackerError;
pub use extraction::{ExtractedMetrics, MarkerExtractor, PageExtractor};
pub use harvest::{HarvestSettings, Harvester};
pub use model::{BannerSnapshot, GlobalSnapshot, Metrics, Snapshot};
pub use renderer::{ChromiumRenderer, RenderContext, Renderer};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerState, Trigger};
pub use store::{MemoryStore, SnapshotStore, SqliteStore};
