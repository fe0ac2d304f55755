//! Error taxonomy shared by the render client, extractor, store and scheduler.

use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong between loading the dashboard and serving a read.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    /// The page never reached network-idle within the navigation bound.
    #[error("page did not finish rendering within {0:?}")]
    RenderTimeout(Duration),

    /// The primary marker was absent after the bounded wait, or absent from the parsed DOM.
    #[error("primary marker `{selector}` not found")]
    MarkerNotFound { selector: String },

    /// The browser could not reach the page or lost its connection.
    #[error("network error while rendering: {0}")]
    TransientNetwork(String),

    /// A read was attempted before the first successful write.
    #[error("no snapshot captured yet")]
    StoreUnavailable,

    #[error("banner \"{name}\" not found")]
    UnknownBanner { name: String, available: Vec<String> },

    /// The durable store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The browser could not be launched or driven.
    #[error("browser error: {0}")]
    Browser(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run task ended without reporting an outcome.
    #[error("refresh run ended without a result")]
    RunAborted,
}

impl TrackerError {
    /// Whether this is a failure of the extraction run itself (as opposed to a read-path signal).
    pub fn is_run_failure(&self) -> bool {
        !matches!(
            self,
            TrackerError::StoreUnavailable | TrackerError::UnknownBanner { .. }
        )
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(e: rusqlite::Error) -> Self {
        TrackerError::Storage(e.to_string())
    }
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;
