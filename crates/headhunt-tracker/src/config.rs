//! Service configuration.
//!
//! Loaded from an optional JSON file; every field has a default matching the
//! live dashboard, so an empty `{}` file is a valid configuration.

use crate::error::TrackerError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Dashboard the harvester renders.
pub const DEFAULT_TARGET_URL: &str = "https://endfieldtools.dev/headhunt-tracker/#global";

/// Banners tracked unless the configuration says otherwise.
pub const DEFAULT_BANNERS: &[&str] = &[
    "Basic Headhunting",
    "Scars of the Forge",
    "Hues of Passion",
    "The Floaty Messenger",
];

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120 Safari/537.36";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub target_url: String,
    /// Banner catalog. Banners are never discovered from the page.
    pub banners: Vec<String>,
    pub markers: MarkerClasses,
    /// How many ancestors above a banner label are searched for markers.
    pub ancestor_depth: usize,
    pub navigation_timeout_secs: u64,
    pub marker_timeout_secs: u64,
    pub refresh_interval_secs: u64,
    pub bind: SocketAddr,
    pub store: StoreConfig,
    pub browser: BrowserSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_url: DEFAULT_TARGET_URL.to_string(),
            banners: DEFAULT_BANNERS.iter().map(|s| s.to_string()).collect(),
            markers: MarkerClasses::default(),
            ancestor_depth: 6,
            navigation_timeout_secs: 30,
            marker_timeout_secs: 15,
            refresh_interval_secs: 30 * 60,
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            store: StoreConfig::Memory,
            browser: BrowserSettings::default(),
        }
    }
}

/// The three class combinations that tag metric elements on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerClasses {
    pub pulls: Vec<String>,
    pub six_star_rate: Vec<String>,
    pub users: Vec<String>,
}

impl Default for MarkerClasses {
    fn default() -> Self {
        let classes = |cs: &[&str]| cs.iter().map(|c| c.to_string()).collect();
        Self {
            pulls: classes(&["font-bold", "text-text-primary"]),
            six_star_rate: classes(&["font-bold", "text-orange-500"]),
            users: classes(&["font-bold", "text-blue-400"]),
        }
    }
}

impl MarkerClasses {
    /// CSS selector for the primary (pulls) marker, e.g. `.font-bold.text-text-primary`.
    pub fn primary_selector(&self) -> String {
        class_selector(&self.pulls)
    }
}

/// Join a class list into a compound class selector.
pub fn class_selector(classes: &[String]) -> String {
    classes.iter().map(|c| format!(".{c}")).collect()
}

/// Which snapshot store backs the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-lifetime store.
    Memory,
    /// SQLite file surviving restarts.
    Sqlite { path: PathBuf },
}

/// Chromium launch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Explicit executable; otherwise `CHROMIUM_PATH` and `PATH` are searched.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub user_agent: String,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Config {
    /// Read a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Reject configurations the harvester cannot run with.
    pub fn validate(&self) -> Result<(), TrackerError> {
        url::Url::parse(&self.target_url)
            .map_err(|e| TrackerError::InvalidConfig(format!("target_url: {e}")))?;

        if self.banners.is_empty() {
            return Err(TrackerError::InvalidConfig(
                "banner catalog is empty".into(),
            ));
        }
        if self.banners.iter().any(|b| b.trim().is_empty()) {
            return Err(TrackerError::InvalidConfig("blank banner name".into()));
        }
        if self.ancestor_depth == 0 {
            return Err(TrackerError::InvalidConfig(
                "ancestor_depth must be at least 1".into(),
            ));
        }
        if self.navigation_timeout_secs == 0
            || self.marker_timeout_secs == 0
            || self.refresh_interval_secs == 0
        {
            return Err(TrackerError::InvalidConfig(
                "timeouts and refresh interval must be non-zero".into(),
            ));
        }

        for (kind, classes) in [
            ("pulls", &self.markers.pulls),
            ("six_star_rate", &self.markers.six_star_rate),
            ("users", &self.markers.users),
        ] {
            if classes.is_empty() {
                return Err(TrackerError::InvalidConfig(format!(
                    "marker `{kind}` has no classes"
                )));
            }
            if classes
                .iter()
                .any(|c| c.is_empty() || c.contains(|ch: char| ch.is_whitespace() || ch == '.'))
            {
                return Err(TrackerError::InvalidConfig(format!(
                    "marker `{kind}` has a malformed class"
                )));
            }
        }

        Ok(())
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn marker_timeout(&self) -> Duration {
        Duration::from_secs(self.marker_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Default location of the durable store: `~/.headhunt/stats.db`.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".headhunt")
        .join("stats.db")
}
