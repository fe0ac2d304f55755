//! Snapshot data model.
//!
//! Metric values are kept as the verbatim trimmed text shown on the dashboard.
//! The source formats them with locale punctuation and percent signs
//! (`"1,234,567"`, `"0.80%"`) and they are redisplayed unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The metric triple shared by the global figures and every banner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub pulls: Option<String>,
    pub six_star_rate: Option<String>,
    pub users: Option<String>,
}

impl Metrics {
    /// True when no marker was found at all.
    pub fn is_empty(&self) -> bool {
        self.pulls.is_none() && self.six_star_rate.is_none() && self.users.is_none()
    }
}

/// Whole-game figures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSnapshot {
    #[serde(flatten)]
    pub metrics: Metrics,
}

/// Figures for one named banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannerSnapshot {
    pub name: String,
    #[serde(flatten)]
    pub metrics: Metrics,
    /// Capture time of the run that last wrote this banner.
    pub captured_at: DateTime<Utc>,
}

/// The latest captured set of metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub global: GlobalSnapshot,
    /// Keyed by banner name.
    pub banners: BTreeMap<String, BannerSnapshot>,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Build a snapshot from one run's extraction output, stamping every banner
    /// with the run's capture time.
    pub fn from_extraction(
        global: Metrics,
        banners: BTreeMap<String, Metrics>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let banners = banners
            .into_iter()
            .map(|(name, metrics)| {
                let banner = BannerSnapshot {
                    name: name.clone(),
                    metrics,
                    captured_at,
                };
                (name, banner)
            })
            .collect();

        Self {
            global: GlobalSnapshot { metrics: global },
            banners,
            captured_at,
        }
    }

    /// Apply `incoming` on top of `self`: the global portion and capture time are
    /// replaced, banners are upserted by name with all three fields overwritten.
    /// Banners absent from `incoming` keep their previous values.
    pub fn upsert(&self, incoming: &Snapshot) -> Snapshot {
        let mut banners = self.banners.clone();
        for (name, banner) in &incoming.banners {
            banners.insert(name.clone(), banner.clone());
        }

        Snapshot {
            global: incoming.global.clone(),
            banners,
            captured_at: incoming.captured_at,
        }
    }

    /// Names of the banners currently held, sorted.
    pub fn banner_names(&self) -> Vec<String> {
        self.banners.keys().cloned().collect()
    }
}
