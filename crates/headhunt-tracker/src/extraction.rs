//! Markup-independent metric extraction from a rendered dashboard.
//!
//! The dashboard has no stable ids. Metric values are recognised by the
//! combination of style classes on their element (the "markers"), and banners
//! by a leaf element whose text is exactly the banner name. A banner's metrics
//! are the markers inside the nearest ancestor of its label that has any.

use crate::config::{class_selector, Config, MarkerClasses};
use crate::error::TrackerError;
use crate::model::Metrics;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use tracing::debug;

/// Metrics pulled out of one rendered document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedMetrics {
    pub global: Metrics,
    pub banners: BTreeMap<String, Metrics>,
}

/// A pluggable page extractor.
///
/// Implementations receive the parsed rendered DOM and return the structured
/// metrics, or fail when the page is unusable.
pub trait PageExtractor: Send + Sync {
    /// Selector whose presence signals that the page has rendered its metrics.
    fn primary_selector(&self) -> &str;

    /// Extract global and per-banner metrics.
    fn extract(&self, document: &Html) -> Result<ExtractedMetrics, TrackerError>;
}

/// Compiled marker selectors.
struct MarkerSet {
    pulls: Selector,
    six_star_rate: Selector,
    users: Selector,
}

impl MarkerSet {
    fn compile(classes: &MarkerClasses) -> Result<Self, TrackerError> {
        Ok(Self {
            pulls: compile_selector(&classes.pulls)?,
            six_star_rate: compile_selector(&classes.six_star_rate)?,
            users: compile_selector(&classes.users)?,
        })
    }
}

fn compile_selector(classes: &[String]) -> Result<Selector, TrackerError> {
    let css = class_selector(classes);
    Selector::parse(&css)
        .map_err(|e| TrackerError::InvalidConfig(format!("marker selector `{css}`: {e}")))
}

/// The class-combination heuristic used against the live dashboard.
pub struct MarkerExtractor {
    markers: MarkerSet,
    primary: String,
    catalog: Vec<String>,
    ancestor_depth: usize,
}

impl MarkerExtractor {
    /// Build an extractor for the given marker classes and banner catalog.
    pub fn new(
        classes: &MarkerClasses,
        catalog: Vec<String>,
        ancestor_depth: usize,
    ) -> Result<Self, TrackerError> {
        Ok(Self {
            markers: MarkerSet::compile(classes)?,
            primary: classes.primary_selector(),
            catalog,
            ancestor_depth,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, TrackerError> {
        Self::new(
            &config.markers,
            config.banners.clone(),
            config.ancestor_depth,
        )
    }

    /// Markers inside `scope`, excluding `scope` itself. `None` when none are present.
    fn markers_within(&self, scope: ElementRef<'_>) -> Option<Metrics> {
        let first = |selector: &Selector| {
            scope
                .select(selector)
                .find(|el| el.id() != scope.id())
                .map(trimmed_text)
        };

        let metrics = Metrics {
            pulls: first(&self.markers.pulls),
            six_star_rate: first(&self.markers.six_star_rate),
            users: first(&self.markers.users),
        };
        (!metrics.is_empty()).then_some(metrics)
    }

    /// Walk up from a banner label to the first ancestor holding any marker.
    fn banner_metrics(&self, label: ElementRef<'_>) -> Option<(usize, Metrics)> {
        label
            .ancestors()
            .filter_map(ElementRef::wrap)
            .take(self.ancestor_depth)
            .enumerate()
            .find_map(|(i, ancestor)| self.markers_within(ancestor).map(|m| (i + 1, m)))
    }
}

impl PageExtractor for MarkerExtractor {
    fn primary_selector(&self) -> &str {
        &self.primary
    }

    fn extract(&self, document: &Html) -> Result<ExtractedMetrics, TrackerError> {
        let first = |selector: &Selector| document.select(selector).next().map(trimmed_text);

        let pulls = first(&self.markers.pulls).ok_or_else(|| TrackerError::MarkerNotFound {
            selector: self.primary.clone(),
        })?;
        let global = Metrics {
            pulls: Some(pulls),
            six_star_rate: first(&self.markers.six_star_rate),
            users: first(&self.markers.users),
        };

        let mut banners = BTreeMap::new();
        for element in document.tree.root().descendants().filter_map(ElementRef::wrap) {
            if !is_leaf(element) {
                continue;
            }
            let text = trimmed_text(element);
            let Some(name) = self.catalog.iter().find(|name| **name == text) else {
                continue;
            };

            match self.banner_metrics(element) {
                Some((depth, metrics)) => {
                    debug!(banner = %name, depth, "banner markers found");
                    banners.insert(name.clone(), metrics);
                }
                None => debug!(banner = %name, "no markers within ancestor bound"),
            }
        }

        Ok(ExtractedMetrics { global, banners })
    }
}

/// An element with no child elements (text children are allowed).
fn is_leaf(element: ElementRef<'_>) -> bool {
    !element.children().any(|child| child.value().is_element())
}

fn trimmed_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}
