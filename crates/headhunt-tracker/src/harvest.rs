//! One extraction run: render the dashboard, wait for it, extract a snapshot.

use crate::config::Config;
use crate::error::TrackerError;
use crate::extraction::PageExtractor;
use crate::model::Snapshot;
use crate::renderer::{RenderContext, Renderer};
use chrono::Utc;
use scraper::Html;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Deadlines and target for a run.
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub target_url: String,
    /// Bound on reaching network-idle. Also bounds session launch and DOM serialization.
    pub navigation_timeout: Duration,
    /// Bound on the primary marker appearing after network-idle.
    pub marker_timeout: Duration,
    pub marker_poll: Duration,
}

impl HarvestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_url: config.target_url.clone(),
            navigation_timeout: config.navigation_timeout(),
            marker_timeout: config.marker_timeout(),
            marker_poll: Duration::from_millis(200),
        }
    }
}

/// Runs the render → wait → extract pipeline.
pub struct Harvester {
    renderer: Arc<dyn Renderer>,
    extractor: Arc<dyn PageExtractor>,
    settings: HarvestSettings,
}

impl Harvester {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        extractor: Arc<dyn PageExtractor>,
        settings: HarvestSettings,
    ) -> Self {
        Self {
            renderer,
            extractor,
            settings,
        }
    }

    /// Perform one run. The render session is closed on every path out of this function.
    pub async fn harvest(&self) -> Result<Snapshot, TrackerError> {
        let started = Instant::now();
        let nav = self.settings.navigation_timeout;
        let mut context = timeout(nav, self.renderer.new_context())
            .await
            .map_err(|_| TrackerError::RenderTimeout(nav))??;

        let outcome = self.run(context.as_mut()).await;

        if let Err(e) = context.close().await {
            warn!("failed to close render session: {e}");
        }
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "harvest finished"
        );
        outcome
    }

    async fn run(&self, context: &mut dyn RenderContext) -> Result<Snapshot, TrackerError> {
        let nav = self.settings.navigation_timeout;
        timeout(nav, context.navigate(&self.settings.target_url))
            .await
            .map_err(|_| TrackerError::RenderTimeout(nav))??;

        self.wait_for_primary(context).await?;

        let html = timeout(nav, context.content())
            .await
            .map_err(|_| TrackerError::RenderTimeout(nav))??;
        let extracted = {
            let document = Html::parse_document(&html);
            self.extractor.extract(&document)?
        };

        Ok(Snapshot::from_extraction(
            extracted.global,
            extracted.banners,
            Utc::now(),
        ))
    }

    async fn wait_for_primary(&self, context: &mut dyn RenderContext) -> Result<(), TrackerError> {
        let selector = self.extractor.primary_selector();
        let poll = self.settings.marker_poll;

        let wait = async {
            while !context.has_element(selector).await? {
                tokio::time::sleep(poll).await;
            }
            Ok::<(), TrackerError>(())
        };

        timeout(self.settings.marker_timeout, wait)
            .await
            .map_err(|_| TrackerError::MarkerNotFound {
                selector: selector.to_string(),
            })?
    }
}
