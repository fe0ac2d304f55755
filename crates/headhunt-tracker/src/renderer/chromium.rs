//! Headless Chromium render client (chromiumoxide).
//!
//! Every session launches its own browser with a throwaway profile directory,
//! so a failed run can never leave state behind for the next one.

use super::{RenderContext, Renderer};
use crate::config::BrowserSettings;
use crate::error::TrackerError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Executables tried on `PATH` when none is configured.
const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

/// How long the resource count must stay flat before the network counts as idle.
const NETWORK_QUIET: Duration = Duration::from_millis(500);
const IDLE_POLL: Duration = Duration::from_millis(100);
const HANDLER_DRAIN: Duration = Duration::from_secs(5);

const IDLE_PROBE: &str = r#"
    (function() {
        return {
            ready: document.readyState === 'complete',
            resources: performance.getEntriesByType('resource').length
        };
    })()
"#;

/// Monotonic counter for per-session profile directories.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Deserialize)]
struct IdleProbe {
    ready: bool,
    resources: u64,
}

/// Launches one headless Chromium per render session.
pub struct ChromiumRenderer {
    settings: BrowserSettings,
}

impl ChromiumRenderer {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    /// Resolve the browser executable: configured path, then `CHROMIUM_PATH`, then `PATH`.
    pub fn find_executable(&self) -> Result<PathBuf, TrackerError> {
        if let Some(path) = &self.settings.executable {
            return Ok(path.clone());
        }

        if let Ok(path) = std::env::var("CHROMIUM_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
            warn!(
                "CHROMIUM_PATH points to a missing file: {}",
                path.display()
            );
        }

        BROWSER_CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| TrackerError::Browser("no Chromium executable found".into()))
    }

    fn browser_config(&self, profile_dir: PathBuf) -> Result<BrowserConfig, TrackerError> {
        let mut builder = BrowserConfig::builder()
            .chrome_executable(self.find_executable()?)
            .user_data_dir(profile_dir)
            .request_timeout(Duration::from_secs(30))
            .window_size(1920, 1080)
            .arg(format!("--user-agent={}", self.settings.user_agent))
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--no-first-run")
            .arg("--no-zygote")
            .arg("--disable-extensions")
            .arg("--mute-audio");

        if !self.settings.headless {
            builder = builder.with_head();
        }

        builder
            .build()
            .map_err(|e| TrackerError::Browser(format!("invalid browser config: {e}")))
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>, TrackerError> {
        let session = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let profile_dir = std::env::temp_dir().join(format!(
            "headhunt_chrome_{}_{session}",
            std::process::id()
        ));
        std::fs::create_dir_all(&profile_dir)
            .map_err(|e| TrackerError::Browser(format!("profile dir: {e}")))?;

        let config = self.browser_config(profile_dir.clone())?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| TrackerError::Browser(format!("launch failed: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    let msg = e.to_string();
                    // chromiumoxide does not know every CDP event Chrome emits
                    if msg.contains("did not match any variant") {
                        trace!("ignored CDP message: {msg}");
                    } else {
                        error!("browser handler error: {msg}");
                    }
                }
            }
            debug!("browser handler finished");
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler.abort();
                let _ = tokio::fs::remove_dir_all(&profile_dir).await;
                return Err(TrackerError::Browser(format!("new page: {e}")));
            }
        };

        info!(session, "render session started");
        Ok(Box::new(ChromiumContext {
            browser,
            page,
            handler,
            profile_dir,
        }))
    }
}

/// One browser process with a single page.
struct ChromiumContext {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
}

impl ChromiumContext {
    /// Poll until the document is complete and no new resources load for [`NETWORK_QUIET`].
    async fn wait_for_network_idle(&self) -> Result<(), TrackerError> {
        let mut last_count = None;
        let mut quiet_since = Instant::now();

        loop {
            let probe: IdleProbe = self
                .page
                .evaluate(IDLE_PROBE)
                .await
                .map_err(|e| TrackerError::TransientNetwork(e.to_string()))?
                .into_value()
                .map_err(|e| TrackerError::Browser(format!("idle probe: {e}")))?;

            if probe.ready && last_count == Some(probe.resources) {
                if quiet_since.elapsed() >= NETWORK_QUIET {
                    return Ok(());
                }
            } else {
                last_count = probe.ready.then_some(probe.resources);
                quiet_since = Instant::now();
            }

            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str) -> Result<(), TrackerError> {
        debug!(url, "navigating");
        self.page
            .goto(url)
            .await
            .map_err(|e| TrackerError::TransientNetwork(e.to_string()))?;
        self.wait_for_network_idle().await
    }

    async fn has_element(&mut self, selector: &str) -> Result<bool, TrackerError> {
        let literal = serde_json::to_string(selector)
            .map_err(|e| TrackerError::Browser(e.to_string()))?;
        let script = format!("document.querySelector({literal}) !== null");
        self.page
            .evaluate(script.as_str())
            .await
            .map_err(|e| TrackerError::TransientNetwork(e.to_string()))?
            .into_value()
            .map_err(|e| TrackerError::Browser(format!("selector probe: {e}")))
    }

    async fn content(&mut self) -> Result<String, TrackerError> {
        self.page
            .content()
            .await
            .map_err(|e| TrackerError::TransientNetwork(e.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<(), TrackerError> {
        let ChromiumContext {
            mut browser,
            page,
            mut handler,
            profile_dir,
        } = *self;
        drop(page);

        let closed = browser.close().await;
        if let Err(e) = browser.wait().await {
            warn!("waiting for browser exit failed: {e}");
        }
        if tokio::time::timeout(HANDLER_DRAIN, &mut handler).await.is_err() {
            handler.abort();
        }
        if let Err(e) = tokio::fs::remove_dir_all(&profile_dir).await {
            debug!("profile dir {} not removed: {e}", profile_dir.display());
        }

        closed
            .map(|_| ())
            .map_err(|e| TrackerError::Browser(format!("close failed: {e}")))
    }
}
