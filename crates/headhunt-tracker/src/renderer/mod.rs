//! Render client capability.
//!
//! A [`Renderer`] hands out render sessions. Each session is one browser
//! process plus page and must be closed by its owner on every exit path.

pub mod chromium;

use crate::error::TrackerError;
use async_trait::async_trait;

pub use chromium::ChromiumRenderer;

/// Acquires render sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Start a new session. The caller owns it and must call [`RenderContext::close`].
    async fn new_context(&self) -> Result<Box<dyn RenderContext>, TrackerError>;
}

/// One live render session.
#[async_trait]
pub trait RenderContext: Send {
    /// Load `url` and return once the page is loaded and the network is idle.
    /// Unbounded; callers apply their own deadline.
    async fn navigate(&mut self, url: &str) -> Result<(), TrackerError>;

    /// Whether an element matching the CSS `selector` is currently in the DOM.
    async fn has_element(&mut self, selector: &str) -> Result<bool, TrackerError>;

    /// Serialized rendered DOM.
    async fn content(&mut self) -> Result<String, TrackerError>;

    /// Release the session.
    async fn close(self: Box<Self>) -> Result<(), TrackerError>;
}
