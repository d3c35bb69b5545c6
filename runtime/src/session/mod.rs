//! Page session abstraction over a remote browser.
//!
//! Defines the `PageSession` and `SessionConnector` traits so the capture
//! flow can run against Chromium (via chromiumoxide) or an in-process fake.

pub mod chromium;

use crate::error::Result;
use crate::interceptor::{InterceptedResponse, UrlPattern};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Outcome of the optional consent-dialog step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentOutcome {
    /// A consent button was found and clicked.
    Handled,
    /// No consent button appeared within the visibility timeout.
    Absent,
    /// The step failed; the run carries on regardless.
    Failed(String),
}

/// A navigable page in a remote browser.
///
/// Elements are addressed by `(selector, index)` and resolved afresh on every
/// call, so a handle never outlives a DOM mutation.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Start observing completed responses whose URL matches `pattern`.
    ///
    /// Must be called before `navigate` so early responses are not missed.
    async fn watch_responses(
        &self,
        pattern: UrlPattern,
    ) -> Result<mpsc::UnboundedReceiver<InterceptedResponse>>;
    /// Navigate to a URL, bounded by `timeout`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationResult>;
    /// Wait until network activity settles. Returns false if `timeout` elapsed first.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<bool>;
    /// Click a visible button containing `button_text`, if one shows up within `timeout`.
    async fn dismiss_consent(&self, button_text: &str, timeout: Duration) -> ConsentOutcome;
    /// Scroll to the bottom and pause so progressively loaded content appears.
    async fn trigger_lazy_load(&self, settle: Duration) -> Result<()>;
    /// Number of live elements matching `selector`.
    async fn count(&self, selector: &str) -> Result<usize>;
    /// Bring the `index`-th element matching `selector` into the viewport.
    async fn scroll_into_view(&self, selector: &str, index: usize) -> Result<()>;
    /// Click the `index`-th element matching `selector`.
    async fn click(&self, selector: &str, index: usize) -> Result<()>;
    /// Click the first element matching `selector`.
    async fn click_first(&self, selector: &str) -> Result<()>;
    /// Close the page and stop any response watchers.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens a [`PageSession`] on a browser reachable at a CDP endpoint.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, cdp_url: &str) -> Result<Box<dyn PageSession>>;
}
