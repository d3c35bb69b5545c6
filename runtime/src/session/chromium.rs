//! Chromium page session over a remote CDP endpoint, using chromiumoxide.

use super::{ConsentOutcome, NavigationResult, PageSession, SessionConnector};
use crate::error::{CaptureError, Result};
use crate::interceptor::{InterceptedResponse, UrlPattern};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventResponseReceived,
    GetResponseBodyParams, RequestId,
};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connects to remote Chromium instances.
pub struct ChromiumConnector;

#[async_trait]
impl SessionConnector for ChromiumConnector {
    async fn connect(&self, cdp_url: &str) -> Result<Box<dyn PageSession>> {
        Ok(Box::new(ChromiumSession::connect(cdp_url).await?))
    }
}

/// A single page in a remote Chromium browser.
pub struct ChromiumSession {
    // Kept alive for the lifetime of the page; dropping it closes the connection.
    _browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl ChromiumSession {
    /// Connect over CDP and open a fresh page with the Network domain enabled.
    pub async fn connect(cdp_url: &str) -> Result<Self> {
        info!("connecting to browser using CDP URL: {cdp_url}");
        let (browser, mut handler) = Browser::connect(cdp_url)
            .await
            .map_err(|e| CaptureError::Browser(format!("failed to connect to {cdp_url}: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {e}");
                }
            }
        });

        let page = match Self::open_page(&browser).await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(e);
            }
        };

        Ok(Self {
            _browser: browser,
            page,
            handler,
            watchers: Mutex::new(Vec::new()),
        })
    }

    async fn open_page(browser: &Browser) -> Result<Page> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| CaptureError::Browser(format!("failed to create new page: {e}")))?;
        page.execute(EnableParams::default()).await?;
        Ok(page)
    }

    async fn nth(&self, selector: &str, index: usize) -> Result<Element> {
        self.page
            .find_elements(selector)
            .await?
            .into_iter()
            .nth(index)
            .ok_or_else(|| CaptureError::ElementNotFound {
                selector: selector.to_string(),
                index,
            })
    }

    async fn eval_value(&self, script: String) -> Result<serde_json::Value> {
        let result = self.page.evaluate(script).await?;
        result
            .into_value()
            .map_err(|e| CaptureError::Browser(format!("failed to convert JS result: {e:?}")))
    }
}

/// Pairs `Network.responseReceived` with the load outcome of the same request.
///
/// Only requests whose URL matched are reported. A load that completes before
/// its response is seen is held until the response arrives, so neither order
/// loses a record.
#[derive(Debug, Default)]
pub(crate) struct ResponseCorrelator {
    // request id -> (url, status) for matching responses whose body is not ready yet
    pending: HashMap<String, (String, u16)>,
    // non-matching responses still waiting for their load outcome
    ignored: HashSet<String>,
    // loads that finished before their response was seen
    finished_early: HashSet<String>,
}

impl ResponseCorrelator {
    /// Record a response. Returns `(url, status)` when the load already
    /// finished and the body can be fetched now.
    pub(crate) fn on_received(
        &mut self,
        request_id: &str,
        url: &str,
        status: u16,
        pattern: &UrlPattern,
    ) -> Option<(String, u16)> {
        let finished = self.finished_early.remove(request_id);
        if !pattern.matches(url) {
            if !finished {
                self.ignored.insert(request_id.to_string());
            }
            return None;
        }
        if finished {
            return Some((url.to_string(), status));
        }
        self.pending
            .insert(request_id.to_string(), (url.to_string(), status));
        None
    }

    /// A load finished. Returns `(url, status)` if it belongs to a matching response.
    pub(crate) fn on_finished(&mut self, request_id: &str) -> Option<(String, u16)> {
        if let Some(tracked) = self.pending.remove(request_id) {
            return Some(tracked);
        }
        if !self.ignored.remove(request_id) {
            self.finished_early.insert(request_id.to_string());
        }
        None
    }

    /// A load failed. Returns the failed response if it matched.
    pub(crate) fn on_failed(&mut self, request_id: &str, error: &str) -> Option<InterceptedResponse> {
        self.ignored.remove(request_id);
        self.finished_early.remove(request_id);
        self.pending
            .remove(request_id)
            .map(|(url, status)| InterceptedResponse {
                url,
                status,
                body: Err(error.to_string()),
            })
    }

    /// Nothing is waiting on a response or a load outcome.
    pub(crate) fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.ignored.is_empty() && self.finished_early.is_empty()
    }
}

/// Fetch a finished response's body, decoding base64 payloads.
async fn fetch_body(page: &Page, request_id: RequestId) -> std::result::Result<String, String> {
    let returns = page
        .execute(GetResponseBodyParams::new(request_id))
        .await
        .map_err(|e| e.to_string())?;
    decode_body(&returns.result.body, returns.result.base64_encoded)
}

pub(crate) fn decode_body(body: &str, base64_encoded: bool) -> std::result::Result<String, String> {
    if !base64_encoded {
        return Ok(body.to_string());
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| format!("invalid base64 body: {e}"))?;
    String::from_utf8(bytes).map_err(|e| format!("body is not UTF-8: {e}"))
}

/// In-page script: poll until the document is complete and the resource
/// count has been stable for a second, or the timeout runs out.
fn network_idle_script(timeout_ms: u64) -> String {
    format!(
        r#"(async () => {{
            const timeoutMs = {timeout_ms};
            const idleMs = 1000;
            const interval = 250;
            const start = Date.now();
            let lastCount = 0;
            let stableMs = 0;
            try {{ lastCount = performance.getEntriesByType('resource').length; }} catch (_) {{ lastCount = 0; }}
            while (Date.now() - start < timeoutMs) {{
                await new Promise(r => setTimeout(r, interval));
                let curCount = lastCount;
                try {{ curCount = performance.getEntriesByType('resource').length; }} catch (_) {{}}
                if (document.readyState === 'complete' && curCount === lastCount) {{
                    stableMs += interval;
                    if (stableMs >= idleMs) return true;
                }} else {{
                    stableMs = 0;
                }}
                lastCount = curCount;
            }}
            return false;
        }})()"#
    )
}

/// In-page script: click the first visible `<button>` containing `text`,
/// polling until `timeout_ms`. Resolves to `"handled"` or `"absent"`.
fn consent_script(text: &str, timeout_ms: u64) -> String {
    let text = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".into());
    format!(
        r#"(async () => {{
            const text = {text};
            const timeoutMs = {timeout_ms};
            const start = Date.now();
            const visible = (el) => {{
                const r = el.getBoundingClientRect();
                const s = window.getComputedStyle(el);
                return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
            }};
            while (true) {{
                const btn = Array.from(document.querySelectorAll('button'))
                    .find(b => (b.innerText || b.textContent || '').includes(text) && visible(b));
                if (btn) {{ btn.click(); return 'handled'; }}
                if (Date.now() - start >= timeoutMs) return 'absent';
                await new Promise(r => setTimeout(r, 250));
            }}
        }})()"#
    )
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn watch_responses(
        &self,
        pattern: UrlPattern,
    ) -> Result<mpsc::UnboundedReceiver<InterceptedResponse>> {
        let mut received = self.page.event_listener::<EventResponseReceived>().await?;
        let mut finished = self.page.event_listener::<EventLoadingFinished>().await?;
        let mut failed = self.page.event_listener::<EventLoadingFailed>().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let page = self.page.clone();

        let watcher = tokio::spawn(async move {
            let mut correlator = ResponseCorrelator::default();
            loop {
                // Biased towards `received`: the handler forwards events in wire
                // order, so a buffered finish always has its response buffered too.
                let ready = tokio::select! {
                    biased;
                    Some(event) = received.next() => correlator
                        .on_received(
                            event.request_id.inner(),
                            &event.response.url,
                            event.response.status as u16,
                            &pattern,
                        )
                        .map(|(url, status)| (event.request_id.clone(), url, status)),
                    Some(event) = finished.next() => correlator
                        .on_finished(event.request_id.inner())
                        .map(|(url, status)| (event.request_id.clone(), url, status)),
                    Some(event) = failed.next() => {
                        if let Some(response) =
                            correlator.on_failed(event.request_id.inner(), &event.error_text)
                        {
                            if tx.send(response).is_err() {
                                break;
                            }
                        }
                        None
                    }
                    else => break,
                };

                if let Some((request_id, url, status)) = ready {
                    let body = fetch_body(&page, request_id).await;
                    if tx.send(InterceptedResponse { url, status, body }).is_err() {
                        break;
                    }
                }
            }
            debug!("response watcher stopped");
        });

        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(watcher);
        Ok(rx)
    }

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationResult> {
        let start = Instant::now();
        let result = tokio::time::timeout(timeout, self.page.goto(url)).await;
        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .unwrap_or_else(|| url.to_string());
                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => Err(CaptureError::Browser(format!("navigation failed: {e}"))),
            Err(_) => Err(CaptureError::Browser(format!(
                "navigation timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<bool> {
        let value = self
            .eval_value(network_idle_script(timeout.as_millis() as u64))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn dismiss_consent(&self, button_text: &str, timeout: Duration) -> ConsentOutcome {
        if button_text.is_empty() {
            return ConsentOutcome::Absent;
        }
        match self
            .eval_value(consent_script(button_text, timeout.as_millis() as u64))
            .await
        {
            Ok(value) if value.as_str() == Some("handled") => ConsentOutcome::Handled,
            Ok(_) => ConsentOutcome::Absent,
            Err(e) => ConsentOutcome::Failed(e.to_string()),
        }
    }

    async fn trigger_lazy_load(&self, settle: Duration) -> Result<()> {
        self.page
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await?;
        tokio::time::sleep(settle).await;
        Ok(())
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        Ok(self.page.find_elements(selector).await?.len())
    }

    async fn scroll_into_view(&self, selector: &str, index: usize) -> Result<()> {
        self.nth(selector, index).await?.scroll_into_view().await?;
        Ok(())
    }

    async fn click(&self, selector: &str, index: usize) -> Result<()> {
        self.nth(selector, index).await?.click().await?;
        Ok(())
    }

    async fn click_first(&self, selector: &str) -> Result<()> {
        self.page.find_element(selector).await?.click().await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let this = *self;
        let watchers = this.watchers.into_inner().unwrap_or_else(|e| e.into_inner());
        for watcher in watchers {
            watcher.abort();
        }
        if let Err(e) = this.page.close().await {
            warn!("failed to close page: {e}");
        }
        this.handler.abort();
        Ok(())
    }
}
