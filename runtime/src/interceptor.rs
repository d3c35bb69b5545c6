//! Response interceptor: filters page network responses and keeps the
//! structured payloads that match.
//!
//! The interceptor never fails. A malformed body, a missing path, or a body
//! the browser could not deliver is logged and counted, and the next response
//! is processed normally.

use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One network response delivered by a page session.
#[derive(Debug, Clone)]
pub struct InterceptedResponse {
    pub url: String,
    pub status: u16,
    /// Response body, or the reason it could not be read.
    pub body: std::result::Result<String, String>,
}

impl InterceptedResponse {
    pub fn ok(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            body: Ok(body.into()),
        }
    }
}

/// One extracted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapturedRecord {
    pub payload: Value,
}

impl CapturedRecord {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// Name used in log lines.
    pub fn display_name(&self, field: &str) -> &str {
        self.payload
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
    }
}

/// Ordered, append-only collection of captured records.
///
/// Cloning yields another handle to the same storage.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    inner: Arc<Mutex<Vec<CapturedRecord>>>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: CapturedRecord) {
        self.lock().push(record);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the records captured so far, in arrival order.
    pub fn snapshot(&self) -> Vec<CapturedRecord> {
        self.lock().clone()
    }

    /// Take the records out, leaving the set empty.
    pub fn into_records(self) -> Vec<CapturedRecord> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CapturedRecord>> {
        // Appends cannot leave the vector half-written, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Predicate over response URLs.
#[derive(Debug, Clone)]
pub enum UrlPattern {
    Substring(String),
    Regex(Regex),
}

impl UrlPattern {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlPattern::Substring(s) => url.contains(s.as_str()),
            UrlPattern::Regex(re) => re.is_match(url),
        }
    }

    /// Build the pattern a config describes. A regex wins over the substring.
    pub fn from_config(config: &CaptureConfig) -> Result<Self> {
        match &config.url_regex {
            Some(re) => Regex::new(re)
                .map(UrlPattern::Regex)
                .map_err(|e| CaptureError::Config(format!("invalid url_regex: {e}"))),
            None => Ok(UrlPattern::Substring(config.url_pattern.clone())),
        }
    }
}

/// Dotted path into a JSON document, e.g. `data.itemPage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractPath {
    segments: Vec<String>,
}

impl ExtractPath {
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// The sub-document at this path. `null` counts as absent.
    pub fn extract(&self, doc: &Value) -> Option<Value> {
        let mut current = doc;
        for segment in &self.segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        if current.is_null() {
            None
        } else {
            Some(current.clone())
        }
    }
}

impl std::fmt::Display for ExtractPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// What happened to a single response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptOutcome {
    /// URL did not match.
    Ignored,
    Captured,
    Failed(String),
}

/// Counters reported when the interceptor stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterceptStats {
    pub seen: usize,
    pub captured: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    seen: AtomicUsize,
    captured: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn stats(&self) -> InterceptStats {
        InterceptStats {
            seen: self.seen.load(Ordering::Relaxed),
            captured: self.captured.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Filters responses and appends matching payloads to a [`ResultSet`].
pub struct ResponseInterceptor {
    pattern: UrlPattern,
    path: ExtractPath,
    display_field: String,
    results: ResultSet,
    counters: Counters,
}

impl ResponseInterceptor {
    pub fn new(pattern: UrlPattern, path: ExtractPath, results: ResultSet) -> Self {
        Self {
            pattern,
            path,
            display_field: "name".into(),
            results,
            counters: Counters::default(),
        }
    }

    pub fn with_display_field(mut self, field: impl Into<String>) -> Self {
        self.display_field = field.into();
        self
    }

    pub fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }

    pub fn stats(&self) -> InterceptStats {
        self.counters.stats()
    }

    /// Process one response.
    pub fn handle(&self, response: &InterceptedResponse) -> InterceptOutcome {
        if !self.pattern.matches(&response.url) {
            return InterceptOutcome::Ignored;
        }
        self.counters.seen.fetch_add(1, Ordering::Relaxed);

        match self.extract(response) {
            Ok(record) => {
                info!(
                    "captured record: {}",
                    record.display_name(&self.display_field)
                );
                self.results.append(record);
                self.counters.captured.fetch_add(1, Ordering::Relaxed);
                InterceptOutcome::Captured
            }
            Err(e) => {
                error!("error processing response from {}: {e}", response.url);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                InterceptOutcome::Failed(e.to_string())
            }
        }
    }

    fn extract(&self, response: &InterceptedResponse) -> Result<CapturedRecord> {
        let body = response
            .body
            .as_deref()
            .map_err(|e| CaptureError::Extraction(format!("body unavailable: {e}")))?;
        let doc: Value = serde_json::from_str(body)?;
        self.path
            .extract(&doc)
            .map(CapturedRecord::new)
            .ok_or_else(|| CaptureError::Extraction(format!("path `{}` not present", self.path)))
    }

    /// Run the interceptor on its own task, consuming `feed` in delivery order.
    pub fn spawn(self, mut feed: mpsc::UnboundedReceiver<InterceptedResponse>) -> InterceptorHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let interceptor = Arc::new(self);
        let worker = Arc::clone(&interceptor);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    received = feed.recv() => match received {
                        Some(response) => {
                            worker.handle(&response);
                        }
                        None => {
                            debug!("response feed closed");
                            break;
                        }
                    },
                    _ = &mut stop_rx => {
                        feed.close();
                        while let Some(response) = feed.recv().await {
                            worker.handle(&response);
                        }
                        break;
                    }
                }
            }
        });

        InterceptorHandle {
            interceptor,
            stop: Some(stop_tx),
            task,
        }
    }
}

/// Handle to a running interceptor task.
pub struct InterceptorHandle {
    interceptor: Arc<ResponseInterceptor>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl InterceptorHandle {
    /// Counters so far, without stopping.
    pub fn stats(&self) -> InterceptStats {
        self.interceptor.stats()
    }

    /// Stop listening after everything already queued has been processed.
    pub async fn finish(mut self) -> InterceptStats {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("interceptor task ended abnormally: {e}");
        }
        self.interceptor.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PATTERN: &str = "graphql/itemPage?operation=itemPage";

    fn item_url() -> String {
        format!("https://www.example.com/{PATTERN}&id=1")
    }

    fn item_body(name: &str) -> String {
        json!({"data": {"itemPage": {"name": name, "price": 899}}}).to_string()
    }

    fn interceptor(results: &ResultSet) -> ResponseInterceptor {
        ResponseInterceptor::new(
            UrlPattern::Substring(PATTERN.into()),
            ExtractPath::parse("data.itemPage"),
            results.clone(),
        )
    }

    #[test]
    fn test_extract_path() {
        let doc = json!({"data": {"itemPage": {"name": "Orange Chicken"}, "list": [1, {"x": 2}]}});
        assert_eq!(
            ExtractPath::parse("data.itemPage").extract(&doc),
            Some(json!({"name": "Orange Chicken"}))
        );
        assert_eq!(ExtractPath::parse("data.list.1.x").extract(&doc), Some(json!(2)));
        assert_eq!(ExtractPath::parse("data.missing").extract(&doc), None);
        assert_eq!(ExtractPath::parse("").extract(&doc), Some(doc.clone()));
        assert_eq!(ExtractPath::parse("data.itemPage").to_string(), "data.itemPage");
    }

    #[test]
    fn test_null_sub_document_is_absent() {
        let doc = json!({"data": {"itemPage": null}});
        assert_eq!(ExtractPath::parse("data.itemPage").extract(&doc), None);
    }

    #[test]
    fn test_url_pattern() {
        let substring = UrlPattern::Substring(PATTERN.into());
        assert!(substring.matches(&item_url()));
        assert!(!substring.matches("https://www.example.com/graphql/storepage"));

        let regex = UrlPattern::Regex(Regex::new(r"/graphql/item\w+").unwrap());
        assert!(regex.matches(&item_url()));
        assert!(!regex.matches("https://www.example.com/static/app.js"));
    }

    #[test]
    fn test_pattern_from_config_prefers_regex() {
        let mut config = CaptureConfig::default();
        assert!(matches!(
            UrlPattern::from_config(&config).unwrap(),
            UrlPattern::Substring(_)
        ));
        config.url_regex = Some("itemPage$".into());
        assert!(matches!(
            UrlPattern::from_config(&config).unwrap(),
            UrlPattern::Regex(_)
        ));
    }

    #[test]
    fn test_handle_captures_matching_response() {
        let results = ResultSet::new();
        let icpt = interceptor(&results);

        let outcome = icpt.handle(&InterceptedResponse::ok(item_url(), item_body("Chow Mein")));
        assert_eq!(outcome, InterceptOutcome::Captured);
        assert_eq!(results.len(), 1);
        assert_eq!(results.snapshot()[0].display_name("name"), "Chow Mein");
    }

    #[test]
    fn test_handle_ignores_other_urls() {
        let results = ResultSet::new();
        let icpt = interceptor(&results);
        let outcome = icpt.handle(&InterceptedResponse::ok(
            "https://www.example.com/graphql/storepage",
            item_body("Chow Mein"),
        ));
        assert_eq!(outcome, InterceptOutcome::Ignored);
        assert!(results.is_empty());
        assert_eq!(icpt.stats().seen, 0);
    }

    #[test]
    fn test_malformed_responses_are_soft_failures() {
        let results = ResultSet::new();
        let icpt = interceptor(&results);

        let bad_json = icpt.handle(&InterceptedResponse::ok(item_url(), "<html>oops"));
        let missing_path = icpt.handle(&InterceptedResponse::ok(item_url(), r#"{"data":{}}"#));
        let no_body = icpt.handle(&InterceptedResponse {
            url: item_url(),
            status: 200,
            body: Err("No resource with given identifier found".into()),
        });
        let good = icpt.handle(&InterceptedResponse::ok(item_url(), item_body("Fried Rice")));

        assert!(matches!(bad_json, InterceptOutcome::Failed(_)));
        assert!(matches!(missing_path, InterceptOutcome::Failed(_)));
        assert!(matches!(no_body, InterceptOutcome::Failed(_)));
        assert_eq!(good, InterceptOutcome::Captured);
        assert_eq!(results.len(), 1);
        assert_eq!(
            icpt.stats(),
            InterceptStats {
                seen: 4,
                captured: 1,
                failed: 3
            }
        );
    }

    #[test]
    fn test_duplicates_are_kept() {
        let results = ResultSet::new();
        let icpt = interceptor(&results);
        icpt.handle(&InterceptedResponse::ok(item_url(), item_body("Egg Roll")));
        icpt.handle(&InterceptedResponse::ok(item_url(), item_body("Egg Roll")));
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_display_name_fallback() {
        let record = CapturedRecord::new(json!({"id": 7}));
        assert_eq!(record.display_name("name"), "Unknown");
    }

    #[tokio::test]
    async fn test_spawned_interceptor_keeps_delivery_order() {
        let results = ResultSet::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = interceptor(&results).spawn(rx);

        for name in ["A", "B", "C"] {
            tx.send(InterceptedResponse::ok(item_url(), item_body(name)))
                .unwrap();
        }
        tx.send(InterceptedResponse::ok(item_url(), "{broken")).unwrap();

        let stats = handle.finish().await;
        assert_eq!(stats.captured, 3);
        assert_eq!(stats.failed, 1);

        let names: Vec<String> = results
            .snapshot()
            .iter()
            .map(|r| r.display_name("name").to_string())
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_concurrent_appends() {
        let results = ResultSet::new();
        let mut tasks = Vec::new();
        for i in 0..8 {
            let results = results.clone();
            tasks.push(tokio::spawn(async move {
                for j in 0..25 {
                    results.append(CapturedRecord::new(json!({"i": i, "j": j})));
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(results.len(), 200);
    }
}
