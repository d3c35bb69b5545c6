//! A full capture run: provision, connect, intercept, walk, write, release.
//!
//! Only configuration errors are returned as `Err`. Everything after the
//! configuration check is reported through [`RunSummary::error`], because the
//! remote session has to be released whatever happens once it exists.

use crate::config::CaptureConfig;
use crate::driver::{GuidedDriver, WalkReport};
use crate::error::{CaptureError, Result};
use crate::interceptor::{ExtractPath, InterceptStats, ResponseInterceptor, ResultSet, UrlPattern};
use crate::output;
use crate::provision::{Provisioner, SessionLease};
use crate::session::{ConsentOutcome, PageSession, SessionConnector};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

/// What a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Records written to the output file.
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intercept: Option<InterceptStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub walk: Option<WalkReport>,
    /// Output file, if one was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Top-level failure, if the run did not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    fn started(run_id: String) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            records: 0,
            intercept: None,
            walk: None,
            output: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs captures against a provisioner and a session connector.
pub struct CaptureRunner {
    config: CaptureConfig,
    provisioner: Arc<dyn Provisioner>,
    connector: Arc<dyn SessionConnector>,
}

impl CaptureRunner {
    pub fn new(
        config: CaptureConfig,
        provisioner: Arc<dyn Provisioner>,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        Self {
            config,
            provisioner,
            connector,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Run to completion.
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_until(std::future::pending()).await
    }

    /// Run until done or until `cancel` resolves. Teardown happens either way.
    pub async fn run_until<C>(&self, cancel: C) -> Result<RunSummary>
    where
        C: Future<Output = ()> + Send,
    {
        self.config.validate()?;
        let pattern = UrlPattern::from_config(&self.config)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("capture", run_id = %run_id);
        self.run_inner(run_id, pattern, cancel).instrument(span).await
    }

    async fn run_inner<C>(&self, run_id: String, pattern: UrlPattern, cancel: C) -> Result<RunSummary>
    where
        C: Future<Output = ()> + Send,
    {
        let mut summary = RunSummary::started(run_id);

        let lease = match SessionLease::acquire(Arc::clone(&self.provisioner)).await {
            Ok(lease) => lease,
            Err(e) => {
                error!("failed to start browser session: {e}");
                summary.error = Some(e.to_string());
                summary.finished_at = Utc::now();
                return Ok(summary);
            }
        };

        info!("starting item retrieval");
        let results = ResultSet::new();
        let (outcome, stats) = self
            .capture(lease.cdp_url(), pattern, &results, cancel)
            .await;
        summary.intercept = stats;

        match outcome {
            Ok(report) => summary.walk = Some(report),
            Err(e) => {
                error!("capture run failed: {e}");
                summary.error = Some(e.to_string());
            }
        }

        let records = results.into_records();
        info!("collected data for {} items", records.len());
        match output::write_results(&self.config.output, &records) {
            Ok(()) => {
                info!(
                    "saved {} items to {}",
                    records.len(),
                    self.config.output.display()
                );
                summary.records = records.len();
                summary.output = Some(self.config.output.clone());
            }
            Err(e) => {
                error!("failed to write {}: {e}", self.config.output.display());
                summary.error.get_or_insert_with(|| e.to_string());
            }
        }

        // Failures are logged by the lease; the run result does not change.
        let _ = lease.release().await;

        summary.finished_at = Utc::now();
        Ok(summary)
    }

    /// Connect, attach the interceptor, and walk. The session is always closed.
    async fn capture<C>(
        &self,
        cdp_url: &str,
        pattern: UrlPattern,
        results: &ResultSet,
        cancel: C,
    ) -> (Result<WalkReport>, Option<InterceptStats>)
    where
        C: Future<Output = ()> + Send,
    {
        let session = match self.connector.connect(cdp_url).await {
            Ok(session) => session,
            Err(e) => return (Err(e), None),
        };

        let feed = match session.watch_responses(pattern.clone()).await {
            Ok(feed) => feed,
            Err(e) => {
                close_session(session).await;
                return (Err(e), None);
            }
        };
        let interceptor = ResponseInterceptor::new(
            pattern,
            ExtractPath::parse(&self.config.extract_path),
            results.clone(),
        )
        .with_display_field(self.config.display_field.clone());
        let handle = interceptor.spawn(feed);

        let outcome = tokio::select! {
            outcome = self.prepare_and_walk(session.as_ref()) => outcome,
            _ = cancel => {
                warn!("run interrupted, tearing down");
                Err(CaptureError::Cancelled)
            }
        };

        if outcome.is_ok() {
            tokio::time::sleep(self.config.timings.drain()).await;
        }
        let stats = handle.finish().await;
        close_session(session).await;
        (outcome, Some(stats))
    }

    async fn prepare_and_walk(&self, session: &dyn PageSession) -> Result<WalkReport> {
        let timings = &self.config.timings;

        info!("navigating to {}", self.config.target_url);
        let nav = session
            .navigate(&self.config.target_url, timings.navigation_timeout())
            .await?;
        info!("loaded {} in {}ms", nav.final_url, nav.load_time_ms);

        if !session.wait_for_network_idle(timings.network_idle()).await? {
            warn!(
                "network still busy after {}ms, continuing",
                timings.network_idle_ms
            );
        }

        match session
            .dismiss_consent(&self.config.selectors.consent_text, timings.consent_timeout())
            .await
        {
            ConsentOutcome::Handled => info!("accepted consent dialog"),
            ConsentOutcome::Absent => info!("no consent dialog found"),
            ConsentOutcome::Failed(e) => info!("consent dialog could not be accepted: {e}"),
        }

        info!("scrolling to load all item sections");
        session.trigger_lazy_load(timings.lazy_load()).await?;

        let driver = GuidedDriver::new(self.config.selectors.clone(), timings.clone());
        Ok(driver.walk(session).await)
    }
}

async fn close_session(session: Box<dyn PageSession>) {
    if let Err(e) = session.close().await {
        warn!("failed to close page session: {e}");
    }
}
