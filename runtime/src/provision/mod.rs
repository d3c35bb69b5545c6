//! Remote browser provisioning.
//!
//! A [`Provisioner`] starts and stops browser sessions on an external service.
//! Sessions are held through a [`SessionLease`], which releases the remote
//! session exactly once: explicitly via [`SessionLease::release`], or from
//! `Drop` when a run is torn down early.

pub mod scrapybara;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub use scrapybara::ScrapybaraProvisioner;

/// A provisioned remote browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedSession {
    /// Provider-side instance id.
    pub id: String,
    /// CDP websocket endpoint for the browser.
    pub cdp_url: String,
}

/// External service that hosts remote browsers.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Start a browser session and return its CDP endpoint.
    async fn start_session(&self) -> Result<ProvisionedSession>;
    /// Release a session. Releasing an already-released session is not an error.
    async fn stop_session(&self, session_id: &str) -> Result<()>;
}

/// Exclusive hold on a provisioned session.
pub struct SessionLease {
    provisioner: Arc<dyn Provisioner>,
    session: ProvisionedSession,
    acquired_at: Instant,
    released: bool,
}

impl SessionLease {
    /// Start a session and wrap it in a lease.
    pub async fn acquire(provisioner: Arc<dyn Provisioner>) -> Result<Self> {
        let session = provisioner.start_session().await?;
        info!("browser session {} started", session.id);
        Ok(Self {
            provisioner,
            session,
            acquired_at: Instant::now(),
            released: false,
        })
    }

    pub fn session(&self) -> &ProvisionedSession {
        &self.session
    }

    pub fn cdp_url(&self) -> &str {
        &self.session.cdp_url
    }

    /// Stop the remote session.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let result = self.provisioner.stop_session(&self.session.id).await;
        match &result {
            Ok(()) => info!(
                "browser session {} stopped after {}s",
                self.session.id,
                self.acquired_at.elapsed().as_secs()
            ),
            Err(e) => warn!("failed to stop browser session {}: {e}", self.session.id),
        }
        result
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        warn!(
            "browser session {} dropped without release, stopping it",
            self.session.id
        );
        let provisioner = Arc::clone(&self.provisioner);
        let id = self.session.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = provisioner.stop_session(&id).await {
                        warn!("failed to stop browser session {id}: {e}");
                    }
                });
            }
            Err(_) => warn!("no runtime available, browser session {id} left running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvisioner {
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    #[async_trait]
    impl Provisioner for CountingProvisioner {
        async fn start_session(&self) -> Result<ProvisionedSession> {
            let n = self.started.fetch_add(1, Ordering::SeqCst);
            Ok(ProvisionedSession {
                id: format!("inst-{n}"),
                cdp_url: "ws://127.0.0.1:9222/devtools/browser/x".into(),
            })
        }

        async fn stop_session(&self, _session_id: &str) -> Result<()> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingStart;

    #[async_trait]
    impl Provisioner for FailingStart {
        async fn start_session(&self) -> Result<ProvisionedSession> {
            Err(CaptureError::Provision("quota exceeded".into()))
        }
        async fn stop_session(&self, _session_id: &str) -> Result<()> {
            panic!("stop must not be called without a session");
        }
    }

    #[tokio::test]
    async fn test_release_stops_once() {
        let prov = Arc::new(CountingProvisioner::default());
        let lease = SessionLease::acquire(prov.clone()).await.unwrap();
        assert_eq!(lease.session().id, "inst-0");
        lease.release().await.unwrap();
        assert_eq!(prov.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_without_release_still_stops() {
        let prov = Arc::new(CountingProvisioner::default());
        {
            let _lease = SessionLease::acquire(prov.clone()).await.unwrap();
        }
        for _ in 0..50 {
            if prov.stopped.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(prov.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_start_yields_no_lease() {
        let result = SessionLease::acquire(Arc::new(FailingStart)).await;
        assert!(matches!(result, Err(CaptureError::Provision(_))));
    }
}
