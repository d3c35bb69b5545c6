//! Scrapybara provisioning client wrapping reqwest.

use super::{ProvisionedSession, Provisioner};
use crate::config::ProviderConfig;
use crate::error::{CaptureError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct StartResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CdpUrlResponse {
    cdp_url: String,
}

/// Starts and stops browser instances through the Scrapybara HTTP API.
#[derive(Clone)]
pub struct ScrapybaraProvisioner {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl ScrapybaraProvisioner {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    /// Build from `SCRAPYBARA_API_KEY` / `SCRAPYBARA_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        Self::new(ProviderConfig::from_env()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.config.base_url)
    }

    /// Send a request and fail on non-success statuses, keeping the body for context.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = request
            .header("x-api-key", &self.config.api_key)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(CaptureError::Provision(format!(
            "{status}: {}",
            body.chars().take(200).collect::<String>()
        )))
    }

    async fn cdp_url(&self, instance_id: &str) -> Result<String> {
        let resp = self
            .send(
                self.client
                    .get(self.url(&format!("instance/{instance_id}/browser/cdp_url"))),
            )
            .await?;
        let body: CdpUrlResponse = resp.json().await?;
        url::Url::parse(&body.cdp_url)
            .map_err(|e| CaptureError::Provision(format!("invalid CDP URL: {e}")))?;
        Ok(body.cdp_url)
    }

    /// Check the API answers at all. Returns the HTTP status seen.
    pub async fn check_reachable(&self) -> Result<u16> {
        let resp = self
            .client
            .get(&self.config.base_url)
            .header("x-api-key", &self.config.api_key)
            .send()
            .await?;
        Ok(resp.status().as_u16())
    }
}

#[async_trait]
impl Provisioner for ScrapybaraProvisioner {
    async fn start_session(&self) -> Result<ProvisionedSession> {
        let resp = self
            .send(
                self.client
                    .post(self.url("start"))
                    .json(&serde_json::json!({ "instance_type": "browser" })),
            )
            .await?;
        let started: StartResponse = resp.json().await?;
        debug!("instance {} started, fetching CDP URL", started.id);

        match self.cdp_url(&started.id).await {
            Ok(cdp_url) => Ok(ProvisionedSession {
                id: started.id,
                cdp_url,
            }),
            Err(e) => {
                // The instance exists but is unusable; do not leave it billing.
                if let Err(stop_err) = self.stop_session(&started.id).await {
                    warn!("failed to stop instance {}: {stop_err}", started.id);
                }
                Err(e)
            }
        }
    }

    async fn stop_session(&self, session_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.url(&format!("instance/{session_id}/stop")))
            .header("x-api-key", &self.config.api_key)
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!("instance {session_id} already gone");
                Ok(())
            }
            s => Err(CaptureError::Provision(format!(
                "stop {session_id} failed: {s}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provisioner(server: &MockServer) -> ScrapybaraProvisioner {
        ScrapybaraProvisioner::new(
            ProviderConfig::from_vars(Some("test-key".into()), Some(server.uri())).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_session_returns_cdp_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/start"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "inst-42",
                "status": "running"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/instance/inst-42/browser/cdp_url"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cdp_url": "wss://browser.example.com/devtools/browser/abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = provisioner(&server).await.start_session().await.unwrap();
        assert_eq!(session.id, "inst-42");
        assert_eq!(session.cdp_url, "wss://browser.example.com/devtools/browser/abc");
    }

    #[tokio::test]
    async fn test_start_failure_is_provision_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/start"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = provisioner(&server).await.start_session().await.unwrap_err();
        assert!(matches!(err, CaptureError::Provision(_)));
        assert!(err.to_string().contains("invalid api key"));
    }

    #[tokio::test]
    async fn test_cdp_lookup_failure_stops_instance() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/start"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "inst-7"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/instance/inst-7/browser/cdp_url"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/instance/inst-7/stop"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        assert!(provisioner(&server).await.start_session().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/instance/inst-1/stop"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        provisioner(&server)
            .await
            .stop_session("inst-1")
            .await
            .unwrap();
    }
}
