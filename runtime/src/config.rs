//! Capture configuration: defaults, JSON file layering, and provider credentials.
//!
//! Resolution order for the config file:
//! 1. An explicit `--config <path>`
//! 2. `MENU_CAPTURE_CONFIG` env
//! 3. `~/.menu-capture/config.json` if it exists
//!
//! Missing files fall back to built-in defaults. The provisioning API key is
//! never read from the file; it comes from `SCRAPYBARA_API_KEY`.

use crate::error::{CaptureError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var holding the provisioning API key.
pub const API_KEY_ENV: &str = "SCRAPYBARA_API_KEY";
/// Env var overriding the provisioning API base URL.
pub const BASE_URL_ENV: &str = "SCRAPYBARA_BASE_URL";
/// Env var pointing at a config file.
pub const CONFIG_PATH_ENV: &str = "MENU_CAPTURE_CONFIG";

const DEFAULT_BASE_URL: &str = "https://api.scrapybara.com";
const DEFAULT_TARGET_URL: &str = "https://www.doordash.com/store/panda-express-san-francisco-980938/12722988/?event_type=autocomplete&pickup=false";

/// Everything a capture run needs, apart from credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Page to open before walking items.
    pub target_url: String,
    /// Substring a response URL must contain to be captured.
    pub url_pattern: String,
    /// Optional regex; takes precedence over `url_pattern` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_regex: Option<String>,
    /// Dotted path of the sub-document to keep (e.g. `data.itemPage`).
    pub extract_path: String,
    /// Field of a captured document used as its display name in logs.
    pub display_field: String,
    pub selectors: Selectors,
    pub timings: Timings,
    /// Output JSON file.
    pub output: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_url: DEFAULT_TARGET_URL.into(),
            url_pattern: "graphql/itemPage?operation=itemPage".into(),
            url_regex: None,
            extract_path: "data.itemPage".into(),
            display_field: "name".into(),
            selectors: Selectors::default(),
            timings: Timings::default(),
            output: PathBuf::from("menu_items.json"),
        }
    }
}

/// Selectors describing the target page contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    /// CSS selector matching every interactive item.
    pub item: String,
    /// CSS selector of the control that closes an opened item.
    pub dismiss: String,
    /// Visible text of the consent button; empty disables the step.
    pub consent_text: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            item: r#"[data-anchor-id^="MenuItem"]"#.into(),
            dismiss: r#"button[aria-label="Close"]"#.into(),
            consent_text: "Accept All".into(),
        }
    }
}

/// Fixed pauses and bounds, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub settle_ms: u64,
    pub response_wait_ms: u64,
    pub between_items_ms: u64,
    pub lazy_load_ms: u64,
    pub network_idle_ms: u64,
    pub consent_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    /// Grace period for in-flight responses after the walk ends.
    pub drain_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_ms: 500,
            response_wait_ms: 1000,
            between_items_ms: 500,
            lazy_load_ms: 2000,
            network_idle_ms: 15_000,
            consent_timeout_ms: 5000,
            navigation_timeout_ms: 30_000,
            drain_ms: 500,
        }
    }
}

impl Timings {
    /// All pauses zeroed. Useful against in-process fakes.
    pub fn immediate() -> Self {
        Self {
            settle_ms: 0,
            response_wait_ms: 0,
            between_items_ms: 0,
            lazy_load_ms: 0,
            network_idle_ms: 0,
            consent_timeout_ms: 0,
            navigation_timeout_ms: 30_000,
            drain_ms: 0,
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
    pub fn response_wait(&self) -> Duration {
        Duration::from_millis(self.response_wait_ms)
    }
    pub fn between_items(&self) -> Duration {
        Duration::from_millis(self.between_items_ms)
    }
    pub fn lazy_load(&self) -> Duration {
        Duration::from_millis(self.lazy_load_ms)
    }
    pub fn network_idle(&self) -> Duration {
        Duration::from_millis(self.network_idle_ms)
    }
    pub fn consent_timeout(&self) -> Duration {
        Duration::from_millis(self.consent_timeout_ms)
    }
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }
}

/// Command-line overrides applied on top of the file layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub target_url: Option<String>,
    pub output: Option<PathBuf>,
    pub url_pattern: Option<String>,
    pub extract_path: Option<String>,
    pub item_selector: Option<String>,
    pub dismiss_selector: Option<String>,
}

impl CaptureConfig {
    /// Load a config file, layering it over the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            CaptureError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            CaptureError::Config(format!("invalid config {}: {e}", path.display()))
        })
    }

    /// Resolve the config from an explicit path, env, or the home directory.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(Path::new(&env_path));
        }
        if let Some(home) = dirs::home_dir() {
            let path = home.join(".menu-capture").join("config.json");
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    /// Apply CLI overrides in place.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.target_url {
            self.target_url = url;
        }
        if let Some(output) = overrides.output {
            self.output = output;
        }
        if let Some(pattern) = overrides.url_pattern {
            self.url_pattern = pattern;
        }
        if let Some(path) = overrides.extract_path {
            self.extract_path = path;
        }
        if let Some(item) = overrides.item_selector {
            self.selectors.item = item;
        }
        if let Some(dismiss) = overrides.dismiss_selector {
            self.selectors.dismiss = dismiss;
        }
    }

    /// Reject configs that cannot drive a run.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.target_url)
            .map_err(|e| CaptureError::Config(format!("invalid target_url: {e}")))?;
        if self.selectors.item.trim().is_empty() {
            return Err(CaptureError::Config("selectors.item is empty".into()));
        }
        if self.selectors.dismiss.trim().is_empty() {
            return Err(CaptureError::Config("selectors.dismiss is empty".into()));
        }
        match &self.url_regex {
            Some(re) => {
                regex::Regex::new(re)
                    .map_err(|e| CaptureError::Config(format!("invalid url_regex: {e}")))?;
            }
            None if self.url_pattern.is_empty() => {
                return Err(CaptureError::Config("url_pattern is empty".into()));
            }
            None => {}
        }
        if self.output.as_os_str().is_empty() {
            return Err(CaptureError::Config("output path is empty".into()));
        }
        Ok(())
    }
}

/// Credentials and endpoint for the provisioning service.
#[derive(Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ProviderConfig {
    /// Read the provider config from the environment.
    ///
    /// A missing or blank API key is a configuration error.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(
            std::env::var(API_KEY_ENV).ok(),
            std::env::var(BASE_URL_ENV).ok(),
        )
    }

    /// Build from already-read values.
    pub fn from_vars(api_key: Option<String>, base_url: Option<String>) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CaptureError::Config(format!("{API_KEY_ENV} environment variable not set")))?;
        let base_url = base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}
