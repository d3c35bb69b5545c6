//! Error types for the capture runtime.

/// All errors that can occur while provisioning, driving, or capturing.
#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    /// Missing or invalid configuration. Raised before any remote resource exists.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provisioning error: {0}")]
    Provision(String),

    #[error("Browser error: {0}")]
    Browser(String),

    /// The i-th element matching a selector could not be resolved.
    #[error("Element not found: {selector} [{index}]")]
    ElementNotFound { selector: String, index: usize },

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Run interrupted")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CaptureError {
    /// Whether this error must abort the run before a session is started.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::Config(_))
    }
}

impl From<chromiumoxide::error::CdpError> for CaptureError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        CaptureError::Browser(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(CaptureError::Config("missing key".into()).is_fatal());
        assert!(!CaptureError::Browser("gone".into()).is_fatal());
        assert!(!CaptureError::ElementNotFound {
            selector: "li".into(),
            index: 3
        }
        .is_fatal());
    }

    #[test]
    fn test_element_not_found_message() {
        let e = CaptureError::ElementNotFound {
            selector: "[data-anchor-id^=\"MenuItem\"]".into(),
            index: 2,
        };
        assert_eq!(
            e.to_string(),
            "Element not found: [data-anchor-id^=\"MenuItem\"] [2]"
        );
    }
}
