//! Provider error taxonomy.

use thiserror::Error;

/// Errors from the LLM provider layer.
///
/// Recoverable errors (429, 5xx, network, timeout) trigger endpoint rotation
/// and model fallback; non-recoverable errors abort the call immediately.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    /// Malformed request body or parameters (400).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed (401).
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Valid key, insufficient permissions (403).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Unknown model or path (404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Too many requests (429).
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Transient server-side error (500, 502, 503, 504, 529).
    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    /// Connection failure, DNS, TLS.
    #[error("Network error: {0}")]
    Network(String),

    /// The per-request deadline elapsed.
    #[error("Request timed out")]
    Timeout,

    /// Endpoint is configured but has no usable credentials.
    #[error("Missing credentials for endpoint '{0}'")]
    MissingCredentials(String),

    /// No configured endpoint can serve the model.
    #[error("No available endpoints for model '{0}'")]
    NoEndpoints(String),

    /// Model id absent from the configuration.
    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    /// Provider returned a body the adapter cannot interpret.
    #[error("Response parse error: {0}")]
    Parse(String),

    /// Every model and endpoint in the chain failed.
    #[error("All endpoints exhausted; last error: {last}")]
    Exhausted { last: String },
}

impl ProviderError {
    /// Map an HTTP status and body to an error.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 => Self::InvalidRequest(body),
            401 => Self::InvalidApiKey,
            403 => Self::Forbidden(body),
            404 => Self::NotFound(body),
            429 => Self::RateLimited,
            500 | 502 | 503 | 504 | 529 => Self::Server(status, body),
            _ if status >= 500 => Self::Server(status, body),
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }

    /// Whether rotation to another endpoint/model may help.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Server(_, _) | Self::Network(_) | Self::Timeout
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}
