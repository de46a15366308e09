//! Oracle HTTP clients.
//!
//! The discovery coordinator treats the oracle as an opaque
//! `prompt -> text` function. Two wire shapes are supported:
//!
//! - [`ProviderKind::Local`] - a local generator speaking the simple
//!   `{"model","prompt","stream":false}` / `{"response"}` protocol
//! - [`ProviderKind::Cloud`] - a hosted generator with the nested
//!   `contents[].parts[].text` request and `candidates[]` reply, which needs
//!   an API key from the environment
//!
//! Retry policy lives in the coordinator, not here: a client performs
//! exactly one HTTP round trip per [`OracleClient::generate`] call.

mod cloud;
mod local;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Environment variable holding the cloud generator's API key.
pub const CLOUD_API_KEY_VAR: &str = "GEMINI_API_KEY";

/// Oracle calls can run for minutes on large models.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Local,
    Cloud,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Local => f.write_str("local"),
            ProviderKind::Cloud => f.write_str("cloud"),
        }
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("{0} environment variable is not set")]
    MissingApiKey(&'static str),

    #[error("oracle connection failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("oracle error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("oracle returned an empty response")]
    EmptyResponse,
}

impl OracleError {
    /// Transport and server-side failures are worth retrying; a missing API
    /// key is not going to appear between attempts.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            OracleError::MissingApiKey(_) => false,
            OracleError::Transport(_) | OracleError::EmptyResponse => true,
            OracleError::Status { status, .. } => {
                matches!(status, 408 | 409 | 429 | 500..=599)
            }
        }
    }
}

/// A configured connection to one oracle provider.
pub struct OracleClient {
    kind: ProviderKind,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OracleClient {
    pub fn new(kind: ProviderKind, model: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("failed to build oracle HTTP client: {e}, using defaults");
                reqwest::Client::new()
            });
        Self {
            kind,
            model: model.into(),
            endpoint: endpoint.into(),
            api_key: None,
            http,
        }
    }

    /// Override the API key instead of reading [`CLOUD_API_KEY_VAR`].
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Post `prompt` to the provider and return the generated text.
    pub async fn generate(&self, prompt: &str) -> Result<String, OracleError> {
        tracing::debug!(provider = %self.kind, model = %self.model, "posting prompt to oracle");
        match self.kind {
            ProviderKind::Local => local::generate(self, prompt).await,
            ProviderKind::Cloud => cloud::generate(self, prompt).await,
        }
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn resolve_api_key(&self) -> Result<String, OracleError> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        std::env::var(CLOUD_API_KEY_VAR).map_err(|_| OracleError::MissingApiKey(CLOUD_API_KEY_VAR))
    }
}

pub(crate) async fn reject_error_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, OracleError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(OracleError::Status {
        status: status.as_u16(),
        body,
    })
}
