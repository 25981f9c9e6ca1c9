//! Error types for orgmapper-grafana.

use thiserror::Error;

/// All errors that can arise talking to Grafana's SSO settings API.
#[derive(Debug, Error)]
pub enum GrafanaError {
    /// The provider has never been configured (HTTP 404).
    #[error("SSO provider {provider} is not configured")]
    NotFound { provider: String },

    /// Grafana answered with a non-success status.
    #[error("Grafana API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// Connection, TLS or timeout failure before a response arrived.
    #[error("Grafana transport error: {0}")]
    Transport(String),

    /// The response body was not the JSON we expected.
    #[error("cannot decode Grafana response: {0}")]
    Decode(String),

    /// `settings` on the provider was present but not a JSON object.
    #[error("SSO settings for {provider} are not an object")]
    InvalidSettings { provider: String },

    #[error("invalid Grafana URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl GrafanaError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GrafanaError::NotFound { .. })
    }
}

impl From<ureq::Transport> for GrafanaError {
    fn from(err: ureq::Transport) -> Self {
        GrafanaError::Transport(err.to_string())
    }
}
