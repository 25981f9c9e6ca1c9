//! Blocking HTTP client for Grafana's `/api/v1/sso-settings` endpoints.

use std::fmt;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::error::GrafanaError;
use crate::sso::{Settings, SsoSettingsApi};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// How requests authenticate against Grafana.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Basic { username: String, password: String },
    /// Service-account token or API key, sent as a bearer token.
    Token(String),
}

#[derive(Deserialize)]
struct BasicAuth {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl Credentials {
    /// Interpret raw secret bytes: a JSON object with non-empty `username` and
    /// `password` selects basic auth, anything else is a trimmed token.
    pub fn parse(raw: &[u8]) -> Self {
        if let Ok(basic) = serde_json::from_slice::<BasicAuth>(raw) {
            if !basic.username.is_empty() && !basic.password.is_empty() {
                return Credentials::Basic {
                    username: basic.username,
                    password: basic.password,
                };
            }
        }
        let token = String::from_utf8_lossy(raw).trim().to_string();
        if token.is_empty() {
            Credentials::Anonymous
        } else {
            Credentials::Token(token)
        }
    }

    fn authorization(&self) -> Option<String> {
        match self {
            Credentials::Anonymous => None,
            Credentials::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                Some(format!("Basic {encoded}"))
            }
            Credentials::Token(token) => Some(format!("Bearer {token}")),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Token(_) => f.write_str("Token(<redacted>)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Normalize a URL path so it ends in `/api`.
pub fn base_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/api".to_string()
    } else if trimmed.ends_with("/api") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/api")
    }
}

pub struct GrafanaClient {
    agent: ureq::Agent,
    api_base: Url,
    credentials: Credentials,
}

impl GrafanaClient {
    pub fn new(
        grafana_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, GrafanaError> {
        let invalid = |reason: String| GrafanaError::InvalidUrl {
            url: grafana_url.to_string(),
            reason,
        };
        let mut api_base = Url::parse(grafana_url).map_err(|e| invalid(e.to_string()))?;
        if api_base.cannot_be_a_base() || api_base.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        let path = base_path(api_base.path());
        api_base.set_path(&path);
        api_base.set_query(None);
        api_base.set_fragment(None);

        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            api_base,
            credentials,
        })
    }

    /// Resolved API root, always ending in `/api`.
    pub fn api_base(&self) -> &str {
        self.api_base.as_str()
    }

    fn endpoint(&self, provider: &str) -> String {
        format!(
            "{}/v1/sso-settings/{provider}",
            self.api_base.as_str().trim_end_matches('/')
        )
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        let request = self
            .agent
            .request(method, url)
            .set("Accept", "application/json");
        match self.credentials.authorization() {
            Some(value) => request.set("Authorization", &value),
            None => request,
        }
    }
}

impl fmt::Debug for GrafanaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrafanaClient")
            .field("api_base", &self.api_base.as_str())
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl SsoSettingsApi for GrafanaClient {
    fn get_provider_settings(&self, provider: &str) -> Result<Settings, GrafanaError> {
        let url = self.endpoint(provider);
        tracing::debug!("GET {url}");
        let response = self
            .request("GET", &url)
            .call()
            .map_err(|err| response_error(provider, err))?;
        let body: Value = response
            .into_json()
            .map_err(|e| GrafanaError::Decode(e.to_string()))?;
        settings_from_body(provider, body)
    }

    fn update_provider_settings(
        &self,
        provider: &str,
        settings: &Settings,
    ) -> Result<(), GrafanaError> {
        let url = self.endpoint(provider);
        tracing::debug!("PUT {url}");
        let body = json!({
            "provider": provider,
            "settings": settings,
        });
        self.request("PUT", &url)
            .send_json(body)
            .map_err(|err| response_error(provider, err))?;
        Ok(())
    }
}

fn response_error(provider: &str, err: ureq::Error) -> GrafanaError {
    match err {
        ureq::Error::Status(404, _) => GrafanaError::NotFound {
            provider: provider.to_string(),
        },
        ureq::Error::Status(status, response) => GrafanaError::Api {
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => transport.into(),
    }
}

/// Pull `settings` out of a provider document. Missing or null settings read
/// as empty.
fn settings_from_body(provider: &str, body: Value) -> Result<Settings, GrafanaError> {
    let Value::Object(mut document) = body else {
        return Err(GrafanaError::Decode(
            "expected a JSON object for the SSO provider".to_string(),
        ));
    };
    match document.remove("settings") {
        None | Some(Value::Null) => Ok(Settings::new()),
        Some(Value::Object(settings)) => Ok(settings),
        Some(_) => Err(GrafanaError::InvalidSettings {
            provider: provider.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_always_ends_in_api() {
        assert_eq!(base_path(""), "/api");
        assert_eq!(base_path("/"), "/api");
        assert_eq!(base_path("/api"), "/api");
        assert_eq!(base_path("/api/"), "/api");
        assert_eq!(base_path("/grafana"), "/grafana/api");
        assert_eq!(base_path("/grafana/api//"), "/grafana/api");
    }

    #[test]
    fn json_with_user_and_password_is_basic_auth() {
        let creds = Credentials::parse(br#"{"username":"admin","password":"s3cret"}"#);
        assert_eq!(
            creds,
            Credentials::Basic {
                username: "admin".to_string(),
                password: "s3cret".to_string()
            }
        );
        assert_eq!(
            creds.authorization().unwrap(),
            "Basic YWRtaW46czNjcmV0"
        );
    }

    #[test]
    fn incomplete_json_falls_back_to_token() {
        let raw = br#"{"username":"admin"}"#;
        assert_eq!(
            Credentials::parse(raw),
            Credentials::Token(r#"{"username":"admin"}"#.to_string())
        );
    }

    #[test]
    fn token_is_trimmed_and_blank_is_anonymous() {
        assert_eq!(
            Credentials::parse(b"  glsa_abc\n"),
            Credentials::Token("glsa_abc".to_string())
        );
        assert_eq!(Credentials::parse(b" \n"), Credentials::Anonymous);
        assert!(Credentials::Anonymous.authorization().is_none());
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", Credentials::Token("glsa_secret".to_string()));
        assert!(!rendered.contains("glsa_secret"));
        let rendered = format!(
            "{:?}",
            Credentials::Basic {
                username: "admin".to_string(),
                password: "hunter2".to_string()
            }
        );
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn client_normalizes_base_url() {
        let client = GrafanaClient::new(
            "https://grafana.example.com/grafana/?x=1",
            Credentials::Anonymous,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.api_base(), "https://grafana.example.com/grafana/api");
        assert_eq!(
            client.endpoint("generic_oauth"),
            "https://grafana.example.com/grafana/api/v1/sso-settings/generic_oauth"
        );
    }

    #[test]
    fn client_rejects_unusable_urls() {
        for url in ["not a url", "mailto:ops@example.com"] {
            let err =
                GrafanaClient::new(url, Credentials::Anonymous, Duration::from_secs(1)).unwrap_err();
            assert!(matches!(err, GrafanaError::InvalidUrl { .. }), "{url}: {err}");
        }
    }

    #[test]
    fn settings_body_shapes() {
        let ok = settings_from_body("p", json!({"settings": {"orgMapping": "a:1:Viewer"}})).unwrap();
        assert_eq!(ok["orgMapping"], "a:1:Viewer");
        assert!(settings_from_body("p", json!({"provider": "p"})).unwrap().is_empty());
        assert!(matches!(
            settings_from_body("p", json!({"settings": "nope"})).unwrap_err(),
            GrafanaError::InvalidSettings { .. }
        ));
        assert!(matches!(
            settings_from_body("p", json!([1, 2])).unwrap_err(),
            GrafanaError::Decode(_)
        ));
    }
}
