//! Controller configuration: `~/.orgmapper/config.yaml` plus environment
//! overrides.
//!
//! ```yaml
//! grafanaUrl: https://grafana.example.com
//! credentials:
//!   source: File
//!   path: /etc/orgmapper/grafana-token
//! pollIntervalSecs: 60
//! maxConcurrentReconciles: 4
//! requestTimeoutSecs: 10
//! logFormat: json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths;

pub const ENV_GRAFANA_URL: &str = "ORGMAPPER_GRAFANA_URL";
pub const ENV_CREDENTIALS: &str = "ORGMAPPER_CREDENTIALS";

/// Where the Grafana credentials are read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "source")]
pub enum CredentialsSource {
    /// Anonymous access.
    #[default]
    None,
    /// Raw credentials held in an environment variable.
    Env { env: String },
    /// Raw credentials held in a file.
    File { path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    #[serde(default)]
    pub grafana_url: Option<String>,
    #[serde(default)]
    pub credentials: CredentialsSource,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            grafana_url: None,
            credentials: CredentialsSource::None,
            poll_interval_secs: default_poll_interval_secs(),
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            request_timeout_secs: default_request_timeout_secs(),
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerConfig {
    /// Load `<home>/.orgmapper/config.yaml`; a missing file yields defaults.
    /// Environment overrides are not applied.
    pub fn load_at(home: &Path) -> Result<Self, ConfigError> {
        let path = paths::config_path(home);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Apply `ORGMAPPER_*` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_GRAFANA_URL).filter(|u| !u.trim().is_empty()) {
            self.grafana_url = Some(url);
        }
        if lookup(ENV_CREDENTIALS).is_some() {
            self.credentials = CredentialsSource::Env {
                env: ENV_CREDENTIALS.to_string(),
            };
        }
    }

    pub fn grafana_url(&self) -> Result<&str, ConfigError> {
        self.grafana_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(ConfigError::Missing("grafanaUrl"))
    }

    /// Raw credential bytes, resolved through `lookup` for env sources.
    pub fn read_credentials(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Vec<u8>, ConfigError> {
        match &self.credentials {
            CredentialsSource::None => Ok(Vec::new()),
            CredentialsSource::Env { env } => lookup(env)
                .map(String::into_bytes)
                .ok_or_else(|| ConfigError::CredentialsEnv { name: env.clone() }),
            CredentialsSource::File { path } => std::fs::read(path).map_err(|source| {
                ConfigError::Io {
                    path: path.clone(),
                    source,
                }
            }),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn max_concurrent_reconciles(&self) -> usize {
        self.max_concurrent_reconciles.max(1)
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_max_concurrent_reconciles() -> usize {
    4
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_config(home: &Path, yaml: &str) {
        let path = paths::config_path(home);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, yaml).unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().unwrap();
        let config = ControllerConfig::load_at(home.path()).unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert!(config.grafana_url().is_err());
    }

    #[test]
    fn parses_file_credentials_and_log_format() {
        let home = TempDir::new().unwrap();
        write_config(
            home.path(),
            "grafanaUrl: https://grafana.example.com\ncredentials:\n  source: File\n  path: /tmp/token\nlogFormat: json\n",
        );
        let config = ControllerConfig::load_at(home.path()).unwrap();
        assert_eq!(config.grafana_url().unwrap(), "https://grafana.example.com");
        assert_eq!(
            config.credentials,
            CredentialsSource::File {
                path: PathBuf::from("/tmp/token")
            }
        );
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.max_concurrent_reconciles(), 4);
    }

    #[test]
    fn malformed_file_reports_path() {
        let home = TempDir::new().unwrap();
        write_config(home.path(), "pollIntervalSecs: [not, a, number]\n");
        let err = ControllerConfig::load_at(home.path()).unwrap_err();
        assert!(err.to_string().contains("config.yaml"), "got: {err}");
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            (ENV_GRAFANA_URL, "http://localhost:3000"),
            (ENV_CREDENTIALS, "glsa_token"),
        ]
        .into_iter()
        .collect();
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());

        let mut config = ControllerConfig::default();
        config.apply_overrides(lookup);
        assert_eq!(config.grafana_url().unwrap(), "http://localhost:3000");
        assert_eq!(config.read_credentials(lookup).unwrap(), b"glsa_token".to_vec());
    }

    #[test]
    fn missing_env_credentials_is_an_error() {
        let config = ControllerConfig {
            credentials: CredentialsSource::Env {
                env: "NOPE".to_string(),
            },
            ..Default::default()
        };
        let err = config.read_credentials(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::CredentialsEnv { .. }));
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let config = ControllerConfig {
            poll_interval_secs: 0,
            max_concurrent_reconciles: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.max_concurrent_reconciles(), 1);
    }
}
