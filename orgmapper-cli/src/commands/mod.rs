pub mod mapping;
pub mod reconcile;
pub mod run;
pub mod tenant;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use orgmapper_controller::{grafana_client, init_tracing, TenantEngine};
use orgmapper_core::{ControllerConfig, FileStore, LogFormat};
use orgmapper_grafana::{GrafanaClient, MemorySso};

/// Home directory, configuration and log format shared by every command.
pub struct CliContext {
    pub home: PathBuf,
    pub config: ControllerConfig,
}

impl CliContext {
    pub fn load(log_json: bool) -> Result<Self> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let mut config = ControllerConfig::load_at(&home)
            .context("failed to load ~/.orgmapper/config.yaml")?;
        config.apply_overrides(|name| std::env::var(name).ok());
        if log_json {
            config.log_format = LogFormat::Json;
        }
        init_tracing(config.log_format);
        Ok(Self { home, config })
    }

    pub fn store(&self) -> Arc<FileStore> {
        Arc::new(FileStore::at(&self.home))
    }

    pub fn grafana(&self) -> Result<Arc<GrafanaClient>> {
        let client = grafana_client(&self.config)
            .context("cannot build Grafana client; set grafanaUrl in config.yaml or ORGMAPPER_GRAFANA_URL")?;
        Ok(Arc::new(client))
    }

    /// Engine wired to the live Grafana.
    pub fn engine(&self) -> Result<TenantEngine> {
        Ok(TenantEngine::new(self.store(), self.grafana()?))
    }

    /// Engine for read-only commands; never talks to Grafana.
    pub fn offline_engine(&self) -> TenantEngine {
        TenantEngine::new(self.store(), Arc::new(MemorySso::new()))
    }
}
