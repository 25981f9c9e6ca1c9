use std::path::PathBuf;

use thiserror::Error;

use orgmapper_core::{ConfigError, StoreError};
use orgmapper_grafana::GrafanaError;

/// Why a single reconciliation cycle failed.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("tenant store error: {0}")]
    Store(#[from] StoreError),

    #[error("Grafana error: {0}")]
    External(#[from] GrafanaError),

    #[error("tenantId {tenant_id} is already used by tenant {owner}")]
    Conflict { tenant_id: String, owner: String },

    #[error("managed resource is not a Tenant (kind {kind:?})")]
    TypeMismatch { kind: String },
}

/// Error surface for the controller runtime.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Grafana error: {0}")]
    Grafana(#[from] GrafanaError),

    #[error("reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("{task} task failed: {reason}")]
    Task { task: &'static str, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ControllerError {
    ControllerError::Io {
        path: path.into(),
        source,
    }
}
