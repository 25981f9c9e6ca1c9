//! Tenant controller: engine, per-tenant reconciler and the long-running
//! runtime (poller + tenant watcher + bounded processor).

pub mod engine;
mod error;
pub mod reconciler;
mod runtime;

pub use engine::{is_up_to_date, ExternalState, TenantEngine};
pub use error::{ControllerError, ReconcileError};
pub use reconciler::{reconcile_tenant, ReconcileOutcome};
pub use runtime::{
    backoff_delay, grafana_client, init_tracing, run, run_once, serve, start_blocking, Controller,
    CycleSummary, DEBOUNCE_WINDOW,
};
