//! One reconciliation cycle for one tenant: get, observe, act, persist.

use serde::Serialize;

use orgmapper_core::types::{Condition, ResourceKey, Tenant};

use crate::engine::{ExternalState, TenantEngine};
use crate::error::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReconcileOutcome {
    Created,
    Updated,
    UpToDate,
    /// The deletion marker was honoured and the record removed.
    Finalized,
    /// No record under that key.
    Gone,
}

pub fn reconcile_tenant(
    engine: &TenantEngine,
    key: &ResourceKey,
) -> Result<ReconcileOutcome, ReconcileError> {
    let store = engine.store();
    let Some(mut tenant) = store.get(key)? else {
        return Ok(ReconcileOutcome::Gone);
    };
    let loaded = tenant.clone();

    let state = match engine.observe(&mut tenant) {
        Ok(state) => state,
        Err(err) => {
            record_failure(engine, &loaded, &tenant, &err);
            return Err(err);
        }
    };

    if tenant.is_deleting() {
        store.remove(key)?;
        tracing::info!(tenant = %key, tenant_id = %tenant.spec.tenant_id, "tenant finalized");
        return Ok(ReconcileOutcome::Finalized);
    }

    match state {
        ExternalState::Absent => {
            tenant.status.set_condition(Condition::creating());
            if let Err(err) = engine.create(&mut tenant) {
                record_failure(engine, &loaded, &tenant, &err);
                return Err(err);
            }
            tenant.status.set_condition(Condition::reconcile_success());
            store.update_status(&tenant)?;
            Ok(ReconcileOutcome::Created)
        }
        ExternalState::ExistsNotSynced => {
            if let Err(err) = engine.update(&mut tenant) {
                record_failure(engine, &loaded, &tenant, &err);
                return Err(err);
            }
            tenant.status.set_condition(Condition::reconcile_success());
            store.update_status(&tenant)?;
            Ok(ReconcileOutcome::Updated)
        }
        ExternalState::Synced => {
            tenant.status.set_condition(Condition::reconcile_success());
            if tenant.status != loaded.status {
                store.update_status(&tenant)?;
            }
            Ok(ReconcileOutcome::UpToDate)
        }
    }
}

/// Surface `err` on the tenant's `Synced` condition. Only the conditions of
/// `current` are written; external name and observation stay as `loaded`
/// had them, so the next cycle retries the same work.
fn record_failure(
    engine: &TenantEngine,
    loaded: &Tenant,
    current: &Tenant,
    err: &ReconcileError,
) {
    tracing::warn!(
        tenant = %loaded.key(),
        tenant_id = %loaded.spec.tenant_id,
        error = %err,
        "reconcile failed",
    );
    let mut tenant = loaded.clone();
    tenant.status.conditions = current.status.conditions.clone();
    tenant
        .status
        .set_condition(Condition::reconcile_error(err.to_string()));
    if let Err(store_err) = engine.store().update_status(&tenant) {
        tracing::warn!(
            tenant = %tenant.key(),
            error = %store_err,
            "cannot record reconcile failure",
        );
    }
}
