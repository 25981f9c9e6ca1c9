//! Tenant lifecycle against Grafana's shared `orgMapping`.
//!
//! Every write recomputes the document from the complete tenant set and
//! replaces it whole. There is no lock around the read-modify-write: the last
//! writer wins, and a lost race is repaired by the next cycle of any tenant.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};

use orgmapper_core::types::{Condition, ResourceUid, Tenant, TenantObservation, TenantParameters};
use orgmapper_core::TenantStore;
use orgmapper_grafana::{current_org_mapping, sync_org_mapping, GrafanaError, SsoSettingsApi};
use orgmapper_mapping::{contains, encode, TenantMapping};

use crate::error::ReconcileError;

/// What `observe` learned about a tenant's external state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalState {
    /// Never created, or on its way out.
    Absent,
    /// Created, but the observation or Grafana disagrees with the spec.
    ExistsNotSynced,
    Synced,
}

pub struct TenantEngine {
    store: Arc<dyn TenantStore>,
    sso: Arc<dyn SsoSettingsApi>,
}

impl TenantEngine {
    pub fn new(store: Arc<dyn TenantStore>, sso: Arc<dyn SsoSettingsApi>) -> Self {
        Self { store, sso }
    }

    pub fn store(&self) -> &dyn TenantStore {
        self.store.as_ref()
    }

    pub fn sso(&self) -> &dyn SsoSettingsApi {
        self.sso.as_ref()
    }

    // -----------------------------------------------------------------------
    // Observe
    // -----------------------------------------------------------------------

    /// Classify `tenant`. May set its `Ready` condition; never writes Grafana
    /// except for the best-effort unsync of a tenant marked for deletion.
    pub fn observe(&self, tenant: &mut Tenant) -> Result<ExternalState, ReconcileError> {
        ensure_tenant_kind(tenant)?;

        if tenant.external_name().is_none() {
            return Ok(ExternalState::Absent);
        }

        if tenant.is_deleting() {
            if let Err(err) = self.sync_excluding(Some(tenant.uid())) {
                tracing::warn!(
                    tenant_id = %tenant.spec.tenant_id,
                    error = %err,
                    "cannot remove deleting tenant from orgMapping",
                );
            }
            return Ok(ExternalState::Absent);
        }

        let Some(observation) = tenant.status.at_provider.as_ref() else {
            return Ok(ExternalState::ExistsNotSynced);
        };
        let mut up_to_date = is_up_to_date(&tenant.spec, observation);

        if up_to_date {
            tenant.status.set_condition(Condition::available());

            if tenant.spec.has_viewer_or_editor_groups() {
                match self.has_drifted(&tenant.spec) {
                    Ok(true) => {
                        tracing::info!(
                            tenant_id = %tenant.spec.tenant_id,
                            org_id = %tenant.spec.org_id,
                            "orgMapping drifted from tenant, forcing resync",
                        );
                        up_to_date = false;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        tracing::debug!(
                            tenant_id = %tenant.spec.tenant_id,
                            error = %err,
                            "drift check failed, trusting local observation",
                        );
                    }
                }
            }
        }

        Ok(if up_to_date {
            ExternalState::Synced
        } else {
            ExternalState::ExistsNotSynced
        })
    }

    /// Whether Grafana's mapping lacks this tenant's self entry. An
    /// unconfigured provider, a settings object that is not a map, or an
    /// `orgMapping` that is not a string also counts as drift.
    fn has_drifted(&self, spec: &TenantParameters) -> Result<bool, GrafanaError> {
        match current_org_mapping(self.sso()) {
            Ok(None) => Ok(true),
            Ok(Some(document)) => Ok(!contains(&document, &spec.org_id)),
            Err(GrafanaError::InvalidSettings { .. } | GrafanaError::Decode(_)) => Ok(true),
            Err(err) => Err(err),
        }
    }

    // -----------------------------------------------------------------------
    // Create / Update / Delete
    // -----------------------------------------------------------------------

    /// Claim the tenant id and write the mapping including this tenant. On
    /// any failure `tenant` is left untouched.
    pub fn create(&self, tenant: &mut Tenant) -> Result<(), ReconcileError> {
        ensure_tenant_kind(tenant)?;
        self.validate_unique_tenant_id(tenant)?;

        let mut candidate = tenant.clone();
        candidate.metadata.external_name = Some(candidate.spec.tenant_id.to_string());
        candidate.status.at_provider =
            Some(TenantObservation::from_parameters(&candidate.spec, now()));

        let mut tenants = self.store.list()?;
        match tenants.iter_mut().find(|t| t.uid() == candidate.uid()) {
            Some(slot) => *slot = candidate.clone(),
            None => tenants.push(candidate.clone()),
        }
        let document = sync_org_mapping(self.sso(), &desired_mappings(&tenants, None))?;
        tracing::info!(
            tenant_id = %candidate.spec.tenant_id,
            org_id = %candidate.spec.org_id,
            entries = entry_count(&document),
            "tenant created",
        );

        *tenant = candidate;
        Ok(())
    }

    /// Refresh the observation and resync. Grafana failures are logged, not
    /// returned; the next cycle retries. A store failure leaves `tenant`
    /// untouched.
    pub fn update(&self, tenant: &mut Tenant) -> Result<(), ReconcileError> {
        ensure_tenant_kind(tenant)?;
        let mut tenants = self.store.list()?;

        tenant.status.at_provider = Some(TenantObservation::from_parameters(&tenant.spec, now()));
        match tenants.iter_mut().find(|t| t.uid() == tenant.uid()) {
            Some(slot) => *slot = tenant.clone(),
            None => tenants.push(tenant.clone()),
        }
        match sync_org_mapping(self.sso(), &desired_mappings(&tenants, None)) {
            Ok(document) => tracing::info!(
                tenant_id = %tenant.spec.tenant_id,
                entries = entry_count(&document),
                "tenant updated",
            ),
            Err(err) => tracing::warn!(
                tenant_id = %tenant.spec.tenant_id,
                error = %err,
                "cannot sync orgMapping after update",
            ),
        }
        Ok(())
    }

    /// Rewrite the mapping without `tenant`. Grafana failures are logged.
    pub fn delete(&self, tenant: &Tenant) -> Result<(), ReconcileError> {
        ensure_tenant_kind(tenant)?;
        let tenants = self.store.list()?;
        match sync_org_mapping(
            self.sso(),
            &desired_mappings(&tenants, Some(tenant.uid())),
        ) {
            Ok(_) => tracing::info!(tenant_id = %tenant.spec.tenant_id, "tenant removed from orgMapping"),
            Err(err) => tracing::warn!(
                tenant_id = %tenant.spec.tenant_id,
                error = %err,
                "cannot sync orgMapping after delete",
            ),
        }
        Ok(())
    }

    /// Reject `tenant` when another resource already uses its tenant id.
    pub fn validate_unique_tenant_id(&self, tenant: &Tenant) -> Result<(), ReconcileError> {
        let tenants = self.store.list()?;
        let owner = tenants.iter().find(|other| {
            other.uid() != tenant.uid() && other.spec.tenant_id == tenant.spec.tenant_id
        });
        match owner {
            Some(other) => Err(ReconcileError::Conflict {
                tenant_id: tenant.spec.tenant_id.to_string(),
                owner: other.key().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// The document the current tenant set encodes to, without touching
    /// Grafana.
    pub fn desired_document(&self) -> Result<String, ReconcileError> {
        let tenants = self.store.list()?;
        Ok(encode(&desired_mappings(&tenants, None)))
    }

    fn sync_excluding(&self, exclude: Option<&ResourceUid>) -> Result<String, ReconcileError> {
        let tenants = self.store.list()?;
        Ok(sync_org_mapping(
            self.sso(),
            &desired_mappings(&tenants, exclude),
        )?)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Spec and observation agree field by field. Absent and empty group lists
/// are the same value once deserialized.
pub fn is_up_to_date(spec: &TenantParameters, observed: &TenantObservation) -> bool {
    spec.tenant_id == observed.tenant_id
        && spec.org_id == observed.org_id
        && spec.admins == observed.admins
        && spec.viewer_groups == observed.viewer_groups
        && spec.editor_groups == observed.editor_groups
        && spec.admin_groups == observed.admin_groups
        && spec.retention == observed.retention
}

/// Tenants that belong in the mapping, ordered by `(tenantId, uid)`.
/// Tenants marked for deletion and `exclude` are left out.
fn desired_mappings(tenants: &[Tenant], exclude: Option<&ResourceUid>) -> Vec<TenantMapping> {
    let mut included: Vec<&Tenant> = tenants
        .iter()
        .filter(|t| !t.is_deleting())
        .filter(|t| Some(t.uid()) != exclude)
        .collect();
    included.sort_by(|a, b| {
        (&a.spec.tenant_id, a.uid()).cmp(&(&b.spec.tenant_id, b.uid()))
    });
    included
        .into_iter()
        .map(|t| TenantMapping::from(&t.spec))
        .collect()
}

fn ensure_tenant_kind(tenant: &Tenant) -> Result<(), ReconcileError> {
    if tenant.is_tenant_kind() {
        Ok(())
    } else {
        Err(ReconcileError::TypeMismatch {
            kind: tenant.kind.clone(),
        })
    }
}

fn entry_count(document: &str) -> usize {
    if document.is_empty() {
        0
    } else {
        document.split(',').count()
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

#[cfg(test)]
mod tests {
    use orgmapper_core::types::{RetentionPolicy, TenantId};
    use orgmapper_core::MemoryStore;
    use orgmapper_grafana::MemorySso;

    use super::*;

    fn spec(id: &str, org: &str, viewers: &[&str]) -> TenantParameters {
        TenantParameters {
            tenant_id: TenantId::from(id),
            org_id: org.into(),
            viewer_groups: viewers.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn tenant(name: &str, uid: &str, spec: TenantParameters) -> Tenant {
        let mut t = Tenant::new(name, spec);
        t.metadata.uid = ResourceUid::from(uid);
        t
    }

    #[test]
    fn up_to_date_compares_every_field() {
        let s = spec("acme", "1", &["a"]);
        let mut obs = TenantObservation::from_parameters(&s, now());
        assert!(is_up_to_date(&s, &obs));

        obs.retention = RetentionPolicy {
            logs: "30d".to_string(),
            ..Default::default()
        };
        assert!(!is_up_to_date(&s, &obs));

        let mut obs = TenantObservation::from_parameters(&s, now());
        obs.admin_groups = vec!["root".to_string()];
        assert!(!is_up_to_date(&s, &obs));
    }

    #[test]
    fn desired_mappings_are_sorted_and_skip_deleting() {
        let mut gone = tenant("c", "u3", spec("c", "3", &["c"]));
        gone.metadata.deletion_timestamp = Some(now());
        let tenants = vec![
            tenant("b", "u2", spec("beta", "2", &["b"])),
            tenant("a2", "u9", spec("alpha", "1", &["z"])),
            gone,
            tenant("a1", "u1", spec("alpha", "1", &["y"])),
        ];
        let doc = encode(&desired_mappings(&tenants, None));
        assert_eq!(doc, "y:1:Viewer,z:1:Viewer,b:2:Viewer");

        let doc = encode(&desired_mappings(&tenants, Some(&ResourceUid::from("u2"))));
        assert_eq!(doc, "y:1:Viewer,z:1:Viewer");
    }

    #[test]
    fn observe_rejects_wrong_kind() {
        let engine = TenantEngine::new(Arc::new(MemoryStore::new()), Arc::new(MemorySso::new()));
        let mut t = tenant("x", "u1", spec("x", "1", &[]));
        t.kind = "Namespace".to_string();
        let err = engine.observe(&mut t).unwrap_err();
        assert!(matches!(err, ReconcileError::TypeMismatch { kind } if kind == "Namespace"));
    }

    #[test]
    fn created_but_unobserved_is_not_synced() {
        let engine = TenantEngine::new(Arc::new(MemoryStore::new()), Arc::new(MemorySso::new()));
        let mut t = tenant("x", "u1", spec("x", "1", &[]));
        t.metadata.external_name = Some("x".to_string());
        assert_eq!(engine.observe(&mut t).unwrap(), ExternalState::ExistsNotSynced);
    }

    #[test]
    fn entry_count_handles_empty_document() {
        assert_eq!(entry_count(""), 0);
        assert_eq!(entry_count("a:1:Viewer,b:1:Editor"), 2);
    }
}
