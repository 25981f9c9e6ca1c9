//! Domain types for Tenant resources.
//!
//! A [`Tenant`] is a desired-state record (`spec`) plus the last synchronized
//! snapshot the controller recorded for it (`status.atProvider`). All types
//! serialize with camelCase keys so stored YAML reads like any other
//! Kubernetes-style manifest.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// `apiVersion` written on every Tenant manifest.
pub const TENANT_API_VERSION: &str = "tenant.orgmapper.io/v1alpha1";
/// `kind` written on every Tenant manifest.
pub const TENANT_KIND: &str = "Tenant";
/// Namespace used when a manifest does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// The globally unique tenant identifier declared in `spec.tenantId`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// The Grafana organization a tenant is bound to. Not unique across tenants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct OrgId(pub String);

impl OrgId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for OrgId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrgId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Store-assigned identity of a resource. Two records with the same
/// `tenantId` are distinguished by their uid.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct ResourceUid(pub String);

impl ResourceUid {
    /// A fresh random uid.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResourceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ResourceUid {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// `<namespace>/<name>` address of a resource in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// ---------------------------------------------------------------------------
// Spec
// ---------------------------------------------------------------------------

/// Data retention durations per signal type. Passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RetentionPolicy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub logs: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metrics: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub traces: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profiles: String,
}

/// The configurable fields of a Tenant.
///
/// Absent, `null` and `[]` group lists all decode to an empty `Vec`, so
/// comparisons never distinguish between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TenantParameters {
    pub tenant_id: TenantId,
    pub org_id: OrgId,
    /// Tenant administrators (typically GitHub IDs).
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub admins: Vec<String>,
    /// Group claims granted Viewer in the tenant's org.
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub viewer_groups: Vec<String>,
    /// Group claims granted Editor in the tenant's org.
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub editor_groups: Vec<String>,
    /// Group claims granted Admin in the tenant's org.
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub admin_groups: Vec<String>,
    #[serde(default)]
    pub retention: RetentionPolicy,
}

impl TenantParameters {
    /// True when the tenant grants any Viewer or Editor group.
    pub fn has_viewer_or_editor_groups(&self) -> bool {
        !self.viewer_groups.is_empty() || !self.editor_groups.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// The observable fields of a Tenant, as of the last synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TenantObservation {
    #[serde(default)]
    pub tenant_id: TenantId,
    #[serde(default)]
    pub org_id: OrgId,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub admins: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub viewer_groups: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub editor_groups: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub admin_groups: Vec<String>,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl TenantObservation {
    /// Snapshot `spec` as synchronized at `at`.
    pub fn from_parameters(spec: &TenantParameters, at: DateTime<Utc>) -> Self {
        Self {
            tenant_id: spec.tenant_id.clone(),
            org_id: spec.org_id.clone(),
            admins: spec.admins.clone(),
            viewer_groups: spec.viewer_groups.clone(),
            editor_groups: spec.editor_groups.clone(),
            admin_groups: spec.admin_groups.clone(),
            retention: spec.retention.clone(),
            last_updated: Some(at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionReason {
    Available,
    Creating,
    Deleting,
    ReconcileSuccess,
    ReconcileError,
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionReason::Available => "Available",
            ConditionReason::Creating => "Creating",
            ConditionReason::Deleting => "Deleting",
            ConditionReason::ReconcileSuccess => "ReconcileSuccess",
            ConditionReason::ReconcileError => "ReconcileError",
        };
        f.write_str(s)
    }
}

/// A status condition in the Crossplane style (`Ready`, `Synced`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    fn new(kind: ConditionType, status: ConditionStatus, reason: ConditionReason) -> Self {
        Self {
            kind,
            status,
            reason,
            message: None,
            last_transition_time: Utc::now(),
        }
    }

    pub fn available() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::True, ConditionReason::Available)
    }

    pub fn creating() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, ConditionReason::Creating)
    }

    pub fn deleting() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, ConditionReason::Deleting)
    }

    pub fn reconcile_success() -> Self {
        Self::new(
            ConditionType::Synced,
            ConditionStatus::True,
            ConditionReason::ReconcileSuccess,
        )
    }

    pub fn reconcile_error(message: impl Into<String>) -> Self {
        let mut c = Self::new(
            ConditionType::Synced,
            ConditionStatus::False,
            ConditionReason::ReconcileError,
        );
        c.message = Some(message.into());
        c
    }

    /// Same type, status, reason and message; ignores the transition time.
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.kind == other.kind
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// The observed state of a Tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_provider: Option<TenantObservation>,
}

impl TenantStatus {
    /// Set a condition, replacing any existing one of the same type. An
    /// equivalent condition keeps its original transition time.
    pub fn set_condition(&mut self, condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.kind == condition.kind) {
            Some(existing) if existing.equivalent(&condition) => {}
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }

    pub fn condition(&self, kind: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }
}

// ---------------------------------------------------------------------------
// Resource envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "ResourceUid::is_empty")]
    pub uid: ResourceUid,
    /// Set once the tenant has been created in the external system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_name: Option<String>,
    /// Deletion marker. The record is removed once the controller has
    /// finalized it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: ResourceUid::default(),
            external_name: None,
            deletion_timestamp: None,
            created_at: None,
        }
    }
}

/// A Tenant managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: TenantParameters,
    #[serde(default)]
    pub status: TenantStatus,
}

impl Tenant {
    /// A new Tenant in the default namespace.
    pub fn new(name: impl Into<String>, spec: TenantParameters) -> Self {
        Self {
            api_version: TENANT_API_VERSION.to_string(),
            kind: TENANT_KIND.to_string(),
            metadata: ObjectMeta::new(DEFAULT_NAMESPACE, name),
            spec,
            status: TenantStatus::default(),
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn uid(&self) -> &ResourceUid {
        &self.metadata.uid
    }

    pub fn external_name(&self) -> Option<&str> {
        self.metadata
            .external_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn is_tenant_kind(&self) -> bool {
        self.kind == TENANT_KIND
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_api_version() -> String {
    TENANT_API_VERSION.to_string()
}

fn default_kind() -> String {
    TENANT_KIND.to_string()
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<String>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(TenantId::from("acme").to_string(), "acme");
        assert_eq!(OrgId::from("org-1").to_string(), "org-1");
        assert_eq!(ResourceKey::new("team", "acme").to_string(), "team/acme");
    }

    #[test]
    fn generated_uids_are_distinct() {
        assert_ne!(ResourceUid::generate(), ResourceUid::generate());
    }

    #[test]
    fn null_and_missing_groups_decode_empty() {
        let yaml = "tenantId: acme\norgId: org-1\nviewerGroups: null\n";
        let spec: TenantParameters = serde_yaml::from_str(yaml).expect("parse");
        assert!(spec.viewer_groups.is_empty());
        assert!(spec.editor_groups.is_empty());
        assert!(spec.admins.is_empty());
    }

    #[test]
    fn manifest_defaults_namespace_and_kind() {
        let yaml = r#"
metadata:
  name: acme
spec:
  tenantId: acme
  orgId: org-1
  viewerGroups: [team-a]
"#;
        let tenant: Tenant = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(tenant.metadata.namespace, DEFAULT_NAMESPACE);
        assert_eq!(tenant.kind, TENANT_KIND);
        assert_eq!(tenant.api_version, TENANT_API_VERSION);
        assert_eq!(tenant.spec.viewer_groups, vec!["team-a".to_string()]);
        assert!(tenant.status.at_provider.is_none());
    }

    #[test]
    fn spec_serializes_camel_case() {
        let spec = TenantParameters {
            tenant_id: "acme".into(),
            org_id: "org-1".into(),
            editor_groups: vec!["devs".into()],
            ..Default::default()
        };
        let json = serde_json::to_value(&spec).expect("serialize");
        assert_eq!(json["tenantId"], "acme");
        assert_eq!(json["orgId"], "org-1");
        assert_eq!(json["editorGroups"][0], "devs");
        assert!(json.get("viewerGroups").is_none());
    }

    #[test]
    fn empty_external_name_counts_as_unset() {
        let mut tenant = Tenant::new("acme", TenantParameters::default());
        tenant.metadata.external_name = Some(String::new());
        assert!(tenant.external_name().is_none());
    }

    #[test]
    fn set_condition_keeps_transition_time_when_equivalent() {
        let mut status = TenantStatus::default();
        let first = Condition::available();
        let first_time = first.last_transition_time;
        status.set_condition(first);

        let mut again = Condition::available();
        again.last_transition_time = first_time + chrono::Duration::seconds(30);
        status.set_condition(again);

        let ready = status.condition(ConditionType::Ready).expect("ready");
        assert_eq!(ready.last_transition_time, first_time);
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn set_condition_replaces_on_reason_change() {
        let mut status = TenantStatus::default();
        status.set_condition(Condition::reconcile_success());
        status.set_condition(Condition::reconcile_error("boom"));

        let synced = status.condition(ConditionType::Synced).expect("synced");
        assert_eq!(synced.status, ConditionStatus::False);
        assert_eq!(synced.message.as_deref(), Some("boom"));
        assert_eq!(status.conditions.len(), 1);
    }
}
