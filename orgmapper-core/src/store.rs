//! Tenant store: the desired-state collaborator of the controller.
//!
//! # Storage layout ([`FileStore`])
//!
//! ```text
//! ~/.orgmapper/
//!   tenants/
//!     <namespace>/          (mode 0700)
//!       <name>.yaml         (one Tenant manifest per file, mode 0600)
//! ```
//!
//! Every call is consistent on its own; nothing is consistent across calls.
//! Status writes re-read the stored record and replace only `externalName`
//! and `status`, so a spec edited between a read and a status write survives.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;

use crate::error::{io_err, StoreError};
use crate::paths;
use crate::types::{Condition, ResourceKey, ResourceUid, Tenant, TENANT_KIND};

/// Access to the full set of Tenant records and their observed status.
pub trait TenantStore: Send + Sync {
    /// Every tenant record, in a deterministic order.
    fn list(&self) -> Result<Vec<Tenant>, StoreError>;

    /// A single tenant, or `None` once it has been removed.
    fn get(&self, key: &ResourceKey) -> Result<Option<Tenant>, StoreError>;

    /// Create or replace a tenant's desired state. Identity, external name,
    /// deletion marker and status of an existing record are kept.
    fn apply(&self, tenant: Tenant) -> Result<Tenant, StoreError>;

    /// Persist `externalName` and `status` of `tenant`.
    fn update_status(&self, tenant: &Tenant) -> Result<(), StoreError>;

    /// Set the deletion marker and mark the tenant `Ready=False/Deleting`.
    /// Idempotent.
    fn mark_deleted(&self, key: &ResourceKey) -> Result<Tenant, StoreError>;

    /// Remove the record for good. Removing a missing record is not an error.
    fn remove(&self, key: &ResourceKey) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Shared apply semantics
// ---------------------------------------------------------------------------

/// Namespace and name each become one path component, so neither may be
/// empty, `.`, `..`, or contain a path separator.
pub fn validate_key(key: &ResourceKey) -> Result<(), StoreError> {
    for (field, value) in [("metadata.namespace", &key.namespace), ("metadata.name", &key.name)] {
        let reason = if value.trim().is_empty() {
            "must not be empty"
        } else if value == "." || value == ".." {
            "must not be '.' or '..'"
        } else if value.contains(['/', '\\', '\0']) {
            "must not contain '/', '\\' or NUL"
        } else {
            continue;
        };
        return Err(StoreError::Invalid {
            key: key.to_string(),
            reason: format!("{field} {reason}"),
        });
    }
    Ok(())
}

fn validate(tenant: &Tenant) -> Result<(), StoreError> {
    let invalid = |reason: &str| StoreError::Invalid {
        key: tenant.key().to_string(),
        reason: reason.to_string(),
    };
    if !tenant.is_tenant_kind() {
        return Err(invalid(&format!(
            "kind must be {TENANT_KIND}, got {}",
            tenant.kind
        )));
    }
    validate_key(&tenant.key())?;
    if tenant.spec.tenant_id.as_str().is_empty() {
        return Err(invalid("spec.tenantId must not be empty"));
    }
    if tenant.spec.org_id.as_str().is_empty() {
        return Err(invalid("spec.orgId must not be empty"));
    }
    Ok(())
}

fn merge_applied(existing: Option<Tenant>, mut incoming: Tenant) -> Result<Tenant, StoreError> {
    validate(&incoming)?;
    match existing {
        Some(existing) => {
            incoming.metadata = existing.metadata;
            incoming.status = existing.status;
        }
        None => {
            if incoming.metadata.uid.is_empty() {
                incoming.metadata.uid = ResourceUid::generate();
            }
            incoming.metadata.created_at = Some(Utc::now());
            incoming.metadata.external_name = None;
            incoming.metadata.deletion_timestamp = None;
            incoming.status = Default::default();
        }
    }
    Ok(incoming)
}

fn merge_status(mut stored: Tenant, from: &Tenant) -> Tenant {
    stored.metadata.external_name = from.metadata.external_name.clone();
    stored.status = from.status.clone();
    stored
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// YAML-file backed store rooted at a home directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    home: PathBuf,
}

impl FileStore {
    /// Store rooted at an explicit home; used by tests with `TempDir`.
    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn root(&self) -> PathBuf {
        paths::tenants_root(&self.home)
    }

    pub fn tenant_path(&self, key: &ResourceKey) -> PathBuf {
        paths::tenant_path(&self.home, &key.namespace, &key.name)
    }

    fn load(&self, path: &Path) -> Result<Tenant, StoreError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn load_optional(&self, key: &ResourceKey) -> Result<Option<Tenant>, StoreError> {
        validate_key(key)?;
        let path = self.tenant_path(key);
        match std::fs::metadata(&path) {
            Ok(_) => self.load(&path).map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(path, err)),
        }
    }

    /// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
    fn save(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let key = tenant.key();
        let dir = paths::tenants_root(&self.home).join(&key.namespace);
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            set_dir_permissions(&dir)?;
        }

        let path = self.tenant_path(&key);
        let tmp = path.with_file_name(format!("{}.yaml.tmp", key.name));
        let yaml = serde_yaml::to_string(tenant)?;
        std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }
        Ok(())
    }
}

impl TenantStore for FileStore {
    fn list(&self) -> Result<Vec<Tenant>, StoreError> {
        let root = self.root();
        if !root.exists() {
            return Ok(vec![]);
        }

        let mut namespaces: Vec<_> = std::fs::read_dir(&root)
            .map_err(|e| io_err(&root, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .collect();
        namespaces.sort_by_key(|e| e.file_name());

        let mut tenants = Vec::new();
        for ns in namespaces {
            let ns_path = ns.path();
            let mut files: Vec<_> = std::fs::read_dir(&ns_path)
                .map_err(|e| io_err(&ns_path, e))?
                .filter_map(|e| e.ok())
                .collect();
            files.sort_by_key(|e| e.file_name());

            for file in files {
                let fname = file.file_name();
                if !fname.to_string_lossy().ends_with(".yaml") {
                    continue;
                }
                tenants.push(self.load(&file.path())?);
            }
        }
        Ok(tenants)
    }

    fn get(&self, key: &ResourceKey) -> Result<Option<Tenant>, StoreError> {
        self.load_optional(key)
    }

    fn apply(&self, tenant: Tenant) -> Result<Tenant, StoreError> {
        let existing = self.load_optional(&tenant.key())?;
        let merged = merge_applied(existing, tenant)?;
        self.save(&merged)?;
        Ok(merged)
    }

    fn update_status(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let key = tenant.key();
        let stored = self.load_optional(&key)?.ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        self.save(&merge_status(stored, tenant))
    }

    fn mark_deleted(&self, key: &ResourceKey) -> Result<Tenant, StoreError> {
        let mut tenant = self.load_optional(key)?.ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        if tenant.metadata.deletion_timestamp.is_none() {
            tenant.metadata.deletion_timestamp = Some(Utc::now());
            tenant.status.set_condition(Condition::deleting());
            self.save(&tenant)?;
        }
        Ok(tenant)
    }

    fn remove(&self, key: &ResourceKey) -> Result<(), StoreError> {
        validate_key(key)?;
        let path = self.tenant_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(path, err)),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store. Lists in key order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tenants: RwLock<BTreeMap<ResourceKey, Tenant>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `tenants`, bypassing apply semantics so
    /// tests can seed arbitrary metadata and status.
    pub fn with_tenants(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        let map = tenants.into_iter().map(|t| (t.key(), t)).collect();
        Self {
            tenants: RwLock::new(map),
        }
    }

    /// Replace a record verbatim, spec included.
    pub fn insert(&self, tenant: Tenant) -> Result<(), StoreError> {
        self.write()?.insert(tenant.key(), tenant);
        Ok(())
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<ResourceKey, Tenant>>, StoreError> {
        self.tenants
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<ResourceKey, Tenant>>, StoreError> {
        self.tenants
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl TenantStore for MemoryStore {
    fn list(&self) -> Result<Vec<Tenant>, StoreError> {
        Ok(self.read()?.values().cloned().collect())
    }

    fn get(&self, key: &ResourceKey) -> Result<Option<Tenant>, StoreError> {
        Ok(self.read()?.get(key).cloned())
    }

    fn apply(&self, tenant: Tenant) -> Result<Tenant, StoreError> {
        let mut guard = self.write()?;
        let key = tenant.key();
        let merged = merge_applied(guard.get(&key).cloned(), tenant)?;
        guard.insert(key, merged.clone());
        Ok(merged)
    }

    fn update_status(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        let key = tenant.key();
        let stored = guard.get(&key).cloned().ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        guard.insert(key, merge_status(stored, tenant));
        Ok(())
    }

    fn mark_deleted(&self, key: &ResourceKey) -> Result<Tenant, StoreError> {
        let mut guard = self.write()?;
        let tenant = guard.get_mut(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        if tenant.metadata.deletion_timestamp.is_none() {
            tenant.metadata.deletion_timestamp = Some(Utc::now());
            tenant.status.set_condition(Condition::deleting());
        }
        Ok(tenant.clone())
    }

    fn remove(&self, key: &ResourceKey) -> Result<(), StoreError> {
        self.write()?.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
