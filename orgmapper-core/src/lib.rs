//! orgmapper core library: tenant domain types, the tenant store, config.
//!
//! - [`types`]: newtypes and the `Tenant` resource
//! - [`store`]: [`TenantStore`] with file and in-memory backends
//! - [`config`]: [`ControllerConfig`]
//! - [`error`]: [`StoreError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod paths;
pub mod store;
pub mod types;

pub use config::{ControllerConfig, CredentialsSource, LogFormat};
pub use error::{ConfigError, StoreError};
pub use store::{FileStore, MemoryStore, TenantStore};
pub use types::{
    Condition, ConditionReason, ConditionStatus, ConditionType, ObjectMeta, OrgId, ResourceKey,
    ResourceUid, RetentionPolicy, Tenant, TenantId, TenantObservation, TenantParameters,
    TenantStatus,
};
