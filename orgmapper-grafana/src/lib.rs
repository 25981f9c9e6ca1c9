//! # orgmapper-grafana
//!
//! Grafana SSO settings client and the read-modify-write of `orgMapping`.
//!
//! [`sync_org_mapping`] pushes the encoded mapping for a set of tenants;
//! [`current_org_mapping`] reads it back for drift checks and the CLI.

pub mod client;
pub mod diff;
pub mod error;
pub mod memory;
pub mod sso;

pub use client::{Credentials, GrafanaClient};
pub use diff::{mapping_diff, MappingDiff};
pub use error::GrafanaError;
pub use memory::MemorySso;
pub use sso::{
    current_org_mapping, fetch_settings, replace_settings, sync_org_mapping, Settings,
    SsoSettingsApi, ORG_MAPPING_KEY, SSO_PROVIDER,
};
