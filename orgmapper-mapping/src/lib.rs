//! orgmapper mapping library: the Grafana `orgMapping` text codec.
//!
//! [`encode`] folds a set of tenants into the comma-separated
//! `subject:orgId:Role` document Grafana reads from its SSO settings.
//! [`contains`] and [`decode`] read it back.

pub mod codec;
pub mod error;

pub use codec::{contains, decode, encode, MappingEntry, Role, TenantMapping};
pub use error::MappingError;
