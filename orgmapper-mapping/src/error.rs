//! Error types for orgmapper-mapping.

use thiserror::Error;

/// Errors parsing an `orgMapping` document. Encoding never fails.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    /// An entry did not have the `subject:orgId[:Role]` shape.
    #[error("malformed org mapping entry {entry:?}: expected subject:orgId[:Role]")]
    MalformedEntry { entry: String },

    /// The role field named something other than Viewer, Editor or Admin.
    #[error("unknown role {role:?} in org mapping entry {entry:?}")]
    UnknownRole { entry: String, role: String },
}
