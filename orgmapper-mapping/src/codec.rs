//! `orgMapping` text format.
//!
//! A document is a comma-separated list of `subject:orgId:Role` entries.
//! A literal `:` inside `subject` is written as `\:`; `orgId` and `Role` are
//! never escaped. The empty document is the empty string.
//!
//! ```text
//! team-a:12:Viewer,oidc\:ops:12:Editor,platform:7:Admin
//! ```

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use orgmapper_core::types::{OrgId, TenantParameters};

use crate::error::MappingError;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Grafana organization role granted by a mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "Viewer",
            Role::Editor => "Editor",
            Role::Admin => "Admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Viewer" => Ok(Role::Viewer),
            "Editor" => Ok(Role::Editor),
            "Admin" => Ok(Role::Admin),
            other => Err(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// The slice of a tenant the codec needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TenantMapping {
    pub org_id: OrgId,
    pub viewer_groups: Vec<String>,
    pub editor_groups: Vec<String>,
    pub admin_groups: Vec<String>,
}

impl From<&TenantParameters> for TenantMapping {
    fn from(spec: &TenantParameters) -> Self {
        Self {
            org_id: spec.org_id.clone(),
            viewer_groups: spec.viewer_groups.clone(),
            editor_groups: spec.editor_groups.clone(),
            admin_groups: spec.admin_groups.clone(),
        }
    }
}

impl TenantMapping {
    /// Entries in emission order: viewers, then editors, then admins.
    pub fn entries(&self) -> impl Iterator<Item = MappingEntry> + '_ {
        let groups = [
            (Role::Viewer, &self.viewer_groups),
            (Role::Editor, &self.editor_groups),
            (Role::Admin, &self.admin_groups),
        ];
        groups.into_iter().flat_map(move |(role, subjects)| {
            subjects.iter().map(move |subject| MappingEntry {
                subject: subject.clone(),
                org_id: self.org_id.as_str().to_string(),
                role,
            })
        })
    }
}

/// One `subject:orgId:Role` triple. `subject` is held unescaped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    pub subject: String,
    pub org_id: String,
    pub role: Role,
}

impl fmt::Display for MappingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            escape_subject(&self.subject),
            self.org_id,
            self.role
        )
    }
}

fn escape_subject(subject: &str) -> String {
    subject.replace(':', "\\:")
}

// ---------------------------------------------------------------------------
// Encode / inspect
// ---------------------------------------------------------------------------

/// Render the document for `tenants`, in input order. Tenants without
/// groups contribute nothing; no tenants yields `""`.
pub fn encode(tenants: &[TenantMapping]) -> String {
    tenants
        .iter()
        .flat_map(TenantMapping::entries)
        .map(|entry| entry.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether the document holds the literal `<orgId>:<orgId>:Viewer` entry.
pub fn contains(document: &str, org_id: &OrgId) -> bool {
    let wanted = format!("{0}:{0}:Viewer", org_id.as_str());
    split_unescaped(document, ',')
        .iter()
        .any(|part| part.trim() == wanted)
}

/// Parse a document into entries. Blank entries are skipped and a missing
/// role reads as Viewer, as Grafana does.
///
/// Only `:` is escaped on the wire, so a subject that ends in a backslash
/// cannot be told apart from an escaped colon and does not decode back to
/// itself.
pub fn decode(document: &str) -> Result<Vec<MappingEntry>, MappingError> {
    let mut entries = Vec::new();
    for raw in split_unescaped(document, ',') {
        let entry = raw.trim();
        if entry.is_empty() {
            continue;
        }
        let fields = split_unescaped(entry, ':');
        let (subject, org_id, role) = match fields.as_slice() {
            [subject, org_id] => (subject, org_id, Role::Viewer),
            [subject, org_id, role] => {
                let role = role.parse::<Role>().map_err(|role| MappingError::UnknownRole {
                    entry: entry.to_string(),
                    role,
                })?;
                (subject, org_id, role)
            }
            _ => {
                return Err(MappingError::MalformedEntry {
                    entry: entry.to_string(),
                })
            }
        };
        if subject.is_empty() || org_id.is_empty() {
            return Err(MappingError::MalformedEntry {
                entry: entry.to_string(),
            });
        }
        entries.push(MappingEntry {
            subject: subject.replace("\\:", ":"),
            org_id: org_id.to_string(),
            role,
        });
    }
    Ok(entries)
}

/// Split on `sep` wherever it is not directly preceded by a backslash.
/// A backslash escapes nothing else, so `\\:` is a literal backslash
/// followed by an escaped separator. Escapes are left in place for the
/// caller.
fn split_unescaped(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev = None;
    for (idx, ch) in input.char_indices() {
        if ch == sep && prev != Some('\\') {
            parts.push(&input[start..idx]);
            start = idx + ch.len_utf8();
        }
        prev = Some(ch);
    }
    parts.push(&input[start..]);
    parts
}
