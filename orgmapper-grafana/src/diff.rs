//! Unified diff between the live and desired `orgMapping`, for
//! `orgmapper mapping diff`.

use similar::TextDiff;

use orgmapper_mapping::MappingEntry;

use crate::sso::ORG_MAPPING_KEY;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingDiff {
    pub added: usize,
    pub removed: usize,
    pub unified_diff: String,
}

/// Compare two documents one entry per line. `None` when they hold the same
/// entries in the same order.
pub fn mapping_diff(current: &str, desired: &str) -> Option<MappingDiff> {
    let current = one_entry_per_line(current);
    let desired = one_entry_per_line(desired);
    if current == desired {
        return None;
    }

    let diff = TextDiff::from_lines(&current, &desired);
    let mut added = 0;
    let mut removed = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Insert => added += 1,
            similar::ChangeTag::Delete => removed += 1,
            similar::ChangeTag::Equal => {}
        }
    }
    let unified_diff = diff
        .unified_diff()
        .header(
            &format!("grafana/{ORG_MAPPING_KEY}"),
            &format!("tenants/{ORG_MAPPING_KEY}"),
        )
        .context_radius(3)
        .to_string();

    Some(MappingDiff {
        added,
        removed,
        unified_diff,
    })
}

/// Split on unescaped commas so escaped subjects stay on one line.
fn one_entry_per_line(document: &str) -> String {
    let mut out = String::new();
    match orgmapper_mapping::decode(document) {
        Ok(entries) => {
            for entry in entries.iter().map(MappingEntry::to_string) {
                out.push_str(&entry);
                out.push('\n');
            }
        }
        Err(err) => {
            tracing::debug!("diffing undecodable mapping verbatim: {err}");
            for part in document.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                out.push_str(part);
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_documents_have_no_diff() {
        assert!(mapping_diff("a:1:Viewer,b:1:Editor", "a:1:Viewer, b:1:Editor").is_none());
        assert!(mapping_diff("", "").is_none());
    }

    #[test]
    fn added_and_removed_entries_are_counted() {
        let diff = mapping_diff("a:1:Viewer,old:2:Viewer", "a:1:Viewer,new:3:Editor").unwrap();
        assert_eq!(diff.added, 1);
        assert_eq!(diff.removed, 1);
        assert!(diff.unified_diff.contains("--- grafana/orgMapping"));
        assert!(diff.unified_diff.contains("+++ tenants/orgMapping"));
        assert!(diff.unified_diff.contains("-old:2:Viewer"));
        assert!(diff.unified_diff.contains("+new:3:Editor"));
    }

    #[test]
    fn escaped_subjects_stay_on_one_line() {
        let diff = mapping_diff("", "x\\:y:1:Viewer").unwrap();
        assert_eq!(diff.added, 1);
        assert!(diff.unified_diff.contains("+x\\:y:1:Viewer"));
    }

    #[test]
    fn missing_role_is_normalized_before_diffing() {
        assert!(mapping_diff("a:1", "a:1:Viewer").is_none());
    }
}
