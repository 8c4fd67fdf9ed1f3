//! Direct-reference extraction from an open document.
//!
//! [`read_direct_links`] turns the host's raw [`ReferenceRecord`]s into the list of remote
//! documents the scanned document depends on directly. Anything that cannot be classified as a
//! direct reference to a remote document is dropped and reported as a [`LinkDiagnostic`];
//! nothing in this module fails a scan because of one malformed record.
//!
//! ## Resolution order
//!
//! For each record:
//! 1. Nested (transitive) records are skipped.
//! 2. Identifiers are read off the in-memory loaded reference, if the reference is loaded.
//! 3. Otherwise, or if that produced nothing usable, identifiers are read off the stored
//!    external-file locator, which works for unloaded references too.
//!
//! Within one document the result is deduplicated by resource id; the first record wins.

use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt};
use uuid::Uuid;

use crate::{
    event::ProgressLevel,
    host::{CloudTarget, ExternalLocator, LocatorKind, ReferenceRecord, RemoteHost},
    resource::ResourceKey,
};

pub const UNKNOWN_NAME: &str = "<unknown>";

/// A direct reference from one document to another remote document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRef {
    pub name: String,
    pub collection_id: String,
    pub resource_id: String,
    pub display_path: String,
    /// Region stated by the reference itself, if any.
    pub region: Option<String>,
}

impl ChildRef {
    fn from_target(name: &str, target: CloudTarget) -> Self {
        ChildRef {
            name: name.to_string(),
            collection_id: target.collection_id,
            resource_id: target.resource_id,
            display_path: target.display_path,
            region: target.region,
        }
    }

    /// The child's key. The region is inherited from the referencing document unless the
    /// reference states its own.
    pub fn key(&self, parent_region: &str) -> ResourceKey {
        let region = match &self.region {
            Some(r) if !r.is_empty() => r.clone(),
            _ => parent_region.to_string(),
        };
        ResourceKey::new(region, &self.collection_id, &self.resource_id)
    }
}

/// Why a reference record was left out of a [`LinkReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkDiagnostic {
    /// The document contains no reference records at all.
    NoReferences,
    /// The reference records could not be enumerated.
    EnumerationFailed(String),
    Nested { name: String },
    /// Reading identifiers from the loaded reference failed; the locator is tried next.
    LoadedUnreadable { name: String, reason: String },
    NoLocator { name: String },
    LocatorUnreadable { name: String, reason: String },
    /// The locator points at something other than a remote document.
    NotRemote { name: String, kind: String },
    /// The locator's path is not a remote path.
    NotCloudPath { name: String, reason: String },
    /// The reference resolved to an empty or nil resource id.
    EmptyResourceId { name: String },
    /// Same resource id as an earlier record in this document.
    Duplicate { name: String, resource_id: String },
}

impl LinkDiagnostic {
    pub fn level(&self) -> ProgressLevel {
        match self {
            LinkDiagnostic::Duplicate { .. } | LinkDiagnostic::LoadedUnreadable { .. } => {
                ProgressLevel::Info
            }
            _ => ProgressLevel::Warning,
        }
    }
}

impl fmt::Display for LinkDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkDiagnostic::NoReferences => write!(f, "No reference records found in document."),
            LinkDiagnostic::EnumerationFailed(e) => {
                write!(f, "Could not enumerate references: {e}")
            }
            LinkDiagnostic::Nested { name } => write!(f, "Skipped (nested): {name}"),
            LinkDiagnostic::LoadedUnreadable { name, reason } => write!(
                f,
                "Loaded reference unreadable, using stored locator: {name} ({reason})"
            ),
            LinkDiagnostic::NoLocator { name } => {
                write!(f, "Skipped (no external file reference): {name}")
            }
            LinkDiagnostic::LocatorUnreadable { name, reason } => {
                write!(f, "Skipped (external file reference failed): {name} ({reason})")
            }
            LinkDiagnostic::NotRemote { name, kind } => {
                write!(f, "Skipped (not a remote model reference, {kind}): {name}")
            }
            LinkDiagnostic::NotCloudPath { name, reason } => {
                write!(f, "Skipped (not a cloud path): {name} ({reason})")
            }
            LinkDiagnostic::EmptyResourceId { name } => {
                write!(f, "Skipped (unresolved, empty resource id): {name}")
            }
            LinkDiagnostic::Duplicate { name, resource_id } => {
                write!(f, "Skipped (duplicate of {resource_id}): {name}")
            }
        }
    }
}

/// Direct links of one document, plus everything that was skipped on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReport {
    pub links: Vec<ChildRef>,
    pub diagnostics: Vec<LinkDiagnostic>,
}

/// Read the direct links of an open document.
///
/// Never fails: if the host cannot enumerate the document's references, the report is empty
/// and carries a single [`LinkDiagnostic::EnumerationFailed`].
pub fn read_direct_links<H: RemoteHost>(host: &H, handle: &H::Handle) -> LinkReport {
    match host.list_references(handle) {
        Ok(records) => classify_references(records),
        Err(e) => LinkReport {
            links: Vec::new(),
            diagnostics: vec![LinkDiagnostic::EnumerationFailed(e.message())],
        },
    }
}

/// Classify raw reference records into direct links and diagnostics.
pub fn classify_references(records: Vec<ReferenceRecord>) -> LinkReport {
    let mut report = LinkReport::default();
    if records.is_empty() {
        report.diagnostics.push(LinkDiagnostic::NoReferences);
        return report;
    }

    let mut seen = HashSet::new();
    for record in records {
        let name = record
            .name
            .clone()
            .unwrap_or_else(|| UNKNOWN_NAME.to_string());

        if record.nested {
            report.diagnostics.push(LinkDiagnostic::Nested { name });
            continue;
        }

        let Some(child) = resolve_record(&name, record, &mut report.diagnostics) else {
            continue;
        };

        if !seen.insert(child.resource_id.clone()) {
            report.diagnostics.push(LinkDiagnostic::Duplicate {
                name,
                resource_id: child.resource_id,
            });
            continue;
        }
        report.links.push(child);
    }
    report
}

fn resolve_record(
    name: &str,
    record: ReferenceRecord,
    diagnostics: &mut Vec<LinkDiagnostic>,
) -> Option<ChildRef> {
    match record.loaded {
        Some(Ok(target)) if is_resolved(&target) => {
            return Some(ChildRef::from_target(name, target));
        }
        Some(Ok(_)) => diagnostics.push(LinkDiagnostic::EmptyResourceId {
            name: name.to_string(),
        }),
        Some(Err(reason)) => diagnostics.push(LinkDiagnostic::LoadedUnreadable {
            name: name.to_string(),
            reason,
        }),
        None => {}
    }

    let locator = match record.locator {
        None => {
            diagnostics.push(LinkDiagnostic::NoLocator {
                name: name.to_string(),
            });
            return None;
        }
        Some(Err(reason)) => {
            diagnostics.push(LinkDiagnostic::LocatorUnreadable {
                name: name.to_string(),
                reason,
            });
            return None;
        }
        Some(Ok(locator)) => locator,
    };
    resolve_locator(name, locator, diagnostics)
}

fn resolve_locator(
    name: &str,
    locator: ExternalLocator,
    diagnostics: &mut Vec<LinkDiagnostic>,
) -> Option<ChildRef> {
    let kind = match locator.kind {
        LocatorKind::RemoteModel => None,
        LocatorKind::LocalFile => Some("local file".to_string()),
        LocatorKind::Other(other) => Some(other),
    };
    if let Some(kind) = kind {
        diagnostics.push(LinkDiagnostic::NotRemote {
            name: name.to_string(),
            kind,
        });
        return None;
    }

    match locator.target {
        Ok(target) if is_resolved(&target) => Some(ChildRef::from_target(name, target)),
        Ok(_) => {
            diagnostics.push(LinkDiagnostic::EmptyResourceId {
                name: name.to_string(),
            });
            None
        }
        Err(reason) => {
            diagnostics.push(LinkDiagnostic::NotCloudPath {
                name: name.to_string(),
                reason,
            });
            None
        }
    }
}

/// Unresolved references in the store surface as an empty or all-zero resource id.
fn is_resolved(target: &CloudTarget) -> bool {
    let id = target.resource_id.trim();
    if id.is_empty() {
        return false;
    }
    !Uuid::parse_str(id).is_ok_and(|u| u.is_nil())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(resource_id: &str) -> CloudTarget {
        CloudTarget {
            region: None,
            collection_id: "proj".to_string(),
            resource_id: resource_id.to_string(),
            display_path: format!("cloud://proj/{resource_id}"),
        }
    }

    fn remote_locator(resource_id: &str) -> Option<Result<ExternalLocator, String>> {
        Some(Ok(ExternalLocator {
            kind: LocatorKind::RemoteModel,
            target: Ok(target(resource_id)),
        }))
    }

    fn record(name: &str) -> ReferenceRecord {
        ReferenceRecord {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn empty_document_reports_no_references() {
        let report = classify_references(vec![]);
        assert!(report.links.is_empty());
        assert_eq!(report.diagnostics, vec![LinkDiagnostic::NoReferences]);
    }

    #[test]
    fn nested_references_are_skipped() {
        let mut nested = record("Nested");
        nested.nested = true;
        nested.locator = remote_locator("n");
        let mut direct = record("Direct");
        direct.locator = remote_locator("d");

        let report = classify_references(vec![nested, direct]);
        assert_eq!(report.links.len(), 1);
        assert_eq!(report.links[0].resource_id, "d");
        assert!(matches!(
            report.diagnostics[0],
            LinkDiagnostic::Nested { ref name } if name == "Nested"
        ));
    }

    #[test]
    fn loaded_identifiers_preferred_over_locator() {
        let mut rec = record("Arch");
        rec.loaded = Some(Ok(target("loaded")));
        rec.locator = remote_locator("stored");

        let report = classify_references(vec![rec]);
        assert_eq!(report.links[0].resource_id, "loaded");
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn unreadable_loaded_reference_falls_back_to_locator() {
        let mut rec = record("Struct");
        rec.loaded = Some(Err("accessor threw".to_string()));
        rec.locator = remote_locator("stored");

        let report = classify_references(vec![rec]);
        assert_eq!(report.links[0].resource_id, "stored");
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].level(), ProgressLevel::Info);
    }

    #[test]
    fn local_files_and_non_cloud_paths_are_diagnostics() {
        let mut local = record("Site.rvt");
        local.locator = Some(Ok(ExternalLocator {
            kind: LocatorKind::LocalFile,
            target: Err("file path".to_string()),
        }));
        let mut bad_path = record("Odd");
        bad_path.locator = Some(Ok(ExternalLocator {
            kind: LocatorKind::RemoteModel,
            target: Err("server path".to_string()),
        }));
        let no_locator = record("Bare");

        let report = classify_references(vec![local, bad_path, no_locator]);
        assert!(report.links.is_empty());
        assert!(matches!(report.diagnostics[0], LinkDiagnostic::NotRemote { .. }));
        assert!(matches!(report.diagnostics[1], LinkDiagnostic::NotCloudPath { .. }));
        assert!(matches!(report.diagnostics[2], LinkDiagnostic::NoLocator { .. }));
    }

    #[test]
    fn empty_and_nil_resource_ids_are_excluded() {
        let mut empty = record("Empty");
        empty.locator = remote_locator("");
        let mut nil = record("Nil");
        nil.loaded = Some(Ok(target("00000000-0000-0000-0000-000000000000")));
        nil.locator = remote_locator("");

        let report = classify_references(vec![empty, nil]);
        assert!(report.links.is_empty());
        assert_eq!(
            report
                .diagnostics
                .iter()
                .filter(|d| matches!(d, LinkDiagnostic::EmptyResourceId { .. }))
                .count(),
            3
        );
    }

    #[test]
    fn duplicates_within_one_document_keep_first() {
        let mut first = record("First");
        first.loaded = Some(Ok(target("same")));
        let mut second = record("Second");
        second.locator = remote_locator("same");

        let report = classify_references(vec![first, second]);
        assert_eq!(report.links.len(), 1);
        assert_eq!(report.links[0].name, "First");
        assert!(matches!(
            report.diagnostics[0],
            LinkDiagnostic::Duplicate { ref name, .. } if name == "Second"
        ));
    }

    #[test]
    fn missing_name_renders_unknown() {
        let rec = ReferenceRecord {
            nested: true,
            ..Default::default()
        };
        let report = classify_references(vec![rec]);
        assert_eq!(
            report.diagnostics[0].to_string(),
            format!("Skipped (nested): {UNKNOWN_NAME}")
        );
    }

    #[test]
    fn child_key_inherits_parent_region_by_default() {
        let mut child = ChildRef::from_target("A", target("a"));
        assert_eq!(child.key("EMEA").region, "EMEA");
        child.region = Some("US".to_string());
        assert_eq!(child.key("EMEA").region, "US");
    }
}
