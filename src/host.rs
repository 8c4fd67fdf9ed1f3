//! The remote modeling host, seen from the core.
//!
//! [`RemoteHost`] is the only seam between this crate and the application that actually opens,
//! edits and publishes documents. Each method answers one well-defined question or performs one
//! remote operation; the core never queries the host for optional capabilities at runtime.
//!
//! All calls are blocking from the caller's perspective. The core issues them strictly
//! sequentially from a single worker thread.

use serde::{Deserialize, Serialize};

use crate::{
    error::SyncTreeError,
    resource::{ResourceKey, WorksetMode},
};

/// Identifiers read off a reference that points at a remote document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CloudTarget {
    /// Region of the target, when the reference states one explicitly.
    pub region: Option<String>,
    pub collection_id: String,
    pub resource_id: String,
    /// User-visible path of the target, for display only.
    pub display_path: String,
}

/// What a stored external-file locator points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocatorKind {
    /// A linked document of the same kind as the one being scanned.
    RemoteModel,
    /// A file on a local or network drive.
    LocalFile,
    /// Any other external reference kind (images, CAD imports, ...).
    Other(String),
}

/// The stored external-file locator of a reference. Readable even when the reference is not
/// loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLocator {
    pub kind: LocatorKind,
    /// Identifiers extracted from the locator's absolute path. `Err` when the path is not a
    /// remote path.
    pub target: Result<CloudTarget, String>,
}

/// One reference record inside an open document, as the host exposes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReferenceRecord {
    pub name: Option<String>,
    /// Set for references that are only present transitively through another reference.
    pub nested: bool,
    /// Identifiers read from the in-memory loaded reference. `None` when not loaded.
    pub loaded: Option<Result<CloudTarget, String>>,
    /// The stored locator. `None` when the record has no external-file reference.
    pub locator: Option<Result<ExternalLocator, String>>,
}

/// A reference that can be reloaded inside an open document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadTarget {
    /// Host-side identifier of the reference record.
    pub id: String,
    pub name: String,
}

/// Outcome of forcing closed user partitions open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PartitionReport {
    /// Number of user partitions that were closed before the attempt.
    pub opened: usize,
    /// Number of user partitions still closed after the attempt.
    pub still_closed: usize,
}

/// Ownership to give up when publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelinquishOptions {
    pub user_worksets: bool,
    pub view_worksets: bool,
    pub family_worksets: bool,
    pub standard_worksets: bool,
    pub checked_out_elements: bool,
    pub save_local_before: bool,
    pub save_local_after: bool,
}

impl RelinquishOptions {
    /// Relinquish everything, so other clients are never blocked by this run.
    pub fn all() -> Self {
        RelinquishOptions {
            user_worksets: true,
            view_worksets: true,
            family_worksets: true,
            standard_worksets: true,
            checked_out_elements: true,
            save_local_before: true,
            save_local_after: true,
        }
    }
}

impl Default for RelinquishOptions {
    fn default() -> Self {
        RelinquishOptions::all()
    }
}

pub trait RemoteHost {
    /// An open document. Consumed by [`close_resource`](RemoteHost::close_resource), so a handle
    /// can only be closed once.
    type Handle;

    /// Open for editing, with the given partition behavior.
    fn open_resource(
        &self,
        key: &ResourceKey,
        worksets: WorksetMode,
    ) -> Result<Self::Handle, SyncTreeError>;

    /// Open detached with all partitions closed. Cheap; exposes reference metadata only.
    fn open_read_only_fast(&self, key: &ResourceKey) -> Result<Self::Handle, SyncTreeError>;

    /// Close without persisting local state unless `save_local` is set.
    fn close_resource(&self, handle: Self::Handle, save_local: bool) -> Result<(), SyncTreeError>;

    /// A handle the host already has open for `key`, if any. Such handles are owned by the host
    /// session and are never closed by the core.
    fn find_open(&self, _key: &ResourceKey) -> Option<Self::Handle> {
        None
    }

    /// The key of an open document.
    fn identify(&self, handle: &Self::Handle) -> Result<ResourceKey, SyncTreeError>;

    /// Every reference record inside the document, nested ones included.
    fn list_references(&self, handle: &Self::Handle)
        -> Result<Vec<ReferenceRecord>, SyncTreeError>;

    fn force_open_closed_partitions(
        &self,
        handle: &Self::Handle,
    ) -> Result<PartitionReport, SyncTreeError>;

    /// References that can be reloaded inside the document.
    fn reloadable_references(&self, handle: &Self::Handle)
        -> Result<Vec<ReloadTarget>, SyncTreeError>;

    /// Reload one reference inside its own transaction, committed on success and rolled back on
    /// failure.
    fn reload_reference(
        &self,
        handle: &Self::Handle,
        target: &ReloadTarget,
    ) -> Result<(), SyncTreeError>;

    /// Pull the latest published state into the open document.
    fn refresh_to_latest(&self, handle: &Self::Handle) -> Result<(), SyncTreeError>;

    /// Synchronize local changes to the shared source.
    fn publish(
        &self,
        handle: &Self::Handle,
        relinquish: &RelinquishOptions,
    ) -> Result<(), SyncTreeError>;
}
