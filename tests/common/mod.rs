//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use synctree::{
    host::{
        CloudTarget, ExternalLocator, LocatorKind, PartitionReport, ReferenceRecord,
        RelinquishOptions, ReloadTarget, RemoteHost,
    },
    resource::{ResourceKey, WorksetMode},
    SyncTreeError,
};

pub const REGION: &str = "EMEA";
pub const PROJECT: &str = "50f7a824-a024-4dfa-8645-b3993dc8f535";

/// One host call, as recorded by [`MockHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub enum Call {
    Open(String),
    OpenReadOnly(String),
    Close(String),
    Refresh(String),
    Reload(String, String),
    Publish(String),
}

/// An open document in [`MockHost`]. Not `Clone`, like real handles.
#[derive(Debug)]
pub struct MockHandle {
    id: usize,
    resource_id: String,
    session: bool,
}

#[derive(Debug, Default)]
struct MockDoc {
    name: String,
    references: Vec<ReferenceRecord>,
    reloads: Vec<ReloadTarget>,
    failing_reloads: HashSet<String>,
    partitions: PartitionReport,
    fail_open: bool,
    fail_list: bool,
    fail_partitions: bool,
    fail_reload_listing: bool,
    fail_refresh: bool,
    fail_publish: bool,
    session_open: bool,
}

#[derive(Debug, Default)]
struct Journal {
    calls: Vec<Call>,
    next_handle: usize,
    open: HashSet<usize>,
    double_closes: usize,
}

/// In-memory [`RemoteHost`]. Documents are addressed by name in tests; each name gets a
/// GUID-shaped resource id on first use.
#[derive(Debug, Default)]
pub struct MockHost {
    ids: HashMap<String, String>,
    docs: HashMap<String, MockDoc>,
    journal: Mutex<Journal>,
}

#[allow(dead_code)]
impl MockHost {
    pub fn new() -> Self {
        MockHost::default()
    }

    /// Register `name` (if needed) and return its key.
    pub fn doc(&mut self, name: &str) -> ResourceKey {
        let next = self.ids.len() + 1;
        let resource_id = self
            .ids
            .entry(name.to_string())
            .or_insert_with(|| format!("00000000-0000-4000-8000-{next:012x}"))
            .clone();
        self.docs
            .entry(resource_id.clone())
            .or_insert_with(|| MockDoc {
                name: name.to_string(),
                ..Default::default()
            });
        ResourceKey::new(REGION, PROJECT, resource_id)
    }

    pub fn key(&self, name: &str) -> ResourceKey {
        ResourceKey::new(REGION, PROJECT, self.ids[name].clone())
    }

    fn doc_mut(&mut self, name: &str) -> &mut MockDoc {
        let key = self.doc(name);
        self.docs
            .get_mut(&key.resource_id)
            .expect("registered above")
    }

    /// A regular, loaded cloud reference from `parent` to `child`.
    pub fn link(&mut self, parent: &str, child: &str) -> &mut Self {
        let target = self.target(child);
        self.record(
            parent,
            ReferenceRecord {
                name: Some(child.to_string()),
                nested: false,
                loaded: Some(Ok(target.clone())),
                locator: Some(Ok(ExternalLocator {
                    kind: LocatorKind::RemoteModel,
                    target: Ok(target),
                })),
            },
        );
        let id = self.key(child).resource_id;
        self.doc_mut(parent).reloads.push(ReloadTarget {
            id,
            name: child.to_string(),
        });
        self
    }

    /// Build `parent → child` links from `(parent, child)` pairs.
    pub fn links(&mut self, edges: &[(&str, &str)]) -> &mut Self {
        for (parent, child) in edges {
            self.link(parent, child);
        }
        self
    }

    pub fn target(&mut self, name: &str) -> CloudTarget {
        let key = self.doc(name);
        CloudTarget {
            region: None,
            collection_id: key.collection_id,
            resource_id: key.resource_id,
            display_path: format!("cloud://{PROJECT}/{name}"),
        }
    }

    pub fn record(&mut self, parent: &str, record: ReferenceRecord) -> &mut Self {
        self.doc_mut(parent).references.push(record);
        self
    }

    /// A reloadable reference that is not a discovered link, such as a local file.
    pub fn reloadable(&mut self, parent: &str, name: &str) -> &mut Self {
        self.doc_mut(parent).reloads.push(ReloadTarget {
            id: format!("local-{name}"),
            name: name.to_string(),
        });
        self
    }

    pub fn fail_open(&mut self, name: &str) -> &mut Self {
        self.doc_mut(name).fail_open = true;
        self
    }

    pub fn fail_list(&mut self, name: &str) -> &mut Self {
        self.doc_mut(name).fail_list = true;
        self
    }

    pub fn fail_partitions(&mut self, name: &str) -> &mut Self {
        self.doc_mut(name).fail_partitions = true;
        self
    }

    /// Make listing the reloadable references of `name` fail.
    pub fn fail_reload_listing(&mut self, name: &str) -> &mut Self {
        self.doc_mut(name).fail_reload_listing = true;
        self
    }

    pub fn fail_refresh(&mut self, name: &str) -> &mut Self {
        self.doc_mut(name).fail_refresh = true;
        self
    }

    pub fn fail_publish(&mut self, name: &str) -> &mut Self {
        self.doc_mut(name).fail_publish = true;
        self
    }

    pub fn fail_reload(&mut self, parent: &str, reference: &str) -> &mut Self {
        self.doc_mut(parent)
            .failing_reloads
            .insert(reference.to_string());
        self
    }

    pub fn partitions(&mut self, name: &str, report: PartitionReport) -> &mut Self {
        self.doc_mut(name).partitions = report;
        self
    }

    /// Pretend the host session already has `name` open.
    pub fn session_open(&mut self, name: &str) -> &mut Self {
        self.doc_mut(name).session_open = true;
        self
    }

    /// A session handle to `name`, as the active document would be.
    pub fn active(&self, name: &str) -> MockHandle {
        MockHandle {
            id: usize::MAX,
            resource_id: self.ids[name].clone(),
            session: true,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.journal.lock().calls.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.journal.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Names of documents published, in order.
    pub fn published(&self) -> Vec<String> {
        self.journal
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Publish(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Handles opened through this host and not yet closed.
    pub fn still_open(&self) -> usize {
        self.journal.lock().open.len()
    }

    pub fn double_closes(&self) -> usize {
        self.journal.lock().double_closes
    }

    fn lookup(&self, resource_id: &str) -> Result<&MockDoc, SyncTreeError> {
        self.docs
            .get(resource_id)
            .ok_or_else(|| SyncTreeError::NotFound(format!("no document {resource_id}")))
    }

    fn log(&self, call: Call) {
        self.journal.lock().calls.push(call);
    }

    fn open(
        &self,
        key: &ResourceKey,
        call: fn(String) -> Call,
    ) -> Result<MockHandle, SyncTreeError> {
        let doc = self.lookup(&key.resource_id)?;
        self.log(call(doc.name.clone()));
        if doc.fail_open {
            return Err(SyncTreeError::host(format!("{} could not be opened", doc.name)));
        }
        let mut journal = self.journal.lock();
        journal.next_handle += 1;
        let id = journal.next_handle;
        journal.open.insert(id);
        Ok(MockHandle {
            id,
            resource_id: key.resource_id.clone(),
            session: false,
        })
    }
}

impl RemoteHost for MockHost {
    type Handle = MockHandle;

    fn open_resource(
        &self,
        key: &ResourceKey,
        _worksets: WorksetMode,
    ) -> Result<MockHandle, SyncTreeError> {
        self.open(key, Call::Open)
    }

    fn open_read_only_fast(&self, key: &ResourceKey) -> Result<MockHandle, SyncTreeError> {
        self.open(key, Call::OpenReadOnly)
    }

    fn close_resource(&self, handle: MockHandle, _save_local: bool) -> Result<(), SyncTreeError> {
        let name = self.lookup(&handle.resource_id)?.name.clone();
        self.log(Call::Close(name));
        let mut journal = self.journal.lock();
        if handle.session || !journal.open.remove(&handle.id) {
            journal.double_closes += 1;
        }
        Ok(())
    }

    fn find_open(&self, key: &ResourceKey) -> Option<MockHandle> {
        let doc = self.docs.get(&key.resource_id)?;
        doc.session_open.then(|| MockHandle {
            id: usize::MAX,
            resource_id: key.resource_id.clone(),
            session: true,
        })
    }

    fn identify(&self, handle: &MockHandle) -> Result<ResourceKey, SyncTreeError> {
        self.lookup(&handle.resource_id)?;
        Ok(ResourceKey::new(REGION, PROJECT, handle.resource_id.clone()))
    }

    fn list_references(
        &self,
        handle: &MockHandle,
    ) -> Result<Vec<ReferenceRecord>, SyncTreeError> {
        let doc = self.lookup(&handle.resource_id)?;
        if doc.fail_list {
            return Err(SyncTreeError::host("reference table unavailable"));
        }
        Ok(doc.references.clone())
    }

    fn force_open_closed_partitions(
        &self,
        handle: &MockHandle,
    ) -> Result<PartitionReport, SyncTreeError> {
        let doc = self.lookup(&handle.resource_id)?;
        if doc.fail_partitions {
            return Err(SyncTreeError::host("workset table locked"));
        }
        Ok(doc.partitions)
    }

    fn reloadable_references(
        &self,
        handle: &MockHandle,
    ) -> Result<Vec<ReloadTarget>, SyncTreeError> {
        let doc = self.lookup(&handle.resource_id)?;
        if doc.fail_reload_listing {
            return Err(SyncTreeError::host("link table unavailable"));
        }
        Ok(doc.reloads.clone())
    }

    fn reload_reference(
        &self,
        handle: &MockHandle,
        target: &ReloadTarget,
    ) -> Result<(), SyncTreeError> {
        let doc = self.lookup(&handle.resource_id)?;
        self.log(Call::Reload(doc.name.clone(), target.name.clone()));
        if doc.failing_reloads.contains(&target.name) {
            return Err(SyncTreeError::host(format!("{} is not accessible", target.name)));
        }
        Ok(())
    }

    fn refresh_to_latest(&self, handle: &MockHandle) -> Result<(), SyncTreeError> {
        let doc = self.lookup(&handle.resource_id)?;
        self.log(Call::Refresh(doc.name.clone()));
        if doc.fail_refresh {
            return Err(SyncTreeError::host("central model busy"));
        }
        Ok(())
    }

    fn publish(
        &self,
        handle: &MockHandle,
        _relinquish: &RelinquishOptions,
    ) -> Result<(), SyncTreeError> {
        let doc = self.lookup(&handle.resource_id)?;
        self.log(Call::Publish(doc.name.clone()));
        if doc.fail_publish {
            return Err(SyncTreeError::host("synchronize refused by central model"));
        }
        Ok(())
    }
}
