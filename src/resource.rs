//! Resource identity.
//!
//! A remote document is addressed by a composite [`ResourceKey`]: a region code plus a
//! collection (project) GUID and a resource (model) GUID. Composition of the key into a concrete
//! remote address belongs to the [`RemoteHost`](crate::host::RemoteHost); everything in this
//! crate treats it as an opaque value.
//!
//! Identity is the `(collection_id, resource_id)` pair. The region is carried as metadata and
//! does not participate in equality or hashing.

use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};
use uuid::Uuid;

use crate::error::SyncTreeError;

/// Composite key of one remote document. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceKey {
    pub region: String,
    pub collection_id: String,
    pub resource_id: String,
}

impl ResourceKey {
    pub fn new(
        region: impl Into<String>,
        collection_id: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        ResourceKey {
            region: region.into(),
            collection_id: collection_id.into(),
            resource_id: resource_id.into(),
        }
    }

    /// Build a key from operator-supplied text, trimming whitespace and rejecting empty or
    /// non-GUID identifiers.
    pub fn parse(
        region: &str,
        collection_id: &str,
        resource_id: &str,
    ) -> Result<Self, SyncTreeError> {
        let key = ResourceKey::new(region.trim(), collection_id.trim(), resource_id.trim());
        key.validate()?;
        Ok(key)
    }

    /// Check that the key is complete and both identifiers are GUID-shaped.
    pub fn validate(&self) -> Result<(), SyncTreeError> {
        if self.region.is_empty() || self.collection_id.is_empty() || self.resource_id.is_empty()
        {
            return Err(SyncTreeError::InvalidKey(
                "region, collection id and resource id are all required".to_string(),
            ));
        }
        Uuid::parse_str(&self.collection_id).map_err(|e| {
            SyncTreeError::InvalidKey(format!("collection id '{}': {e}", self.collection_id))
        })?;
        Uuid::parse_str(&self.resource_id).map_err(|e| {
            SyncTreeError::InvalidKey(format!("resource id '{}': {e}", self.resource_id))
        })?;
        Ok(())
    }

    /// Abbreviated resource id for display when no name is known.
    pub fn short_id(&self) -> String {
        let head: String = self.resource_id.chars().take(8).collect();
        format!("{head}...")
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.collection_id == other.collection_id && self.resource_id == other.resource_id
    }
}

impl Eq for ResourceKey {}

impl Hash for ResourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.collection_id.hash(state);
        self.resource_id.hash(state);
    }
}

impl PartialOrd for ResourceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.collection_id, &self.resource_id).cmp(&(&other.collection_id, &other.resource_id))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.region, self.collection_id, self.resource_id)
    }
}

/// Per-resource metadata collected during discovery.
///
/// Exactly one node exists per distinct resource id within a discovery run. `discovery_error`
/// is set at most once, when the resource could not be opened or scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub name: String,
    pub key: ResourceKey,
    pub discovery_error: Option<String>,
}

impl ResourceNode {
    pub fn new(key: ResourceKey, name: impl Into<String>) -> Self {
        ResourceNode {
            name: name.into(),
            key,
            discovery_error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.discovery_error.is_some()
    }
}

/// Partition (workset) behavior when opening a resource for synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorksetMode {
    #[default]
    OpenAll,
    CloseAll,
}

impl WorksetMode {
    pub fn from_open_all(open_all: bool) -> Self {
        if open_all {
            WorksetMode::OpenAll
        } else {
            WorksetMode::CloseAll
        }
    }
}
