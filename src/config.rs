//! TOML run configuration.
//!
//! ```toml
//! [stages]
//! reload_links = true
//! link_delay_secs = 3.0
//!
//! [root]
//! name = "BMR-ARC-00-XX-M3-BM-9100"
//! region = "EMEA"
//! collection_id = "50f7a824-a024-4dfa-8645-b3993dc8f535"
//! resource_id = "0c7f141c-4f90-48e3-9f84-ad62707b9549"
//!
//! [[manifest]]
//! name = "BMR-ARC-00-XX-M3-BM-9101"
//! region = "EMEA"
//! collection_id = "50f7a824-a024-4dfa-8645-b3993dc8f535"
//! resource_id = "e6754ac5-caf0-4050-b2b8-fa92f2ffcb31"
//! ```
//!
//! `[root]` seeds discovery; `[[manifest]]` is a fixed, already-ordered list synchronized as
//! given. Missing `[stages]` keys take their defaults.

use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::Path,
};

use crate::{
    discovery::DEFAULT_ROOT_NAME, error::SyncTreeError, pipeline::StageOptions,
    resource::ResourceKey,
};

/// A named document address as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub name: String,
    pub region: String,
    pub collection_id: String,
    pub resource_id: String,
}

impl ManifestEntry {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            self.region.trim(),
            self.collection_id.trim(),
            self.resource_id.trim(),
        )
    }

    /// Configured name, falling back to `fallback` when blank.
    pub fn display_name(&self, fallback: &str) -> String {
        let name = self.name.trim();
        if name.is_empty() {
            fallback.to_string()
        } else {
            name.to_string()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncTreeConfig {
    #[serde(default)]
    pub stages: StageOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifest: Vec<ManifestEntry>,
}

impl SyncTreeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, SyncTreeError> {
        let config: SyncTreeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SyncTreeError> {
        tracing::debug!("Reading sync configuration from {:?}", path.as_ref());
        let content = read_to_string(path)?;
        SyncTreeConfig::from_toml_str(&content)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SyncTreeError> {
        tracing::debug!("Writing sync configuration to {:?}", path.as_ref());
        write(path, toml::to_string(self)?)?;
        Ok(())
    }

    /// Reject configuration that would make a run fail before it starts.
    pub fn validate(&self) -> Result<(), SyncTreeError> {
        self.stages.validate()?;
        if let Some(root) = &self.root {
            root.key()
                .validate()
                .map_err(|e| SyncTreeError::Config(format!("[root]: {}", e.message())))?;
        }
        for (i, entry) in self.manifest.iter().enumerate() {
            entry.key().validate().map_err(|e| {
                SyncTreeError::Config(format!(
                    "[[manifest]] entry {} ({}): {}",
                    i + 1,
                    entry.display_name("unnamed"),
                    e.message()
                ))
            })?;
        }
        Ok(())
    }

    /// Root key and display name, if configured.
    pub fn root_key(&self) -> Option<(ResourceKey, String)> {
        self.root
            .as_ref()
            .map(|r| (r.key(), r.display_name(DEFAULT_ROOT_NAME)))
    }

    /// Manifest as `(key, name)` pairs, in configured order.
    pub fn manifest_targets(&self) -> Vec<(ResourceKey, String)> {
        self.manifest
            .iter()
            .map(|e| {
                let key = e.key();
                let name = e.display_name(&key.short_id());
                (key, name)
            })
            .collect()
    }
}
