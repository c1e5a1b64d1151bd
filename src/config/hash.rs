//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of configuration structures
//! so plans and state history can be tied to the exact config they came from.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::spec::{DeployConfig, ResourceConfig};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire deployment configuration.
    ///
    /// This hash changes when any part of the configuration changes.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.environment.as_bytes());

        // BTreeMap iteration is already sorted
        for (name, variable) in &config.variables {
            hasher.update(name.as_bytes());
            hasher.update(variable.var_type.to_string().as_bytes());
            if let Some(default) = &variable.default {
                hasher.update(canonical(default).as_bytes());
            }
        }

        for resource in &config.resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        for (name, output) in &config.outputs {
            hasher.update(name.as_bytes());
            hasher.update(canonical(&output.value).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource declaration.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.resource_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(resource.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.hash_attributes(&resource.attributes).as_bytes());

        let mut deps: Vec<_> = resource.depends_on.iter().collect();
        deps.sort_unstable();
        for dep in deps {
            hasher.update(dep.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash of an attribute map.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &BTreeMap<String, Value>) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in attributes {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(canonical(value).as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

/// Serializes a value with object keys in sorted order.
fn canonical(value: &Value) -> String {
    // serde_json::Map is BTreeMap-backed without `preserve_order`
    serde_json::to_string(value).unwrap_or_default()
}
