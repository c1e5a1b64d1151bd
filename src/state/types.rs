//! State types for tracking applied resources.
//!
//! These types are the persisted record of what the engine last applied,
//! used by the planner to diff and by the executor to resolve
//! provider-assigned attributes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::StateError;
use crate::graph::ResourceId;
use crate::provider::Attributes;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// Number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// The complete persisted state document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteState {
    /// State format version.
    pub version: String,
    /// Identifier fixed when the state is first created.
    pub lineage: String,
    /// Incremented on every write.
    pub serial: u64,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last applied configuration.
    #[serde(default)]
    pub config_hash: String,
    /// Applied resources keyed by identity.
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, ResourceRecord>,
    /// Output values from the last apply.
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputValue>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// When the state was last written.
    pub last_updated: DateTime<Utc>,
}

/// The last-applied record of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    /// Resource identity.
    pub id: ResourceId,
    /// Attributes last submitted to the provider.
    pub inputs: Attributes,
    /// Attributes returned by the provider, computed fields included.
    pub attributes: Attributes,
    /// Identities this resource depended on when applied.
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

/// A persisted output value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputValue {
    /// The value.
    pub value: Value,
    /// Description from the configuration.
    #[serde(default)]
    pub description: Option<String>,
    /// Hide the value in text output.
    #[serde(default)]
    pub sensitive: bool,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: HistoryOperation,
    /// Configuration hash the run was planned from.
    pub config_hash: String,
    /// Resources acted on.
    pub resources: Vec<String>,
    /// Whether every action completed.
    pub success: bool,
    /// Error message for failed runs.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of recorded runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOperation {
    /// `apply`
    Apply,
    /// `destroy`
    Destroy,
    /// `state rm`
    Forget,
}

impl RemoteState {
    /// Creates an empty state with a fresh lineage.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            lineage: uuid::Uuid::new_v4().to_string(),
            serial: 0,
            project: project.to_string(),
            environment: environment.to_string(),
            config_hash: String::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            history: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Rejects documents written by an incompatible format version.
    ///
    /// # Errors
    ///
    /// Returns `VersionMismatch` if the version differs.
    pub fn check_version(&self) -> Result<(), StateError> {
        if self.version == STATE_VERSION {
            Ok(())
        } else {
            Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: self.version.clone(),
            })
        }
    }

    /// Gets a record by identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceRecord> {
        self.resources.get(id)
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Adds a history entry, dropping the oldest past the limit.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            let excess = self.history.len() + 1 - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(entry);
    }
}

impl ResourceRecord {
    /// Creates a record for a freshly applied resource.
    #[must_use]
    pub fn new(
        id: ResourceId,
        inputs: Attributes,
        attributes: Attributes,
        dependencies: Vec<ResourceId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            inputs,
            attributes,
            dependencies,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the provider-assigned id.
    #[must_use]
    pub fn provider_id(&self) -> Option<&str> {
        self.attributes.get("id").and_then(Value::as_str)
    }

    /// Looks up an attribute, preferring provider-returned values.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).or_else(|| self.inputs.get(name))
    }
}

impl HistoryEntry {
    /// Creates a history entry.
    #[must_use]
    pub fn new(
        operation: HistoryOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: error.is_none(),
            error,
        }
    }
}

impl std::fmt::Display for HistoryOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Forget => "forget",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str) -> ResourceRecord {
        let mut inputs = Attributes::new();
        inputs.insert(String::from("name"), json!(name));
        let mut attributes = inputs.clone();
        attributes.insert(String::from("id"), json!("sg-1"));
        ResourceRecord::new(
            ResourceId::new("aws_security_group", name),
            inputs,
            attributes,
            vec![],
        )
    }

    #[test]
    fn test_state_round_trips_with_string_keys() {
        let mut state = RemoteState::new("web", "dev");
        let rec = record("elb");
        state.resources.insert(rec.id.clone(), rec);

        let json = serde_json::to_value(&state).expect("serialize");
        assert!(json["resources"]["aws_security_group.elb"].is_object());

        let back: RemoteState = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, state);
    }

    #[test]
    fn test_version_check() {
        let mut state = RemoteState::new("web", "dev");
        assert!(state.check_version().is_ok());
        state.version = String::from("0");
        assert!(matches!(
            state.check_version(),
            Err(StateError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_record_lookup() {
        let rec = record("elb");
        assert_eq!(rec.provider_id(), Some("sg-1"));
        assert_eq!(rec.attribute("name"), Some(&json!("elb")));
        assert_eq!(rec.attribute("missing"), None);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = RemoteState::new("web", "dev");
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(HistoryEntry::new(
                HistoryOperation::Apply,
                &format!("hash-{i}"),
                vec![],
                None,
            ));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].config_hash, "hash-5");
    }
}
