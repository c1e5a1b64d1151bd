//! The desired resource graph.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::address::ResourceId;
use super::reference::Expr;

/// A declared resource with variables bound and references parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredResource {
    /// Resource identity.
    pub id: ResourceId,
    /// Position in the configuration.
    pub index: usize,
    /// Attribute expressions.
    pub attributes: BTreeMap<String, Expr>,
    /// Resources this one depends on, explicitly or through references.
    pub dependencies: BTreeSet<ResourceId>,
}

/// A declared output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredOutput {
    /// Output expression.
    pub value: Expr,
    /// Human-readable description.
    pub description: Option<String>,
    /// Hide the value in text output.
    pub sensitive: bool,
}

/// Validated, acyclic graph of desired resources.
#[derive(Debug, Clone)]
pub struct DesiredGraph {
    pub(super) resources: Vec<DesiredResource>,
    pub(super) index: HashMap<ResourceId, usize>,
    pub(super) variables: BTreeMap<String, Value>,
    pub(super) outputs: BTreeMap<String, DesiredOutput>,
    pub(super) order: Vec<usize>,
}

impl DesiredGraph {
    /// Resources in declaration order.
    #[must_use]
    pub fn resources(&self) -> &[DesiredResource] {
        &self.resources
    }

    /// Resources in dependency order, ties broken by declaration order.
    pub fn topological_order(&self) -> impl Iterator<Item = &DesiredResource> {
        self.order.iter().map(|&i| &self.resources[i])
    }

    /// Looks up a resource by identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&DesiredResource> {
        self.index.get(id).map(|&i| &self.resources[i])
    }

    /// Returns true if the resource is declared.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Resources that depend directly on `id`, in declaration order.
    #[must_use]
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.resources
            .iter()
            .filter(|r| r.dependencies.contains(id))
            .map(|r| &r.id)
            .collect()
    }

    /// Resolved variable values.
    #[must_use]
    pub const fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    /// Declared outputs.
    #[must_use]
    pub const fn outputs(&self) -> &BTreeMap<String, DesiredOutput> {
        &self.outputs
    }

    /// Number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if no resources are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
