//! Plan types.
//!
//! A [`Plan`] is an ordered list of actions. Every action lists the indices
//! of earlier actions that must complete before it may start.

use serde::Serialize;
use serde_json::Value;

use crate::graph::ResourceId;

/// An ordered set of actions reconciling desired and recorded state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Actions in execution order.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedAction {
    /// What to do.
    pub kind: ActionKind,
    /// Resource acted on.
    pub resource: ResourceId,
    /// Attribute changes driving the action.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<AttributeChange>,
    /// Indices of actions that must complete first.
    pub dependencies: Vec<usize>,
}

/// Kinds of planned actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Create a resource absent from state.
    Create,
    /// Update mutable attributes in place.
    Update,
    /// Delete, then create again.
    Replace,
    /// Delete a resource no longer declared.
    Delete,
}

/// A single attribute difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeChange {
    /// Attribute name.
    pub attribute: String,
    /// Recorded value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    /// Planned value.
    pub after: PlannedValue,
    /// Whether this change alone forces replacement.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub forces_replacement: bool,
}

/// The planned value of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum PlannedValue {
    /// Known at plan time.
    Known(Value),
    /// Known only after apply.
    Unknown,
    /// Removed from the configuration.
    Removed,
}

impl Plan {
    /// Returns true if the plan has no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Counts actions of one kind.
    #[must_use]
    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    /// Finds the action for a resource.
    #[must_use]
    pub fn action_for(&self, resource: &ResourceId) -> Option<(usize, &PlannedAction)> {
        self.actions
            .iter()
            .enumerate()
            .find(|(_, a)| &a.resource == resource)
    }

    /// One-line summary, e.g. `2 to create, 0 to update, 0 to replace, 1 to delete`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} to replace, {} to delete",
            self.count(ActionKind::Create),
            self.count(ActionKind::Update),
            self.count(ActionKind::Replace),
            self.count(ActionKind::Delete),
        )
    }

    /// Checks that every action only depends on earlier actions.
    ///
    /// Returns the first offending `(action, dependency)` pair.
    #[must_use]
    pub fn ordering_violation(&self) -> Option<(usize, usize)> {
        self.actions.iter().enumerate().find_map(|(i, action)| {
            action
                .dependencies
                .iter()
                .find(|&&dep| dep >= i)
                .map(|&dep| (i, dep))
        })
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(value) => write!(f, "{value}"),
            Self::Unknown => write!(f, "(known after apply)"),
            Self::Removed => write!(f, "(removed)"),
        }
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.resource)?;
        let forcing: Vec<&str> = self
            .changes
            .iter()
            .filter(|c| c.forces_replacement)
            .map(|c| c.attribute.as_str())
            .collect();
        if self.kind == ActionKind::Replace && !forcing.is_empty() {
            write!(f, " (forced by {})", forcing.join(", "))?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }
        write!(f, "{}", self.summary())
    }
}
