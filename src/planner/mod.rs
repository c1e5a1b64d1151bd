//! Planning module for provisioning runs.
//!
//! This module compares the desired graph against the recorded state and
//! produces an ordered [`Plan`]. Planning does no I/O: the same graph and
//! state always yield the same plan.

mod diff;
mod order;
mod plan;

pub use diff::{DiffEngine, DiffKind, ResourceDiff};
pub use plan::{ActionKind, AttributeChange, Plan, PlannedAction, PlannedValue};

use tracing::info;

use crate::error::PlanError;
use crate::graph::DesiredGraph;
use crate::provider::SchemaCatalog;
use crate::state::RemoteState;

/// Builds plans from a desired graph and recorded state.
#[derive(Debug)]
pub struct Planner<'a> {
    catalog: &'a SchemaCatalog,
}

impl<'a> Planner<'a> {
    /// Creates a planner over a schema catalog.
    #[must_use]
    pub const fn new(catalog: &'a SchemaCatalog) -> Self {
        Self { catalog }
    }

    /// Plans the actions reconciling `state` with `graph`.
    ///
    /// # Errors
    ///
    /// Returns a `PlanError` for unique-attribute conflicts, unresolvable
    /// references, or an action ordering that cannot be satisfied.
    pub fn plan(&self, graph: &DesiredGraph, state: &RemoteState) -> Result<Plan, PlanError> {
        let diffs = DiffEngine::new(self.catalog).diff(graph, state)?;
        let actions = order::sequence(diffs, Some(graph), state)?;
        let plan = Plan { actions };
        info!("Plan: {}", plan.summary());
        Ok(plan)
    }

    /// Plans deletes for every recorded resource, dependents first.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::DependencyResolutionFailed` if the recorded
    /// dependencies are circular.
    pub fn plan_destroy(&self, state: &RemoteState) -> Result<Plan, PlanError> {
        let diffs = state
            .resources
            .keys()
            .map(|id| ResourceDiff {
                id: id.clone(),
                kind: DiffKind::Delete,
                changes: vec![],
            })
            .collect();
        let actions = order::sequence(diffs, None, state)?;
        let plan = Plan { actions };
        info!("Destroy plan: {}", plan.summary());
        Ok(plan)
    }
}
