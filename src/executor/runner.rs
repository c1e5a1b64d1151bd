//! Runs a single planned action against the provider and records the result.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ExecutionError, HalyardError, ProviderError, Result, StateError};
use crate::graph::{DesiredResource, Expr, Reference, Resolved};
use crate::planner::{ActionKind, PlannedAction};
use crate::provider::{Attributes, Provider};
use crate::state::{RemoteState, ResourceRecord, StateHandle};

use super::retry::RetryPolicy;

/// Everything a spawned action needs.
pub(super) struct ActionRunner {
    pub(super) provider: Arc<dyn Provider>,
    pub(super) state: Arc<StateHandle>,
    pub(super) retry: RetryPolicy,
}

impl ActionRunner {
    /// Runs one action and returns the number of provider attempts made.
    pub(super) async fn run(
        &self,
        action: &PlannedAction,
        desired: Option<&DesiredResource>,
    ) -> Result<u32> {
        let _guard = self.state.lock_resource(&action.resource).await;
        info!("Applying: {action}");

        match action.kind {
            ActionKind::Create => self.create(action, required(action, desired)?).await,
            ActionKind::Update => self.update(action, required(action, desired)?).await,
            ActionKind::Replace => {
                let deleted = self.delete(action).await?;
                let created = self.create(action, required(action, desired)?).await?;
                Ok(deleted + created)
            }
            ActionKind::Delete => self.delete(action).await,
        }
    }

    async fn create(&self, action: &PlannedAction, desired: &DesiredResource) -> Result<u32> {
        let id = &action.resource;
        let inputs = resolve_inputs(desired, &self.state.read().await)?;

        let (attributes, attempts) = self
            .call(action, || self.provider.create(&id.resource_type, &inputs))
            .await?;
        debug!(
            "{id}: created as {}",
            attributes.get("id").and_then(|v| v.as_str()).unwrap_or("?")
        );

        self.record(desired, inputs, attributes).await?;
        Ok(attempts)
    }

    async fn update(&self, action: &PlannedAction, desired: &DesiredResource) -> Result<u32> {
        let id = &action.resource;
        let snapshot = self.state.read().await;
        let provider_id = snapshot
            .get(id)
            .and_then(ResourceRecord::provider_id)
            .ok_or_else(|| StateError::UnknownResource { id: id.to_string() })?
            .to_string();
        let inputs = resolve_inputs(desired, &snapshot)?;

        let (attributes, attempts) = self
            .call(action, || {
                self.provider
                    .update(&id.resource_type, &provider_id, &inputs)
            })
            .await?;

        self.record(desired, inputs, attributes).await?;
        Ok(attempts)
    }

    /// Deletes the recorded resource. A resource already gone counts as deleted.
    async fn delete(&self, action: &PlannedAction) -> Result<u32> {
        let id = &action.resource;
        let Some(record) = self.state.read().await.get(id).cloned() else {
            warn!("{id}: not in state, nothing to delete");
            return Ok(0);
        };

        let mut attempts = 0;
        if let Some(provider_id) = record.provider_id() {
            match self
                .call(action, || self.provider.delete(&id.resource_type, provider_id))
                .await
            {
                Ok(((), made)) => attempts = made,
                Err(HalyardError::Execution(ExecutionError::ActionFailed {
                    source: ProviderError::NotFound { .. },
                    ..
                })) => {
                    warn!("{id}: already gone on the provider side");
                    attempts = 1;
                }
                Err(e) => return Err(e),
            }
        } else {
            warn!("{id}: recorded without a provider id, forgetting it");
        }

        self.state.remove(id).await?;
        Ok(attempts)
    }

    async fn record(
        &self,
        desired: &DesiredResource,
        inputs: Attributes,
        attributes: Attributes,
    ) -> Result<()> {
        let dependencies = desired.dependencies.iter().cloned().collect();
        self.state
            .write(ResourceRecord::new(
                desired.id.clone(),
                inputs,
                attributes,
                dependencies,
            ))
            .await
    }

    async fn call<T, F, Fut>(&self, action: &PlannedAction, call: F) -> Result<(T, u32)>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, ProviderError>>,
    {
        let resource = action.resource.to_string();
        self.retry
            .run(&resource, call)
            .await
            .map_err(|e| e.into_execution_error(&action.kind.to_string(), &resource).into())
    }
}

fn required<'a>(
    action: &PlannedAction,
    desired: Option<&'a DesiredResource>,
) -> Result<&'a DesiredResource> {
    desired.ok_or_else(|| {
        HalyardError::internal(format!(
            "{} {} has no desired configuration",
            action.kind, action.resource
        ))
    })
}

/// Evaluates attributes against recorded state, which by now holds every
/// provider-assigned value the resource references.
fn resolve_inputs(
    desired: &DesiredResource,
    state: &RemoteState,
) -> std::result::Result<Attributes, ExecutionError> {
    let holder = desired.id.to_string();
    desired
        .attributes
        .iter()
        .map(|(name, expr)| {
            evaluate_against_state(&holder, expr, state).map(|value| (name.clone(), value))
        })
        .collect()
}

/// Evaluates `expr` with every reference read from recorded state.
///
/// `holder` names the resource or output the expression belongs to.
pub(crate) fn evaluate_against_state(
    holder: &str,
    expr: &Expr,
    state: &RemoteState,
) -> std::result::Result<Value, ExecutionError> {
    let unresolved = |reference: String| ExecutionError::UnresolvedAtApply {
        resource: holder.to_string(),
        reference,
    };
    let resolved = expr.evaluate(&mut |reference: &Reference| {
        let value = match reference {
            Reference::Attribute { target, attribute } => {
                state.get(target).and_then(|r| r.attribute(attribute))
            }
            Reference::Variable(_) => None,
        };
        value
            .map(|v| Resolved::Known(v.clone()))
            .ok_or_else(|| unresolved(reference.to_string()))
    })?;
    match resolved {
        Resolved::Known(value) => Ok(value),
        Resolved::Unknown => Err(unresolved(
            expr.references()
                .first()
                .map_or_else(String::new, ToString::to_string),
        )),
    }
}
