//! Plan execution.
//!
//! The executor walks a [`Plan`] and applies each action through the
//! provider. Actions whose dependencies have all completed run concurrently
//! on a `JoinSet`, up to the configured limit. The first failure stops
//! scheduling; actions already in flight are allowed to finish.

mod retry;
mod runner;

pub use retry::{RetryError, RetryPolicy};
pub(crate) use runner::evaluate_against_state;

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::ExecutorConfig;
use crate::error::{ExecutionError, HalyardError, Result};
use crate::graph::{DesiredGraph, ResourceId};
use crate::planner::{ActionKind, Plan};
use crate::provider::Provider;
use crate::state::StateHandle;

use runner::ActionRunner;

/// Default number of actions in flight.
const DEFAULT_CONCURRENCY: usize = 10;

/// Executor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Maximum number of actions in flight.
    pub concurrency: usize,
    /// Retry policy for provider calls.
    pub retry: RetryPolicy,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&ExecutorConfig> for ExecutorOptions {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            retry: RetryPolicy::from(config),
        }
    }
}

/// Stops the executor from starting new actions.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    /// Creates a handle that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reference to an action in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRef {
    /// Index in the plan.
    pub index: usize,
    /// Action kind.
    pub kind: ActionKind,
    /// Resource acted on.
    pub resource: ResourceId,
}

/// A completed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResult {
    /// The action.
    #[serde(flatten)]
    pub action: ActionRef,
    /// Provider attempts made, retries included.
    pub attempts: u32,
}

/// The action that stopped the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedAction {
    /// The action.
    #[serde(flatten)]
    pub action: ActionRef,
    /// Error message.
    pub error: String,
}

/// Outcome of executing a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Completed actions, in plan order.
    pub completed: Vec<ActionResult>,
    /// Failed actions. Several may fail when they were already in flight.
    pub failed: Vec<FailedAction>,
    /// Actions never started.
    pub not_started: Vec<ActionRef>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Number of planned actions.
    pub total: usize,
}

impl ApplyReport {
    /// Returns true if every planned action completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.completed.len() == self.total
    }

    /// The error describing an incomplete run, if any.
    #[must_use]
    pub fn incomplete(&self) -> Option<ExecutionError> {
        (!self.is_success()).then(|| ExecutionError::Incomplete {
            completed: self.completed.len(),
            total: self.total,
        })
    }

    /// Highest attempt count of any completed action.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.completed.iter().map(|r| r.attempts).max().unwrap_or(0)
    }
}

/// Applies plans through a provider.
pub struct Executor {
    provider: Arc<dyn Provider>,
    state: Arc<StateHandle>,
    options: ExecutorOptions,
    cancel: CancellationHandle,
}

impl Executor {
    /// Creates an executor.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, state: Arc<StateHandle>, options: ExecutorOptions) -> Self {
        Self {
            provider,
            state,
            options,
            cancel: CancellationHandle::new(),
        }
    }

    /// Uses an externally controlled cancellation handle.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Executes `plan`. Creates, updates and replaces take their attributes
    /// from `graph`; a destroy plan needs none.
    ///
    /// Action failures are reported in the [`ApplyReport`], not as errors.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::OrderingViolation` if an action depends on
    /// one that does not come before it. Nothing is applied in that case.
    pub async fn execute(&self, plan: &Plan, graph: Option<&DesiredGraph>) -> Result<ApplyReport> {
        if let Some((index, dependency)) = plan.ordering_violation() {
            return Err(ExecutionError::OrderingViolation {
                resource: plan.actions[index].resource.to_string(),
                dependency: plan
                    .actions
                    .get(dependency)
                    .map_or_else(|| format!("action #{dependency}"), |a| a.resource.to_string()),
            }
            .into());
        }

        let total = plan.len();
        info!(
            "Executing {total} actions (concurrency {})",
            self.options.concurrency
        );

        let runner = Arc::new(ActionRunner {
            provider: Arc::clone(&self.provider),
            state: Arc::clone(&self.state),
            retry: self.options.retry,
        });

        let mut report = ApplyReport {
            total,
            ..ApplyReport::default()
        };
        let mut pending: BTreeSet<usize> = (0..total).collect();
        let mut done: HashSet<usize> = HashSet::with_capacity(total);
        let mut running: JoinSet<(usize, Result<u32>)> = JoinSet::new();
        let mut task_index: HashMap<tokio::task::Id, usize> = HashMap::new();
        let limit = self.options.concurrency.max(1);

        loop {
            if self.cancel.is_cancelled() && !report.cancelled {
                warn!("Cancellation requested, waiting for {} in-flight actions", running.len());
                report.cancelled = true;
            }

            if report.failed.is_empty() && !report.cancelled {
                let ready: Vec<usize> = pending
                    .iter()
                    .copied()
                    .filter(|&i| plan.actions[i].dependencies.iter().all(|d| done.contains(d)))
                    .take(limit.saturating_sub(running.len()))
                    .collect();

                for i in ready {
                    pending.remove(&i);
                    let action = plan.actions[i].clone();
                    let desired = graph.and_then(|g| g.get(&action.resource)).cloned();
                    let runner = Arc::clone(&runner);
                    let handle = running.spawn(async move {
                        (i, runner.run(&action, desired.as_ref()).await)
                    });
                    task_index.insert(handle.id(), i);
                }
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };

            match joined {
                Ok((_, (i, Ok(attempts)))) => {
                    done.insert(i);
                    report.completed.push(ActionResult {
                        action: action_ref(plan, i),
                        attempts,
                    });
                }
                Ok((_, (i, Err(e)))) => {
                    error!("{} failed: {e}", plan.actions[i]);
                    report.failed.push(FailedAction {
                        action: action_ref(plan, i),
                        error: e.to_string(),
                    });
                }
                Err(join_error) => {
                    let i = planned_index(&task_index, join_error.id())?;
                    error!("{} aborted: {join_error}", plan.actions[i]);
                    report.failed.push(FailedAction {
                        action: action_ref(plan, i),
                        error: join_error.to_string(),
                    });
                }
            }
        }

        report.completed.sort_by_key(|r| r.action.index);
        report.failed.sort_by_key(|f| f.action.index);
        report.not_started = pending.into_iter().map(|i| action_ref(plan, i)).collect();

        if report.is_success() {
            info!("Applied {total} actions");
        } else {
            warn!(
                "Apply stopped: {} completed, {} failed, {} not started",
                report.completed.len(),
                report.failed.len(),
                report.not_started.len()
            );
        }
        Ok(report)
    }
}

/// Plan index of a spawned action task.
fn planned_index(task_index: &HashMap<tokio::task::Id, usize>, id: tokio::task::Id) -> Result<usize> {
    task_index.get(&id).copied().ok_or_else(|| {
        HalyardError::internal(format!("task {id} does not belong to any planned action"))
    })
}

fn action_ref(plan: &Plan, index: usize) -> ActionRef {
    let action = &plan.actions[index];
    ActionRef {
        index,
        kind: action.kind,
        resource: action.resource.clone(),
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("options", &self.options)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::ProviderError;
    use crate::graph::GraphBuilder;
    use crate::planner::{PlannedAction, Planner};
    use crate::provider::{MockProvider, SchemaCatalog};
    use crate::state::{LocalStateStore, StateStore};
    use mockall::Sequence;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    const ONE_GROUP: &str = r#"
project:
  name: web
resources:
  - type: aws_security_group
    name: elb
    attributes:
      name: web-elb-sg
"#;

    fn graph(yaml: &str) -> DesiredGraph {
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("parse");
        GraphBuilder::new(&SchemaCatalog::builtin())
            .build(&config, &BTreeMap::new())
            .expect("graph")
    }

    async fn state(dir: &TempDir) -> Arc<StateHandle> {
        let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::with_base_dir(dir.path()));
        Arc::new(StateHandle::open(store, "web", "dev").await.expect("open"))
    }

    fn fast_options(max_attempts: u32) -> ExecutorOptions {
        ExecutorOptions {
            concurrency: 4,
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let mut provider = MockProvider::new();
        let mut seq = Sequence::new();
        provider
            .expect_create()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ProviderError::RateLimited { retry_after_secs: 0 }));
        provider
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, attributes| {
                let mut created = attributes.clone();
                created.insert(String::from("id"), json!("sg-0001"));
                Ok(created)
            });

        let dir = TempDir::new().expect("temp dir");
        let state = state(&dir).await;
        let graph = graph(ONE_GROUP);
        let catalog = SchemaCatalog::builtin();
        let plan = Planner::new(&catalog)
            .plan(&graph, &state.read().await)
            .expect("plan");

        let report = Executor::new(Arc::new(provider), Arc::clone(&state), fast_options(5))
            .execute(&plan, Some(&graph))
            .await
            .expect("execute");

        assert!(report.is_success());
        assert_eq!(report.completed[0].attempts, 3);
        let recorded = state.read().await;
        let record = recorded
            .get(&ResourceId::new("aws_security_group", "elb"))
            .expect("recorded");
        assert_eq!(record.provider_id(), Some("sg-0001"));
    }

    #[tokio::test]
    async fn test_permanent_error_stops_the_plan() {
        let mut provider = MockProvider::new();
        provider
            .expect_create()
            .times(1)
            .returning(|_, _| Err(ProviderError::rejected(400, "InvalidGroup.Duplicate")));

        let dir = TempDir::new().expect("temp dir");
        let state = state(&dir).await;
        let graph = graph(
            r#"
project:
  name: web
resources:
  - type: aws_security_group
    name: elb
    attributes:
      name: web-elb-sg
  - type: aws_elb
    name: example
    attributes:
      name: web-elb
      security_groups: ["${aws_security_group.elb.id}"]
"#,
        );
        let catalog = SchemaCatalog::builtin();
        let plan = Planner::new(&catalog)
            .plan(&graph, &state.read().await)
            .expect("plan");

        let report = Executor::new(Arc::new(provider), Arc::clone(&state), fast_options(5))
            .execute(&plan, Some(&graph))
            .await
            .expect("execute");

        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.contains("InvalidGroup.Duplicate"));
        assert_eq!(report.not_started.len(), 1);
        assert_eq!(report.not_started[0].resource, ResourceId::new("aws_elb", "example"));
        assert!(state.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_plan_is_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let state = state(&dir).await;
        let plan = Plan {
            actions: vec![PlannedAction {
                kind: ActionKind::Delete,
                resource: ResourceId::new("aws_security_group", "elb"),
                changes: vec![],
                dependencies: vec![0],
            }],
        };

        let err = Executor::new(Arc::new(MockProvider::new()), state, fast_options(1))
            .execute(&plan, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::HalyardError::Execution(ExecutionError::OrderingViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_executor_starts_nothing() {
        let dir = TempDir::new().expect("temp dir");
        let state = state(&dir).await;
        let graph = graph(ONE_GROUP);
        let catalog = SchemaCatalog::builtin();
        let plan = Planner::new(&catalog)
            .plan(&graph, &state.read().await)
            .expect("plan");

        let cancel = CancellationHandle::new();
        cancel.cancel();
        let report = Executor::new(Arc::new(MockProvider::new()), state, fast_options(1))
            .with_cancellation(cancel)
            .execute(&plan, Some(&graph))
            .await
            .expect("execute");

        assert!(report.cancelled);
        assert_eq!(report.not_started.len(), 1);
        assert_eq!(
            report.incomplete().map(|e| e.to_string()),
            Some(String::from("Apply incomplete: 0 of 1 actions completed"))
        );
    }

    #[tokio::test]
    async fn test_unknown_task_is_an_internal_error() {
        let mut tasks = JoinSet::new();
        let known = tasks.spawn(async {}).id();
        let unknown = tasks.spawn(async {}).id();
        let task_index = HashMap::from([(known, 3)]);

        assert_eq!(planned_index(&task_index, known).expect("known task"), 3);
        let err = planned_index(&task_index, unknown).unwrap_err();
        assert!(matches!(err, HalyardError::Internal(ref m) if m.contains("does not belong")));
    }
}
