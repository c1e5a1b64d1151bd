//! Reconciler tying the engine together.
//!
//! This module drives one run: it builds the desired graph from the
//! configuration, plans against the recorded state, and executes the plan
//! under the global state lock. It also records outputs and history, and
//! checks recorded resources for drift without changing anything.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ConfigHasher, DeployConfig};
use crate::error::{ExecutionError, ProviderError, Result, StateError};
use crate::executor::{
    ApplyReport, CancellationHandle, Executor, ExecutorOptions, evaluate_against_state,
};
use crate::graph::{DesiredGraph, GraphBuilder, ResourceId};
use crate::planner::{Plan, Planner};
use crate::provider::{Attributes, Provider, SchemaCatalog};
use crate::state::{
    HistoryEntry, HistoryOperation, LOCK_RENEW_INTERVAL, OutputValue, RemoteState,
    ResourceRecord, StateHandle, StateStore,
};

/// Reconciles a configuration against a provider and a state store.
pub struct Reconciler {
    /// Configuration.
    config: DeployConfig,
    /// Resource types and their attribute semantics.
    catalog: SchemaCatalog,
    /// Provider all changes go through.
    provider: Arc<dyn Provider>,
    /// State backend.
    store: Arc<dyn StateStore>,
    /// Variable values from the command line or environment.
    overrides: BTreeMap<String, Value>,
    /// Executor tuning.
    options: ExecutorOptions,
    /// Stops scheduling new actions when triggered.
    cancel: CancellationHandle,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// How often the global lock is renewed while an operation runs.
    lock_renewal: Duration,
}

/// Result of an `apply` or `destroy` run.
#[derive(Debug, Serialize)]
pub struct ApplyOutcome {
    /// The plan that was executed.
    pub plan: Plan,
    /// What the executor did with it.
    pub report: ApplyReport,
    /// Outputs recorded after the run. Empty when the run failed.
    pub outputs: BTreeMap<String, OutputValue>,
}

impl ApplyOutcome {
    /// Returns true if every planned action completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }
}

/// How a recorded resource differs from what the provider reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Drift {
    /// The provider no longer has the resource.
    Deleted,
    /// Attributes changed outside the engine.
    Modified {
        /// Changed attributes.
        changes: Vec<AttributeDrift>,
    },
}

/// One attribute whose observed value differs from the recorded one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeDrift {
    /// Attribute name.
    pub attribute: String,
    /// Value recorded at the last apply.
    pub recorded: Value,
    /// Value the provider reports, `None` if the attribute is gone.
    pub observed: Option<Value>,
}

/// A drifted resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDrift {
    /// Resource identity.
    pub resource: ResourceId,
    /// What changed.
    #[serde(flatten)]
    pub drift: Drift,
}

/// Report of drift detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// Drifted resources, by identity.
    pub drifted: Vec<ResourceDrift>,
    /// Number of recorded resources checked.
    pub checked: usize,
    /// Recorded resources skipped because they carry no provider id.
    pub skipped: Vec<ResourceId>,
}

impl DriftReport {
    /// Returns true if any resource drifted.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        !self.drifted.is_empty()
    }

    /// Returns true if the provider matches the recorded state.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        !self.has_drift()
    }
}

impl Reconciler {
    /// Creates a reconciler using the built-in schema catalog.
    #[must_use]
    pub fn new(
        config: DeployConfig,
        provider: Arc<dyn Provider>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let options = ExecutorOptions::from(&config.executor);
        Self {
            config,
            catalog: SchemaCatalog::builtin(),
            provider,
            store,
            overrides: BTreeMap::new(),
            options,
            cancel: CancellationHandle::new(),
            hasher: ConfigHasher::new(),
            lock_renewal: LOCK_RENEW_INTERVAL,
        }
    }

    /// Uses a custom schema catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: SchemaCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets variable overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: BTreeMap<String, Value>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Overrides the executor options taken from the configuration.
    #[must_use]
    pub const fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets how often the global lock is renewed during long operations.
    #[must_use]
    pub const fn with_lock_renewal(mut self, every: Duration) -> Self {
        self.lock_renewal = every;
        self
    }

    /// Uses an externally controlled cancellation handle.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Builds and validates the desired graph.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for the first problem in the configuration.
    pub fn build_graph(&self) -> Result<DesiredGraph> {
        Ok(GraphBuilder::new(&self.catalog).build(&self.config, &self.overrides)?)
    }

    /// Loads the recorded state, or an empty one if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored document cannot be read.
    pub async fn load_state(&self) -> Result<RemoteState> {
        Ok(self.store.load().await?.unwrap_or_else(|| {
            RemoteState::new(&self.config.project.name, &self.config.project.environment)
        }))
    }

    /// Plans without applying. Takes no lock and calls no provider.
    ///
    /// # Errors
    ///
    /// Returns validation and plan errors, or a state read error.
    pub async fn plan(&self) -> Result<Plan> {
        let graph = self.build_graph()?;
        let state = self.load_state().await?;
        Ok(Planner::new(&self.catalog).plan(&graph, &state)?)
    }

    /// Plans and applies under the global state lock.
    ///
    /// The graph is validated before the lock is taken, so configuration
    /// errors never reach the state or the provider. Action failures come
    /// back in the outcome's report.
    ///
    /// # Errors
    ///
    /// Returns validation, plan, lock and state errors.
    pub async fn apply(&self) -> Result<ApplyOutcome> {
        let graph = self.build_graph()?;
        self.locked("apply", self.apply_graph(&graph)).await
    }

    /// Deletes every recorded resource under the global state lock.
    ///
    /// # Errors
    ///
    /// Returns plan, lock and state errors.
    pub async fn destroy(&self) -> Result<ApplyOutcome> {
        self.locked("destroy", self.destroy_recorded()).await
    }

    /// Removes a resource from state without touching the provider.
    ///
    /// # Errors
    ///
    /// Returns `StateError::UnknownResource` if nothing is recorded for `id`.
    pub async fn forget(&self, id: &ResourceId) -> Result<ResourceRecord> {
        self.locked("state rm", async {
            let state = self.open_state().await?;
            let record = state
                .remove(id)
                .await?
                .ok_or_else(|| StateError::UnknownResource { id: id.to_string() })?;
            let hash = self.hasher.hash_config(&self.config);
            let forgotten = vec![id.to_string()];
            state
                .update("history", move |doc| {
                    doc.add_history(HistoryEntry::new(
                        HistoryOperation::Forget,
                        &hash,
                        forgotten,
                        None,
                    ));
                })
                .await?;
            info!("Forgot {id}");
            Ok(record)
        })
        .await
    }

    /// Outputs recorded by the last successful apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored document cannot be read.
    pub async fn outputs(&self) -> Result<BTreeMap<String, OutputValue>> {
        Ok(self.load_state().await?.outputs)
    }

    /// Reads every recorded resource from the provider and reports
    /// attributes that changed outside the engine. Never writes.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails for any reason other than the
    /// resource being gone.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!(
            "Checking for drift in {}/{}",
            self.config.project.name, self.config.project.environment
        );

        let state = self.load_state().await?;
        let mut report = DriftReport::default();

        for (id, record) in &state.resources {
            let Some(provider_id) = record.provider_id() else {
                warn!("{id}: recorded without a provider id, skipping");
                report.skipped.push(id.clone());
                continue;
            };
            report.checked += 1;

            let label = id.to_string();
            let observed = self
                .options
                .retry
                .run(&label, || self.provider.read(&id.resource_type, provider_id))
                .await;

            let drift = match observed {
                Ok((observed, _)) => compare_attributes(record, &observed),
                Err(e) => match e.into_execution_error("read", &label) {
                    ExecutionError::ActionFailed {
                        source: ProviderError::NotFound { .. },
                        ..
                    } => Some(Drift::Deleted),
                    other => return Err(other.into()),
                },
            };

            if let Some(drift) = drift {
                debug!("{id}: drifted");
                report.drifted.push(ResourceDrift {
                    resource: id.clone(),
                    drift,
                });
            }
        }

        info!(
            "Drift check: {} of {} resources drifted",
            report.drifted.len(),
            report.checked
        );
        Ok(report)
    }

    async fn open_state(&self) -> Result<Arc<StateHandle>> {
        let handle = StateHandle::open(
            Arc::clone(&self.store),
            &self.config.project.name,
            &self.config.project.environment,
        )
        .await?;
        Ok(Arc::new(handle))
    }

    fn executor(&self, state: &Arc<StateHandle>) -> Executor {
        Executor::new(Arc::clone(&self.provider), Arc::clone(state), self.options)
            .with_cancellation(self.cancel.clone())
    }

    /// Runs `work` holding the global lock and releases it on every path.
    async fn locked<T>(&self, operation: &str, work: impl Future<Output = Result<T>>) -> Result<T> {
        let lock = self.store.acquire_lock("", operation).await?;

        // Keep the lock alive past its expiry while the work runs.
        tokio::pin!(work);
        let start = tokio::time::Instant::now() + self.lock_renewal;
        let mut renewal = tokio::time::interval_at(start, self.lock_renewal);
        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                _ = renewal.tick() => {
                    if let Err(e) = self.store.renew_lock(&lock).await {
                        warn!("Failed to renew state lock {}: {e}", lock.lock_id);
                    }
                }
            }
        };

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }
        result
    }

    async fn apply_graph(&self, graph: &DesiredGraph) -> Result<ApplyOutcome> {
        info!(
            "Applying {}/{}",
            self.config.project.name, self.config.project.environment
        );

        let state = self.open_state().await?;
        let plan = Planner::new(&self.catalog).plan(graph, &state.read().await)?;
        let report = self.executor(&state).execute(&plan, Some(graph)).await?;
        let hash = self.hasher.hash_config(&self.config);
        let touched = touched_resources(&report);

        if let Some(incomplete) = report.incomplete() {
            let message = failure_message(&report, &incomplete);
            state
                .update("history", move |doc| {
                    doc.add_history(HistoryEntry::new(
                        HistoryOperation::Apply,
                        &hash,
                        touched,
                        Some(message),
                    ));
                })
                .await?;
            return Ok(ApplyOutcome {
                plan,
                report,
                outputs: BTreeMap::new(),
            });
        }

        let snapshot = state.read().await;
        let outputs = evaluate_outputs(graph, &snapshot)?;

        if plan.is_empty() && snapshot.outputs == outputs && snapshot.config_hash == hash {
            debug!("Nothing applied and outputs unchanged, state left as is");
        } else {
            let recorded = outputs.clone();
            let changed = !plan.is_empty();
            state
                .update("outputs", move |doc| {
                    doc.outputs = recorded;
                    if changed {
                        doc.add_history(HistoryEntry::new(
                            HistoryOperation::Apply,
                            &hash,
                            touched,
                            None,
                        ));
                    }
                    doc.config_hash = hash;
                })
                .await?;
        }

        Ok(ApplyOutcome {
            plan,
            report,
            outputs,
        })
    }

    async fn destroy_recorded(&self) -> Result<ApplyOutcome> {
        info!(
            "Destroying {}/{}",
            self.config.project.name, self.config.project.environment
        );

        let state = self.open_state().await?;
        let plan = Planner::new(&self.catalog).plan_destroy(&state.read().await)?;
        if plan.is_empty() {
            info!("Nothing recorded, nothing to destroy");
            return Ok(ApplyOutcome {
                plan,
                report: ApplyReport::default(),
                outputs: BTreeMap::new(),
            });
        }

        let report = self.executor(&state).execute(&plan, None).await?;
        let hash = self.hasher.hash_config(&self.config);
        let touched = touched_resources(&report);
        let error = report
            .incomplete()
            .map(|incomplete| failure_message(&report, &incomplete));
        let cleared = error.is_none();

        state
            .update("history", move |doc| {
                if cleared {
                    doc.outputs.clear();
                }
                doc.add_history(HistoryEntry::new(
                    HistoryOperation::Destroy,
                    &hash,
                    touched,
                    error,
                ));
            })
            .await?;

        Ok(ApplyOutcome {
            plan,
            report,
            outputs: BTreeMap::new(),
        })
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("project", &self.config.project.name)
            .field("environment", &self.config.project.environment)
            .field("provider", &self.provider.name())
            .field("backend", &self.store.backend_type())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn touched_resources(report: &ApplyReport) -> Vec<String> {
    report
        .completed
        .iter()
        .map(|r| r.action.resource.to_string())
        .collect()
}

fn failure_message(report: &ApplyReport, incomplete: &ExecutionError) -> String {
    report.failed.first().map_or_else(
        || incomplete.to_string(),
        |failed| format!("{}: {}", failed.action.resource, failed.error),
    )
}

/// Evaluates declared outputs against the state written by the run.
fn evaluate_outputs(
    graph: &DesiredGraph,
    state: &RemoteState,
) -> Result<BTreeMap<String, OutputValue>> {
    let mut outputs = BTreeMap::new();
    for (name, declared) in graph.outputs() {
        let value = evaluate_against_state(&format!("output.{name}"), &declared.value, state)?;
        outputs.insert(
            name.clone(),
            OutputValue {
                value,
                description: declared.description.clone(),
                sensitive: declared.sensitive,
            },
        );
    }
    Ok(outputs)
}

/// Compares the provider's view against the recorded attributes.
fn compare_attributes(
    record: &ResourceRecord,
    observed: &Attributes,
) -> Option<Drift> {
    let changes: Vec<AttributeDrift> = record
        .attributes
        .iter()
        .filter(|&(name, recorded)| observed.get(name) != Some(recorded))
        .map(|(name, recorded)| AttributeDrift {
            attribute: name.clone(),
            recorded: recorded.clone(),
            observed: observed.get(name).cloned(),
        })
        .collect();

    (!changes.is_empty()).then_some(Drift::Modified { changes })
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_drift() {
            return write!(
                f,
                "No drift detected - {} resources match the recorded state",
                self.checked
            );
        }

        writeln!(f, "Drift detected:")?;
        for resource in &self.drifted {
            match &resource.drift {
                Drift::Deleted => writeln!(f, "  - {}: deleted outside halyard", resource.resource)?,
                Drift::Modified { changes } => {
                    writeln!(f, "  ~ {}:", resource.resource)?;
                    for change in changes {
                        let observed = change
                            .observed
                            .as_ref()
                            .map_or_else(|| String::from("(removed)"), ToString::to_string);
                        writeln!(
                            f,
                            "      {}: {} -> {observed}",
                            change.attribute, change.recorded
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let report = &self.report;
        let status = if report.is_success() {
            "complete"
        } else if report.cancelled {
            "cancelled"
        } else {
            "failed"
        };
        writeln!(
            f,
            "Apply {status}: {} of {} actions completed",
            report.completed.len(),
            report.total
        )?;

        for failed in &report.failed {
            writeln!(
                f,
                "  failed: {} {}: {}",
                failed.action.kind, failed.action.resource, failed.error
            )?;
        }
        if !report.not_started.is_empty() {
            writeln!(f, "  not started:")?;
            for action in &report.not_started {
                writeln!(f, "    - {} {}", action.kind, action.resource)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::HalyardError;
    use crate::executor::RetryPolicy;
    use crate::provider::{FaultRule, MemoryProvider, Operation};
    use crate::state::LocalStateStore;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    const SG_ELB: &str = r#"
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
outputs:
  clb_dns_name:
    value: "${aws_elb.example.dns_name}"
    description: Load balancer DNS name
"#;

    struct Fixture {
        _dir: TempDir,
        provider: Arc<MemoryProvider>,
        store: Arc<LocalStateStore>,
        reconciler: Reconciler,
    }

    fn fixture(yaml: &str) -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("parse");
        let provider = Arc::new(MemoryProvider::new());
        let store = Arc::new(LocalStateStore::with_base_dir(dir.path()));
        let reconciler = Reconciler::new(
            config,
            Arc::clone(&provider) as Arc<dyn Provider>,
            Arc::clone(&store) as Arc<dyn StateStore>,
        )
        .with_options(ExecutorOptions {
            concurrency: 4,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        });
        Fixture {
            _dir: dir,
            provider,
            store,
            reconciler,
        }
    }

    #[tokio::test]
    async fn test_apply_records_outputs_and_history() {
        let fx = fixture(SG_ELB);
        let outcome = fx.reconciler.apply().await.expect("apply");

        assert!(outcome.is_success());
        assert_eq!(outcome.report.completed.len(), 2);
        let dns = &outcome.outputs["clb_dns_name"].value;
        assert!(dns.as_str().is_some_and(|s| s.starts_with("web-elb")));

        let state = fx.reconciler.load_state().await.expect("state");
        assert_eq!(state.outputs, outcome.outputs);
        assert_eq!(state.history.len(), 1);
        assert!(state.history[0].success);
        assert!(!fx.store.is_locked().await.expect("lock"));
    }

    #[tokio::test]
    async fn test_second_apply_changes_nothing() {
        let fx = fixture(SG_ELB);
        fx.reconciler.apply().await.expect("first apply");
        let serial = fx.reconciler.load_state().await.expect("state").serial;

        let outcome = fx.reconciler.apply().await.expect("second apply");
        assert!(outcome.plan.is_empty());
        assert_eq!(
            fx.reconciler.load_state().await.expect("state").serial,
            serial
        );
    }

    #[tokio::test]
    async fn test_failed_apply_records_error_and_releases_lock() {
        let fx = fixture(SG_ELB);
        fx.provider.inject_fault(
            FaultRule::new(ProviderError::rejected(400, "InvalidParameterValue"))
                .on(Operation::Create)
                .for_type("aws_elb"),
        );

        let outcome = fx.reconciler.apply().await.expect("apply");
        assert!(!outcome.is_success());
        assert_eq!(outcome.report.failed.len(), 1);
        assert!(outcome.outputs.is_empty());

        let state = fx.reconciler.load_state().await.expect("state");
        assert_eq!(state.resources.len(), 1);
        let entry = state.history.last().expect("history");
        assert!(!entry.success);
        assert!(entry.error.as_deref().is_some_and(|e| e.contains("aws_elb.example")));
        assert!(!fx.store.is_locked().await.expect("lock"));
    }

    #[tokio::test]
    async fn test_lock_is_renewed_during_long_apply() {
        let dir = TempDir::new().expect("temp dir");
        let config = ConfigParser::new().parse_yaml(SG_ELB, None).expect("parse");
        let provider = Arc::new(MemoryProvider::new().with_latency(Duration::from_millis(60)));
        let store = Arc::new(LocalStateStore::with_base_dir(dir.path()));
        let reconciler = Reconciler::new(
            config,
            provider as Arc<dyn Provider>,
            Arc::clone(&store) as Arc<dyn StateStore>,
        )
        .with_lock_renewal(Duration::from_millis(10));

        let (outcome, observed) = tokio::join!(reconciler.apply(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.get_lock_info().await
        });

        assert!(outcome.expect("apply").is_success());
        let lock = observed.expect("lock info").expect("held during apply");
        let period = chrono::Duration::seconds(crate::state::LOCK_EXPIRY_SECS);
        assert!(lock.expires_at > lock.acquired_at + period);
        assert!(!store.is_locked().await.expect("lock"));
    }

    #[tokio::test]
    async fn test_apply_refuses_when_locked() {
        let fx = fixture(SG_ELB);
        fx.store
            .acquire_lock("someone-else", "apply")
            .await
            .expect("lock");

        let err = fx.reconciler.apply().await.unwrap_err();
        assert!(matches!(
            err,
            HalyardError::State(StateError::LockedByOther { .. })
        ));
        assert!(fx.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_drift_reports_modified_and_deleted() {
        let fx = fixture(SG_ELB);
        fx.reconciler.apply().await.expect("apply");
        assert!(fx.reconciler.check_drift().await.expect("drift").is_converged());

        let state = fx.reconciler.load_state().await.expect("state");
        let sg = state
            .get(&ResourceId::new("aws_security_group", "elb"))
            .and_then(ResourceRecord::provider_id)
            .expect("sg id")
            .to_string();
        let elb = state
            .get(&ResourceId::new("aws_elb", "example"))
            .and_then(ResourceRecord::provider_id)
            .expect("elb id")
            .to_string();
        fx.provider
            .set_attribute("aws_security_group", &sg, "name", json!("renamed"));
        fx.provider.remove("aws_elb", &elb);

        let report = fx.reconciler.check_drift().await.expect("drift");
        assert_eq!(report.checked, 2);
        assert_eq!(report.drifted.len(), 2);
        assert!(report
            .drifted
            .iter()
            .any(|d| d.resource.resource_type == "aws_elb" && d.drift == Drift::Deleted));
        assert!(report.to_string().contains("name: \"web-elb-sg\" -> \"renamed\""));

        // Drift detection never writes.
        let after = fx.reconciler.load_state().await.expect("state");
        assert_eq!(after.serial, state.serial);
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let fx = fixture(SG_ELB);
        fx.reconciler.apply().await.expect("apply");

        let outcome = fx.reconciler.destroy().await.expect("destroy");
        assert!(outcome.is_success());
        assert_eq!(fx.provider.resource_count(), 0);

        let state = fx.reconciler.load_state().await.expect("state");
        assert!(state.is_empty());
        assert!(state.outputs.is_empty());
        assert_eq!(
            state.history.last().map(|h| h.operation),
            Some(HistoryOperation::Destroy)
        );
    }

    #[tokio::test]
    async fn test_forget_leaves_provider_untouched() {
        let fx = fixture(SG_ELB);
        fx.reconciler.apply().await.expect("apply");
        let elb = ResourceId::new("aws_elb", "example");

        fx.reconciler.forget(&elb).await.expect("forget");
        assert_eq!(fx.provider.resource_count(), 2);
        assert!(fx.reconciler.load_state().await.expect("state").get(&elb).is_none());

        let err = fx.reconciler.forget(&elb).await.unwrap_err();
        assert!(matches!(
            err,
            HalyardError::State(StateError::UnknownResource { .. })
        ));
    }
}
