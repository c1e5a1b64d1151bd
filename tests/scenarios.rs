//! End-to-end scenarios against the simulated cloud and a local state store.

use std::sync::Arc;
use std::time::Duration;

use halyard::config::{ConfigParser, DeployConfig};
use halyard::error::{HalyardError, ProviderError, ValidationError};
use halyard::executor::{CancellationHandle, ExecutorOptions, RetryPolicy};
use halyard::graph::ResourceId;
use halyard::planner::ActionKind;
use halyard::provider::{FaultRule, MemoryProvider, Operation, Provider};
use halyard::reconciler::Reconciler;
use halyard::state::{LocalStateStore, StateStore};
use tempfile::TempDir;

const SG_ELB: &str = r#"
project:
  name: web
resources:
  - type: aws_security_group
    name: elb
    attributes:
      name: web-elb-sg
      ingress:
        - { from_port: 80, to_port: 80, protocol: tcp }
  - type: aws_elb
    name: example
    attributes:
      name: web-elb
      security_groups: ["${aws_security_group.elb.id}"]
outputs:
  clb_dns_name:
    value: "${aws_elb.example.dns_name}"
"#;

const SG_ELB_LEGACY: &str = r#"
project:
  name: web
resources:
  - type: aws_security_group
    name: elb
    attributes:
      name: web-elb-sg
      ingress:
        - { from_port: 80, to_port: 80, protocol: tcp }
  - type: aws_elb
    name: example
    attributes:
      name: web-elb
      security_groups: ["${aws_security_group.elb.id}"]
  - type: aws_security_group
    name: legacy
    attributes:
      name: legacy-sg
outputs:
  clb_dns_name:
    value: "${aws_elb.example.dns_name}"
"#;

const REFERENCE: &str = include_str!("../templates/halyard.deploy.yaml");

struct World {
    _dir: TempDir,
    provider: Arc<MemoryProvider>,
    store: Arc<LocalStateStore>,
}

impl World {
    fn new() -> Self {
        Self::with_provider(MemoryProvider::new())
    }

    fn with_provider(provider: MemoryProvider) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store = Arc::new(LocalStateStore::with_base_dir(dir.path().join(".halyard")));
        Self {
            _dir: dir,
            provider: Arc::new(provider),
            store,
        }
    }

    fn reconciler(&self, yaml: &str) -> Reconciler {
        self.reconciler_with(yaml, options(4))
    }

    fn reconciler_with(&self, yaml: &str, options: ExecutorOptions) -> Reconciler {
        Reconciler::new(
            config(yaml),
            Arc::clone(&self.provider) as Arc<dyn Provider>,
            Arc::clone(&self.store) as Arc<dyn StateStore>,
        )
        .with_options(options)
    }
}

fn config(yaml: &str) -> DeployConfig {
    ConfigParser::new().parse_yaml(yaml, None).expect("parse")
}

fn options(concurrency: usize) -> ExecutorOptions {
    ExecutorOptions {
        concurrency,
        retry: RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    }
}

fn slow_provider() -> MemoryProvider {
    MemoryProvider::new().with_latency(Duration::from_millis(20))
}

fn independent_groups(count: usize) -> String {
    let mut yaml = String::from("project:\n  name: web\nresources:\n");
    for i in 0..count {
        yaml.push_str(&format!(
            "  - type: aws_security_group\n    name: sg{i}\n    attributes:\n      name: web-sg-{i}\n"
        ));
    }
    yaml
}

fn sg() -> ResourceId {
    ResourceId::new("aws_security_group", "elb")
}

fn elb() -> ResourceId {
    ResourceId::new("aws_elb", "example")
}

#[tokio::test]
async fn test_sg_elb_plans_two_creates_group_first() {
    let world = World::new();
    let plan = world.reconciler(SG_ELB).plan().await.expect("plan");

    assert_eq!(plan.len(), 2);
    assert_eq!(plan.count(ActionKind::Create), 2);
    assert_eq!(plan.actions[0].resource, sg());
    assert_eq!(plan.actions[1].resource, elb());
    assert_eq!(plan.actions[1].dependencies, vec![0]);
}

#[tokio::test]
async fn test_missing_variable_fails_before_planning() {
    let world = World::new();
    let yaml = r#"
project:
  name: web
variables:
  server_port:
    type: number
resources:
  - type: aws_security_group
    name: instance
    attributes:
      name: web-instance-sg
      ingress:
        - { from_port: "${var.server_port}", to_port: "${var.server_port}", protocol: tcp }
"#;

    let err = world.reconciler(yaml).plan().await.unwrap_err();
    assert!(matches!(
        err,
        HalyardError::Validation(ValidationError::MissingVariable { ref name }) if name == "server_port"
    ));

    let err = world.reconciler(yaml).apply().await.unwrap_err();
    assert!(matches!(err, HalyardError::Validation(_)));
    assert!(world.provider.calls().is_empty());
    assert!(!world.store.exists().await.expect("exists"));
}

#[tokio::test]
async fn test_variable_override_beats_default() {
    let world = World::new();
    let overrides = [(String::from("server_port"), serde_json::json!(9090))]
        .into_iter()
        .collect();
    let reconciler = world.reconciler(REFERENCE).with_overrides(overrides);

    reconciler.apply().await.expect("apply");
    let state = reconciler.load_state().await.expect("state");
    let record = state
        .get(&ResourceId::new("aws_elb", "example"))
        .expect("elb recorded");
    assert_eq!(record.inputs["listener"]["instance_port"], 9090);
    assert_eq!(record.inputs["health_check"]["target"], "HTTP:9090/");
}

#[tokio::test]
async fn test_orphan_is_deleted_once() {
    let world = World::new();
    world
        .reconciler(SG_ELB_LEGACY)
        .apply()
        .await
        .expect("first apply");
    assert_eq!(world.provider.resource_count(), 3);

    let reconciler = world.reconciler(SG_ELB);
    let plan = reconciler.plan().await.expect("plan");
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.actions[0].kind, ActionKind::Delete);
    assert_eq!(
        plan.actions[0].resource,
        ResourceId::new("aws_security_group", "legacy")
    );

    let outcome = reconciler.apply().await.expect("apply");
    assert!(outcome.is_success());
    assert_eq!(world.provider.resource_count(), 2);
}

#[tokio::test]
async fn test_removed_dependents_are_deleted_first() {
    let world = World::new();
    world.reconciler(SG_ELB).apply().await.expect("apply");

    let empty = "project:\n  name: web\nresources: []\n";
    let reconciler = world.reconciler(empty);
    let plan = reconciler.plan().await.expect("plan");

    assert_eq!(plan.count(ActionKind::Delete), 2);
    let (elb_index, _) = plan.action_for(&elb()).expect("elb delete");
    let (sg_index, sg_action) = plan.action_for(&sg()).expect("sg delete");
    assert!(elb_index < sg_index);
    assert_eq!(sg_action.dependencies, vec![elb_index]);

    reconciler.apply().await.expect("apply");
    assert_eq!(world.provider.resource_count(), 0);
    let deletes: Vec<String> = world
        .provider
        .calls()
        .into_iter()
        .filter(|c| c.operation == Operation::Delete)
        .map(|c| c.resource_type)
        .collect();
    assert_eq!(deletes, vec!["aws_elb", "aws_security_group"]);
}

#[tokio::test]
async fn test_transient_errors_then_success() {
    let world = World::new();
    world.provider.inject_fault(
        FaultRule::new(ProviderError::Unavailable {
            status: 503,
            message: String::from("RequestLimitExceeded"),
        })
        .on(Operation::Create)
        .for_type("aws_security_group")
        .times(2),
    );

    let outcome = world.reconciler(SG_ELB).apply().await.expect("apply");

    assert!(outcome.is_success());
    let sg_result = outcome
        .report
        .completed
        .iter()
        .find(|r| r.action.resource == sg())
        .expect("sg completed");
    assert_eq!(sg_result.attempts, 3);
    assert!(outcome.report.max_attempts() <= 5);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let world = World::new();
    world.provider.inject_fault(
        FaultRule::new(ProviderError::RateLimited { retry_after_secs: 0 })
            .on(Operation::Create)
            .for_type("aws_security_group")
            .times(10),
    );

    let outcome = world.reconciler(SG_ELB).apply().await.expect("apply");

    assert!(!outcome.is_success());
    assert!(outcome.report.failed[0].error.contains("5 attempts"));
    assert_eq!(outcome.report.not_started.len(), 1);
    assert_eq!(outcome.report.not_started[0].resource, elb());
    assert!(world.reconciler(SG_ELB).load_state().await.expect("state").is_empty());
}

#[tokio::test]
async fn test_planning_twice_is_identical() {
    let world = World::new();
    let reconciler = world.reconciler(REFERENCE);

    let first = reconciler.plan().await.expect("plan");
    let second = reconciler.plan().await.expect("plan");
    assert_eq!(first, second);
    assert!(world.provider.calls().is_empty());
}

#[tokio::test]
async fn test_apply_then_plan_is_empty() {
    let world = World::new();
    let reconciler = world.reconciler(REFERENCE);

    let outcome = reconciler.apply().await.expect("apply");
    assert!(outcome.is_success());
    assert_eq!(outcome.report.completed.len(), 5);
    assert!(outcome.outputs.contains_key("clb_dns_name"));

    let plan = reconciler.plan().await.expect("plan");
    assert!(plan.is_empty(), "unexpected actions: {plan}");
}

#[tokio::test]
async fn test_every_edge_is_ordered() {
    let world = World::new();
    let reconciler = world.reconciler(REFERENCE);
    let graph = reconciler.build_graph().expect("graph");
    let plan = reconciler.plan().await.expect("plan");

    assert_eq!(plan.ordering_violation(), None);
    for resource in graph.resources() {
        let (index, _) = plan.action_for(&resource.id).expect("action");
        for dependency in &resource.dependencies {
            let (dependency_index, _) = plan.action_for(dependency).expect("dependency action");
            assert!(
                dependency_index < index,
                "{dependency} must come before {}",
                resource.id
            );
        }
    }
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let yaml = independent_groups(6);

    let limited = World::with_provider(slow_provider());
    limited
        .reconciler_with(&yaml, options(2))
        .apply()
        .await
        .expect("apply");
    assert_eq!(limited.provider.resource_count(), 6);
    assert!(limited.provider.max_in_flight() <= 2);

    let wide = World::with_provider(slow_provider());
    wide.reconciler_with(&yaml, options(6))
        .apply()
        .await
        .expect("apply");
    assert!(wide.provider.max_in_flight() > 1);
}

#[tokio::test]
async fn test_immutable_change_replaces_and_updates_dependents() {
    let world = World::new();
    world.reconciler(SG_ELB).apply().await.expect("apply");
    let old_id = world
        .reconciler(SG_ELB)
        .load_state()
        .await
        .expect("state")
        .get(&sg())
        .and_then(|r| r.provider_id().map(String::from))
        .expect("sg id");

    let renamed = SG_ELB.replace("web-elb-sg", "web-elb-sg-v2");
    let reconciler = world.reconciler(&renamed);
    let plan = reconciler.plan().await.expect("plan");
    assert_eq!(plan.action_for(&sg()).map(|(_, a)| a.kind), Some(ActionKind::Replace));
    assert_eq!(plan.action_for(&elb()).map(|(_, a)| a.kind), Some(ActionKind::Update));

    reconciler.apply().await.expect("apply");
    let state = reconciler.load_state().await.expect("state");
    let new_id = state.get(&sg()).and_then(|r| r.provider_id()).expect("sg id");
    assert_ne!(new_id, old_id);
    assert_eq!(
        state.get(&elb()).expect("elb").inputs["security_groups"],
        serde_json::json!([new_id])
    );
    assert!(reconciler.plan().await.expect("plan").is_empty());
}

#[tokio::test]
async fn test_cancelled_apply_starts_nothing() {
    let world = World::new();
    let cancel = CancellationHandle::new();
    cancel.cancel();

    let outcome = world
        .reconciler(SG_ELB)
        .with_cancellation(cancel)
        .apply()
        .await
        .expect("apply");

    assert!(outcome.report.cancelled);
    assert!(outcome.report.completed.is_empty());
    assert_eq!(outcome.report.not_started.len(), 2);
    assert!(world.provider.calls().is_empty());
    assert!(!world.store.is_locked().await.expect("lock"));
}

#[tokio::test]
async fn test_cancel_mid_run_keeps_in_flight_work() {
    let world = World::with_provider(MemoryProvider::new().with_latency(Duration::from_millis(200)));
    let cancel = CancellationHandle::new();
    let reconciler = world
        .reconciler_with(&independent_groups(4), options(2))
        .with_cancellation(cancel.clone());

    let (outcome, ()) = tokio::join!(reconciler.apply(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let outcome = outcome.expect("apply");

    assert!(outcome.report.cancelled);
    assert_eq!(outcome.report.completed.len(), 2);
    assert_eq!(outcome.report.not_started.len(), 2);
    assert!(outcome.report.failed.is_empty());

    let state = reconciler.load_state().await.expect("state");
    assert_eq!(state.resources.len(), 2);
    assert_eq!(world.provider.resource_count(), 2);
    for done in &outcome.report.completed {
        assert!(state.get(&done.action.resource).is_some());
    }
    for skipped in &outcome.report.not_started {
        assert!(state.get(&skipped.resource).is_none());
    }
    assert!(!world.store.is_locked().await.expect("lock"));

    // The next run picks up what was never started.
    let resumed = world.reconciler(&independent_groups(4)).plan().await.expect("plan");
    assert_eq!(resumed.count(ActionKind::Create), 2);
}

#[tokio::test]
async fn test_cloud_survives_separate_providers() {
    let dir = TempDir::new().expect("temp dir");
    let state_dir = dir.path().join(".halyard");
    let snapshot = state_dir.join("cloud.json");
    let store = Arc::new(LocalStateStore::with_base_dir(&state_dir));
    let reconciler_for = |provider: MemoryProvider, yaml: &str| {
        Reconciler::new(
            config(yaml),
            Arc::new(provider) as Arc<dyn Provider>,
            Arc::clone(&store) as Arc<dyn StateStore>,
        )
        .with_options(options(4))
    };

    let first = MemoryProvider::new().with_snapshot(&snapshot).await.expect("open");
    let outcome = reconciler_for(first, REFERENCE).apply().await.expect("apply");
    assert!(outcome.is_success());

    let larger = REFERENCE.replace("default: t2.micro", "default: t3.micro");
    let second = MemoryProvider::new().with_snapshot(&snapshot).await.expect("reopen");
    assert_eq!(second.resource_count(), 5);
    let reconciler = reconciler_for(second, &larger);
    let plan = reconciler.plan().await.expect("plan");
    let template = ResourceId::new("aws_launch_template", "web");
    let group = ResourceId::new("aws_autoscaling_group", "web");
    assert_eq!(plan.action_for(&template).map(|(_, a)| a.kind), Some(ActionKind::Update));
    assert_eq!(plan.action_for(&group).map(|(_, a)| a.kind), Some(ActionKind::Update));

    let outcome = reconciler.apply().await.expect("apply");
    assert!(outcome.is_success(), "failed: {:?}", outcome.report.failed);

    let third = MemoryProvider::new().with_snapshot(&snapshot).await.expect("reopen");
    let template_id = reconciler
        .load_state()
        .await
        .expect("state")
        .get(&template)
        .and_then(|r| r.provider_id().map(String::from))
        .expect("template id");
    let stored = third.get("aws_launch_template", &template_id).expect("template");
    assert_eq!(stored["instance_type"], serde_json::json!("t3.micro"));
    let drift = reconciler_for(third, &larger).check_drift().await.expect("drift");
    assert!(!drift.has_drift());
}
