//! Diff engine for comparing desired and recorded state.
//!
//! Resources are visited in dependency order so every reference can be
//! resolved against what is already planned for its target.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::PlanError;
use crate::graph::{DesiredGraph, DesiredResource, Expr, Reference, ResourceId, Resolved};
use crate::provider::{ResourceSchema, SchemaCatalog};
use crate::state::{RemoteState, ResourceRecord};

use super::plan::{AttributeChange, PlannedValue};

/// Computed attributes an in-place update never changes.
const STABLE_COMPUTED: &[&str] = &["id", "arn"];

/// Engine for computing per-resource diffs.
#[derive(Debug)]
pub struct DiffEngine<'a> {
    catalog: &'a SchemaCatalog,
}

/// Difference for a single resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDiff {
    /// Resource identity.
    pub id: ResourceId,
    /// Type of difference.
    pub kind: DiffKind,
    /// Attribute changes.
    pub changes: Vec<AttributeChange>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    /// Not in state.
    Create,
    /// Mutable attributes changed.
    Update,
    /// An immutable attribute changed.
    Replace,
    /// In state but no longer declared.
    Delete,
    /// Up to date.
    NoChange,
}

/// What the planner expects a resource to look like after apply.
#[derive(Debug)]
struct Planned {
    kind: DiffKind,
    values: BTreeMap<String, Resolved>,
}

impl<'a> DiffEngine<'a> {
    /// Creates a diff engine over a schema catalog.
    #[must_use]
    pub const fn new(catalog: &'a SchemaCatalog) -> Self {
        Self { catalog }
    }

    /// Diffs every declared resource, then every orphan in state.
    ///
    /// Declared resources come in dependency order; orphans follow, sorted
    /// by identity.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Conflict` for colliding unique attributes and
    /// `PlanError::UnknownAttribute` for references nothing can satisfy.
    pub fn diff(
        &self,
        graph: &DesiredGraph,
        state: &RemoteState,
    ) -> Result<Vec<ResourceDiff>, PlanError> {
        self.check_conflicts(graph)?;

        let mut planned: HashMap<ResourceId, Planned> = HashMap::new();
        let mut diffs = Vec::with_capacity(graph.len() + state.resources.len());

        for resource in graph.topological_order() {
            let values = self.plan_values(resource, &planned, state)?;
            let schema = self.catalog.get(&resource.id.resource_type);

            let (kind, changes) = match state.get(&resource.id) {
                None => (DiffKind::Create, creation_changes(&values)),
                Some(record) => compare(record, &values, schema),
            };
            debug!("{}: {kind:?} ({} changes)", resource.id, changes.len());

            diffs.push(ResourceDiff {
                id: resource.id.clone(),
                kind,
                changes,
            });
            planned.insert(resource.id.clone(), Planned { kind, values });
        }

        for id in state.resources.keys() {
            if !graph.contains(id) {
                debug!("{id}: orphaned in state");
                diffs.push(ResourceDiff {
                    id: id.clone(),
                    kind: DiffKind::Delete,
                    changes: vec![],
                });
            }
        }

        Ok(diffs)
    }

    /// Rejects two declared resources sharing a literal unique value.
    fn check_conflicts(&self, graph: &DesiredGraph) -> Result<(), PlanError> {
        let mut seen: HashMap<(&str, &str, String), &ResourceId> = HashMap::new();

        for resource in graph.resources() {
            let Some(schema) = self.catalog.get(&resource.id.resource_type) else {
                continue;
            };
            for attribute in &schema.unique {
                let Some(value) = resource.attributes.get(attribute).and_then(Expr::as_literal)
                else {
                    continue;
                };
                let key = (
                    resource.id.resource_type.as_str(),
                    attribute.as_str(),
                    value.to_string(),
                );
                if let Some(first) = seen.get(&key) {
                    return Err(PlanError::Conflict {
                        resource_type: resource.id.resource_type.clone(),
                        attribute: attribute.clone(),
                        value: key.2,
                        first: first.to_string(),
                        second: resource.id.to_string(),
                    });
                }
                seen.insert(key, &resource.id);
            }
        }
        Ok(())
    }

    fn plan_values(
        &self,
        resource: &DesiredResource,
        planned: &HashMap<ResourceId, Planned>,
        state: &RemoteState,
    ) -> Result<BTreeMap<String, Resolved>, PlanError> {
        let mut values = BTreeMap::new();
        for (name, expr) in &resource.attributes {
            let resolved = expr.evaluate(&mut |reference: &Reference| {
                self.lookup(&resource.id, reference, planned, state)
            })?;
            values.insert(name.clone(), resolved);
        }
        Ok(values)
    }

    /// Resolves a reference against the planned state of its target.
    fn lookup(
        &self,
        holder: &ResourceId,
        reference: &Reference,
        planned: &HashMap<ResourceId, Planned>,
        state: &RemoteState,
    ) -> Result<Resolved, PlanError> {
        let Reference::Attribute { target, attribute } = reference else {
            return Err(PlanError::DependencyResolutionFailed {
                message: format!("{holder}: variable {reference} was not bound"),
            });
        };
        let Some(target_plan) = planned.get(target) else {
            return Err(PlanError::DependencyResolutionFailed {
                message: format!("{holder} was planned before its dependency {target}"),
            });
        };

        if let Some(value) = target_plan.values.get(attribute) {
            return Ok(value.clone());
        }

        let computed = self
            .catalog
            .get(&target.resource_type)
            .is_some_and(|schema| schema.is_computed(attribute));

        match target_plan.kind {
            DiffKind::Create | DiffKind::Replace if computed => return Ok(Resolved::Unknown),
            DiffKind::Update if computed && !STABLE_COMPUTED.contains(&attribute.as_str()) => {
                return Ok(Resolved::Unknown);
            }
            DiffKind::Update | DiffKind::NoChange => {
                if let Some(value) = state.get(target).and_then(|r| r.attribute(attribute)) {
                    return Ok(Resolved::Known(value.clone()));
                }
                if computed {
                    return Ok(Resolved::Unknown);
                }
            }
            _ => {}
        }

        Err(PlanError::UnknownAttribute {
            resource: holder.to_string(),
            reference: reference.to_string(),
        })
    }
}

fn creation_changes(values: &BTreeMap<String, Resolved>) -> Vec<AttributeChange> {
    values
        .iter()
        .map(|(name, value)| AttributeChange {
            attribute: name.clone(),
            before: None,
            after: PlannedValue::from(value.clone()),
            forces_replacement: false,
        })
        .collect()
}

/// Compares planned values with a record. Unknown values always differ.
fn compare(
    record: &ResourceRecord,
    values: &BTreeMap<String, Resolved>,
    schema: Option<&ResourceSchema>,
) -> (DiffKind, Vec<AttributeChange>) {
    let forces = |name: &str| schema.is_some_and(|s| s.forces_replacement(name));
    let mut changes = Vec::new();

    for (name, after) in values {
        let before = record.attribute(name);
        let changed = match after {
            Resolved::Unknown => true,
            Resolved::Known(value) => before != Some(value),
        };
        if changed {
            changes.push(AttributeChange {
                attribute: name.clone(),
                before: before.cloned(),
                after: PlannedValue::from(after.clone()),
                forces_replacement: forces(name),
            });
        }
    }

    for (name, before) in &record.inputs {
        if !values.contains_key(name) {
            changes.push(AttributeChange {
                attribute: name.clone(),
                before: Some(before.clone()),
                after: PlannedValue::Removed,
                forces_replacement: forces(name),
            });
        }
    }

    let kind = if changes.is_empty() {
        DiffKind::NoChange
    } else if changes.iter().any(|c| c.forces_replacement) {
        DiffKind::Replace
    } else {
        DiffKind::Update
    };
    (kind, changes)
}

impl From<Resolved> for PlannedValue {
    fn from(resolved: Resolved) -> Self {
        match resolved {
            Resolved::Known(value) => Self::Known(value),
            Resolved::Unknown => Self::Unknown,
        }
    }
}

/// Builds the record a faithful provider would return, for tests.
#[cfg(test)]
pub(crate) fn applied_record(
    id: ResourceId,
    inputs: &[(&str, serde_json::Value)],
    computed: &[(&str, serde_json::Value)],
) -> ResourceRecord {
    let inputs: crate::provider::Attributes = inputs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect();
    let mut attributes = inputs.clone();
    attributes.extend(computed.iter().map(|(k, v)| ((*k).to_string(), v.clone())));
    ResourceRecord::new(id, inputs, attributes, vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::graph::GraphBuilder;
    use serde_json::json;

    fn graph(yaml: &str) -> DesiredGraph {
        let config = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("test config should parse");
        GraphBuilder::new(&SchemaCatalog::builtin())
            .build(&config, &BTreeMap::new())
            .expect("test graph should build")
    }

    fn diff(graph: &DesiredGraph, state: &RemoteState) -> Result<Vec<ResourceDiff>, PlanError> {
        DiffEngine::new(&SchemaCatalog::builtin()).diff(graph, state)
    }

    fn kind_of(diffs: &[ResourceDiff], id: &str) -> DiffKind {
        let id = ResourceId::parse(id).expect("id");
        diffs.iter().find(|d| d.id == id).map(|d| d.kind).expect("diff present")
    }

    const SG_ELB: &str = r#"
project:
  name: web
resources:
  - type: aws_security_group
    name: elb
    attributes:
      name: web-elb-sg
      description: elb
  - type: aws_elb
    name: example
    attributes:
      name: web-elb
      security_groups: ["${aws_security_group.elb.id}"]
"#;

    fn applied_state() -> RemoteState {
        let mut state = RemoteState::new("web", "dev");
        let sg = applied_record(
            ResourceId::new("aws_security_group", "elb"),
            &[("name", json!("web-elb-sg")), ("description", json!("elb"))],
            &[("id", json!("sg-1"))],
        );
        let elb = applied_record(
            ResourceId::new("aws_elb", "example"),
            &[("name", json!("web-elb")), ("security_groups", json!(["sg-1"]))],
            &[("id", json!("elb-1")), ("dns_name", json!("web-elb.example"))],
        );
        state.resources.insert(sg.id.clone(), sg);
        state.resources.insert(elb.id.clone(), elb);
        state
    }

    #[test]
    fn test_empty_state_creates_with_unknown_references() {
        let graph = graph(SG_ELB);
        let diffs = diff(&graph, &RemoteState::new("web", "dev")).expect("diff");

        assert_eq!(kind_of(&diffs, "aws_security_group.elb"), DiffKind::Create);
        let elb = diffs.iter().find(|d| d.id.resource_type == "aws_elb").expect("elb");
        let groups = elb
            .changes
            .iter()
            .find(|c| c.attribute == "security_groups")
            .expect("security_groups change");
        assert_eq!(groups.after, PlannedValue::Unknown);
    }

    #[test]
    fn test_applied_state_has_no_changes() {
        let diffs = diff(&graph(SG_ELB), &applied_state()).expect("diff");
        assert!(diffs.iter().all(|d| d.kind == DiffKind::NoChange));
    }

    #[test]
    fn test_immutable_change_replaces_and_cascades() {
        let yaml = SG_ELB.replace("description: elb", "description: changed");
        let diffs = diff(&graph(&yaml), &applied_state()).expect("diff");

        assert_eq!(kind_of(&diffs, "aws_security_group.elb"), DiffKind::Replace);
        // The new group id is unknown, so the ELB must change too.
        assert_eq!(kind_of(&diffs, "aws_elb.example"), DiffKind::Update);
    }

    #[test]
    fn test_mutable_change_updates() {
        let yaml = SG_ELB.replace("      name: web-elb\n", "      name: web-elb\n      cross_zone: true\n");
        let diffs = diff(&graph(&yaml), &applied_state()).expect("diff");

        assert_eq!(kind_of(&diffs, "aws_security_group.elb"), DiffKind::NoChange);
        assert_eq!(kind_of(&diffs, "aws_elb.example"), DiffKind::Update);
    }

    #[test]
    fn test_removed_input_is_a_change() {
        let mut state = applied_state();
        let sg = ResourceId::new("aws_security_group", "elb");
        if let Some(record) = state.resources.get_mut(&sg) {
            record.inputs.insert(String::from("tags"), json!({ "team": "web" }));
        }
        let diffs = diff(&graph(SG_ELB), &state).expect("diff");

        let sg_diff = diffs.iter().find(|d| d.id == sg).expect("sg");
        assert_eq!(sg_diff.kind, DiffKind::Update);
        assert_eq!(sg_diff.changes[0].after, PlannedValue::Removed);
    }

    #[test]
    fn test_orphan_is_deleted() {
        let mut state = applied_state();
        let orphan = applied_record(
            ResourceId::new("aws_security_group", "instance"),
            &[("name", json!("web-instance-sg"))],
            &[("id", json!("sg-2"))],
        );
        state.resources.insert(orphan.id.clone(), orphan);

        let diffs = diff(&graph(SG_ELB), &state).expect("diff");
        assert_eq!(kind_of(&diffs, "aws_security_group.instance"), DiffKind::Delete);
        assert_eq!(diffs.last().map(|d| d.kind), Some(DiffKind::Delete));
    }

    #[test]
    fn test_unique_conflict() {
        let yaml = r#"
project:
  name: web
resources:
  - type: aws_security_group
    name: a
    attributes:
      name: shared
  - type: aws_security_group
    name: b
    attributes:
      name: shared
"#;
        let err = diff(&graph(yaml), &RemoteState::new("web", "dev")).unwrap_err();
        assert!(matches!(
            err,
            PlanError::Conflict { ref first, ref second, .. }
                if first == "aws_security_group.a" && second == "aws_security_group.b"
        ));
    }

    #[test]
    fn test_reference_to_unknown_attribute() {
        let yaml = r#"
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
      name: "${aws_security_group.elb.nonexistent}"
"#;
        let err = diff(&graph(yaml), &RemoteState::new("web", "dev")).unwrap_err();
        assert!(matches!(err, PlanError::UnknownAttribute { ref resource, .. } if resource == "aws_elb.example"));
    }
}
