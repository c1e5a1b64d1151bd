//! Action ordering.
//!
//! Creates, updates and replaces run after the actions of everything they
//! depend on. Deletes run before the deletes and replaces of the resources
//! they depended on, so dependents go first. A resource dropped from the
//! configuration is deleted only after the resources that used to reference
//! it have been updated or replaced.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::PlanError;
use crate::graph::{DesiredGraph, ResourceId};
use crate::state::RemoteState;

use super::diff::{DiffKind, ResourceDiff};
use super::plan::{ActionKind, PlannedAction};

/// Tie-break key: declared resources by declaration index, then orphans by id.
type Rank = (u8, usize, ResourceId);

struct Node {
    diff: ResourceDiff,
    kind: ActionKind,
    rank: Rank,
}

/// Orders diffs into actions with dependency indices.
///
/// Without a desired graph every action must be a delete.
pub(super) fn sequence(
    diffs: Vec<ResourceDiff>,
    graph: Option<&DesiredGraph>,
    state: &RemoteState,
) -> Result<Vec<PlannedAction>, PlanError> {
    let nodes: Vec<Node> = diffs
        .into_iter()
        .filter_map(|diff| {
            let kind = action_kind(diff.kind)?;
            let rank = match graph.and_then(|g| g.get(&diff.id)) {
                Some(resource) => (0, resource.index, diff.id.clone()),
                None => (1, 0, diff.id.clone()),
            };
            Some(Node { diff, kind, rank })
        })
        .collect();

    let position: HashMap<&ResourceId, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (&node.diff.id, i))
        .collect();

    let mut preds: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        if node.kind != ActionKind::Delete
            && let Some(graph) = graph
        {
            for j in acting_dependencies(graph, &node.diff.id, &position) {
                preds[i].insert(j);
            }
        }

        // A recorded dependency leaves only after every former dependent has
        // been deleted or moved off it.
        let Some(record) = state.get(&node.diff.id) else {
            continue;
        };
        for dependency in &record.dependencies {
            let Some(&j) = position.get(dependency) else {
                continue;
            };
            let releases = match nodes[j].kind {
                ActionKind::Delete => true,
                ActionKind::Replace => node.kind == ActionKind::Delete,
                ActionKind::Create | ActionKind::Update => false,
            };
            if releases && j != i {
                preds[j].insert(i);
            }
        }
    }

    let order = kahn(&nodes, &preds)?;

    let mut final_index = vec![0; nodes.len()];
    for (at, &node) in order.iter().enumerate() {
        final_index[node] = at;
    }

    let mut slots: Vec<Option<Node>> = nodes.into_iter().map(Some).collect();
    let mut actions = Vec::with_capacity(order.len());
    for &i in &order {
        let Some(node) = slots[i].take() else {
            continue;
        };
        let mut dependencies: Vec<usize> = preds[i].iter().map(|&p| final_index[p]).collect();
        dependencies.sort_unstable();
        actions.push(PlannedAction {
            kind: node.kind,
            resource: node.diff.id,
            changes: node.diff.changes,
            dependencies,
        });
    }
    Ok(actions)
}

const fn action_kind(kind: DiffKind) -> Option<ActionKind> {
    match kind {
        DiffKind::Create => Some(ActionKind::Create),
        DiffKind::Update => Some(ActionKind::Update),
        DiffKind::Replace => Some(ActionKind::Replace),
        DiffKind::Delete => Some(ActionKind::Delete),
        DiffKind::NoChange => None,
    }
}

/// Nearest dependencies that have an action, looking through unchanged ones.
fn acting_dependencies(
    graph: &DesiredGraph,
    id: &ResourceId,
    position: &HashMap<&ResourceId, usize>,
) -> BTreeSet<usize> {
    let mut found = BTreeSet::new();
    let mut visited: HashSet<&ResourceId> = HashSet::new();
    let mut stack: Vec<&ResourceId> = graph
        .get(id)
        .map(|r| r.dependencies.iter().collect())
        .unwrap_or_default();

    while let Some(dependency) = stack.pop() {
        if !visited.insert(dependency) {
            continue;
        }
        if let Some(&j) = position.get(dependency) {
            found.insert(j);
        } else if let Some(resource) = graph.get(dependency) {
            stack.extend(resource.dependencies.iter());
        }
    }
    found
}

/// Kahn's algorithm, always emitting the lowest-ranked ready node.
fn kahn(nodes: &[Node], preds: &[BTreeSet<usize>]) -> Result<Vec<usize>, PlanError> {
    let mut remaining: Vec<usize> = preds.iter().map(BTreeSet::len).collect();
    let mut succs: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, set) in preds.iter().enumerate() {
        for &p in set {
            succs[p].push(i);
        }
    }

    let mut ready: BTreeSet<(&Rank, usize)> = remaining
        .iter()
        .enumerate()
        .filter(|&(_, &n)| n == 0)
        .map(|(i, _)| (&nodes[i].rank, i))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some((_, i)) = ready.pop_first() {
        order.push(i);
        for &s in &succs[i] {
            remaining[s] -= 1;
            if remaining[s] == 0 {
                ready.insert((&nodes[s].rank, s));
            }
        }
    }

    if order.len() < nodes.len() {
        let stuck: Vec<String> = remaining
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n > 0)
            .map(|(i, _)| nodes[i].diff.id.to_string())
            .collect();
        return Err(PlanError::DependencyResolutionFailed {
            message: format!("circular action ordering between {}", stuck.join(", ")),
        });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::diff::applied_record;
    use serde_json::json;

    fn delete(id: &ResourceId) -> ResourceDiff {
        ResourceDiff {
            id: id.clone(),
            kind: DiffKind::Delete,
            changes: vec![],
        }
    }

    #[test]
    fn test_deletes_run_dependents_first() {
        let elb_sg = ResourceId::new("aws_security_group", "elb");
        let instance_sg = ResourceId::new("aws_security_group", "instance");

        let mut state = RemoteState::new("web", "dev");
        let mut dependent = applied_record(instance_sg.clone(), &[("name", json!("web-instance-sg"))], &[]);
        dependent.dependencies = vec![elb_sg.clone()];
        state.resources.insert(instance_sg.clone(), dependent);
        state.resources.insert(
            elb_sg.clone(),
            applied_record(elb_sg.clone(), &[("name", json!("web-elb-sg"))], &[]),
        );

        // By id alone the elb group would sort first.
        let actions =
            sequence(vec![delete(&elb_sg), delete(&instance_sg)], None, &state).expect("sequence");

        assert_eq!(actions[0].resource, instance_sg);
        assert_eq!(actions[1].resource, elb_sg);
        assert_eq!(actions[1].dependencies, vec![0]);
    }

    #[test]
    fn test_circular_deletes_fail() {
        let a = ResourceId::new("aws_security_group", "a");
        let b = ResourceId::new("aws_security_group", "b");

        let mut state = RemoteState::new("web", "dev");
        let mut a_record = applied_record(a.clone(), &[], &[]);
        a_record.dependencies = vec![b.clone()];
        let mut b_record = applied_record(b.clone(), &[], &[]);
        b_record.dependencies = vec![a.clone()];
        state.resources.insert(a.clone(), a_record);
        state.resources.insert(b.clone(), b_record);

        let err = sequence(vec![delete(&a), delete(&b)], None, &state).unwrap_err();
        assert!(matches!(err, PlanError::DependencyResolutionFailed { .. }));
    }
}
