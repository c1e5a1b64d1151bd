//! Desired graph construction and validation.
//!
//! Builds a [`DesiredGraph`] from a parsed configuration: binds variables,
//! parses `${...}` references into dependency edges, and rejects duplicate
//! identities, dangling references, unknown types and cycles. Nothing here
//! performs I/O.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::config::{DeployConfig, value_kind};
use crate::error::ValidationError;
use crate::provider::SchemaCatalog;

use super::address::ResourceId;
use super::desired::{DesiredGraph, DesiredOutput, DesiredResource};
use super::reference::Expr;

/// Builds desired graphs against a schema catalog.
#[derive(Debug)]
pub struct GraphBuilder<'a> {
    catalog: &'a SchemaCatalog,
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder that accepts the types known to `catalog`.
    #[must_use]
    pub const fn new(catalog: &'a SchemaCatalog) -> Self {
        Self { catalog }
    }

    /// Builds the desired graph.
    ///
    /// `overrides` hold variable values from the command line or
    /// environment; they take precedence over declared defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for the first problem found. Variables
    /// are checked before anything else.
    pub fn build(
        &self,
        config: &DeployConfig,
        overrides: &BTreeMap<String, Value>,
    ) -> Result<DesiredGraph, ValidationError> {
        let variables = resolve_variables(config, overrides)?;

        let mut resources = Vec::with_capacity(config.resources.len());
        let mut index = HashMap::with_capacity(config.resources.len());

        for (i, declared) in config.resources.iter().enumerate() {
            let id = ResourceId::new(&declared.resource_type, &declared.name);

            if index.insert(id.clone(), i).is_some() {
                return Err(ValidationError::DuplicateResource { id: id.to_string() });
            }

            if !self.catalog.supports(&declared.resource_type) {
                return Err(ValidationError::UnsupportedResourceType {
                    id: id.to_string(),
                    resource_type: declared.resource_type.clone(),
                });
            }

            let mut attributes = BTreeMap::new();
            for (key, raw) in &declared.attributes {
                let expr = Expr::parse(raw).map_err(|expression| {
                    ValidationError::MalformedReference {
                        resource: id.to_string(),
                        expression,
                    }
                })?;
                let bound = expr.bind_variables(&variables).map_err(|name| {
                    ValidationError::UndeclaredVariable {
                        resource: id.to_string(),
                        name,
                    }
                })?;
                attributes.insert(key.clone(), bound);
            }

            resources.push(DesiredResource {
                id,
                index: i,
                attributes,
                dependencies: BTreeSet::new(),
            });
        }

        // Edges can only be checked once every identity is known
        for (i, declared) in config.resources.iter().enumerate() {
            let mut dependencies = BTreeSet::new();
            let resource = &resources[i];

            for reference in resource.attributes.values().flat_map(Expr::references) {
                if let Some(target) = reference.target() {
                    if !index.contains_key(target) {
                        return Err(ValidationError::UnresolvedReference {
                            resource: resource.id.to_string(),
                            reference: reference.to_string(),
                        });
                    }
                    dependencies.insert(target.clone());
                }
            }

            for dep in &declared.depends_on {
                let target = ResourceId::parse(dep).map_err(|_| {
                    ValidationError::MalformedReference {
                        resource: resource.id.to_string(),
                        expression: dep.clone(),
                    }
                })?;
                if !index.contains_key(&target) {
                    return Err(ValidationError::UnresolvedReference {
                        resource: resource.id.to_string(),
                        reference: dep.clone(),
                    });
                }
                dependencies.insert(target);
            }

            resources[i].dependencies = dependencies;
        }

        let outputs = build_outputs(config, &variables, &index)?;
        let order = topological_order(&resources, &index)?;

        debug!(
            "Built desired graph: {} resources, {} variables, {} outputs",
            resources.len(),
            variables.len(),
            outputs.len()
        );

        Ok(DesiredGraph {
            resources,
            index,
            variables,
            outputs,
            order,
        })
    }
}

/// Resolves every declared variable from overrides or defaults.
fn resolve_variables(
    config: &DeployConfig,
    overrides: &BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>, ValidationError> {
    let mut resolved = BTreeMap::new();

    for (name, declared) in &config.variables {
        let value = overrides
            .get(name)
            .or(declared.default.as_ref())
            .cloned()
            .ok_or_else(|| ValidationError::MissingVariable { name: name.clone() })?;

        if !declared.var_type.accepts(&value) {
            return Err(ValidationError::VariableTypeMismatch {
                name: name.clone(),
                expected: declared.var_type.to_string(),
                found: value_kind(&value).to_string(),
            });
        }

        resolved.insert(name.clone(), value);
    }

    for name in overrides.keys() {
        if !config.variables.contains_key(name) {
            warn!("Ignoring value for undeclared variable '{name}'");
        }
    }

    Ok(resolved)
}

fn build_outputs(
    config: &DeployConfig,
    variables: &BTreeMap<String, Value>,
    index: &HashMap<ResourceId, usize>,
) -> Result<BTreeMap<String, DesiredOutput>, ValidationError> {
    let mut outputs = BTreeMap::new();

    for (name, declared) in &config.outputs {
        let holder = format!("output.{name}");
        let value = Expr::parse(&declared.value)
            .map_err(|expression| ValidationError::MalformedReference {
                resource: holder.clone(),
                expression,
            })?
            .bind_variables(variables)
            .map_err(|var| ValidationError::UndeclaredVariable {
                resource: holder.clone(),
                name: var,
            })?;

        if let Some(dangling) = value
            .references()
            .into_iter()
            .find(|r| r.target().is_some_and(|t| !index.contains_key(t)))
        {
            return Err(ValidationError::UnresolvedReference {
                resource: holder,
                reference: dangling.to_string(),
            });
        }

        outputs.insert(
            name.clone(),
            DesiredOutput {
                value,
                description: declared.description.clone(),
                sensitive: declared.sensitive,
            },
        );
    }

    Ok(outputs)
}

/// Orders resources so dependencies come first (Kahn's algorithm).
///
/// Ready resources are taken in declaration order. If some resources can
/// never become ready, a depth-first walk over them names the cycle.
fn topological_order(
    resources: &[DesiredResource],
    index: &HashMap<ResourceId, usize>,
) -> Result<Vec<usize>, ValidationError> {
    let mut in_degree: Vec<usize> = resources.iter().map(|r| r.dependencies.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];
    for (i, resource) in resources.iter().enumerate() {
        for dep in &resource.dependencies {
            dependents[index[dep]].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..resources.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(resources.len());

    while let Some(current) = ready.pop_first() {
        order.push(current);
        for &dependent in &dependents[current] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() == resources.len() {
        return Ok(order);
    }

    let stuck: Vec<usize> = (0..resources.len()).filter(|&i| in_degree[i] > 0).collect();
    let cycle = find_cycle(resources, index, &stuck).map_or_else(
        || {
            stuck
                .iter()
                .map(|&i| resources[i].id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        },
        |path| {
            path.iter()
                .map(|&i| resources[i].id.to_string())
                .collect::<Vec<_>>()
                .join(" -> ")
        },
    );
    Err(ValidationError::Cycle { cycle })
}

/// Finds one cycle among `candidates`, returned as a closed path.
fn find_cycle(
    resources: &[DesiredResource],
    index: &HashMap<ResourceId, usize>,
    candidates: &[usize],
) -> Option<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Unvisited,
        OnPath,
        Done,
    }

    fn visit(
        node: usize,
        resources: &[DesiredResource],
        index: &HashMap<ResourceId, usize>,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::OnPath;
        path.push(node);

        for dep in &resources[node].dependencies {
            let next = index[dep];
            match marks[next] {
                Mark::OnPath => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, resources, index, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        path.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; resources.len()];
    let mut path = Vec::new();
    candidates.iter().find_map(|&start| {
        if marks[start] == Mark::Unvisited {
            visit(start, resources, index, &mut marks, &mut path)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use serde_json::json;

    fn build(yaml: &str) -> Result<DesiredGraph, ValidationError> {
        let config = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("test config should parse");
        GraphBuilder::new(&SchemaCatalog::builtin()).build(&config, &BTreeMap::new())
    }

    const SG_ELB: &str = r#"
project:
  name: web
variables:
  server_port:
    type: number
    default: 8080
resources:
  - type: aws_elb
    name: example
    attributes:
      name: web-elb
      security_groups: ["${aws_security_group.elb.id}"]
      instance_port: "${var.server_port}"
  - type: aws_security_group
    name: elb
    attributes:
      name: web-elb-sg
outputs:
  clb_dns_name:
    value: "${aws_elb.example.dns_name}"
"#;

    #[test]
    fn test_reference_creates_edge_and_order() {
        let graph = build(SG_ELB).expect("valid graph");
        let elb = ResourceId::new("aws_elb", "example");
        let sg = ResourceId::new("aws_security_group", "elb");

        assert!(graph.get(&elb).expect("elb").dependencies.contains(&sg));
        let order: Vec<_> = graph.topological_order().map(|r| r.id.clone()).collect();
        assert_eq!(order, vec![sg.clone(), elb.clone()]);
        assert_eq!(graph.dependents_of(&sg), vec![&elb]);
    }

    #[test]
    fn test_variables_are_bound_with_type() {
        let graph = build(SG_ELB).expect("valid graph");
        let elb = graph
            .get(&ResourceId::new("aws_elb", "example"))
            .expect("elb");
        assert_eq!(
            elb.attributes["instance_port"].as_literal(),
            Some(&json!(8080))
        );
        assert_eq!(graph.variables()["server_port"], json!(8080));
    }

    #[test]
    fn test_missing_variable() {
        let err = build(
            r"
project:
  name: web
variables:
  server_port:
    type: number
",
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::MissingVariable { name } if name == "server_port"));
    }

    #[test]
    fn test_override_beats_default_and_is_type_checked() {
        let config = ConfigParser::new().parse_yaml(SG_ELB, None).expect("parse");
        let catalog = SchemaCatalog::builtin();
        let builder = GraphBuilder::new(&catalog);

        let mut overrides = BTreeMap::new();
        overrides.insert(String::from("server_port"), json!(9090));
        let graph = builder.build(&config, &overrides).expect("valid");
        assert_eq!(graph.variables()["server_port"], json!(9090));

        overrides.insert(String::from("server_port"), json!("nine"));
        let err = builder.build(&config, &overrides).unwrap_err();
        assert!(matches!(err, ValidationError::VariableTypeMismatch { .. }));
    }

    #[test]
    fn test_duplicate_resource() {
        let err = build(
            r"
project:
  name: web
resources:
  - type: aws_elb
    name: example
  - type: aws_elb
    name: example
",
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateResource { id } if id == "aws_elb.example"));
    }

    #[test]
    fn test_unresolved_reference() {
        let err = build(
            r#"
project:
  name: web
resources:
  - type: aws_elb
    name: example
    attributes:
      security_groups: ["${aws_security_group.missing.id}"]
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnresolvedReference { resource, .. } if resource == "aws_elb.example"
        ));
    }

    #[test]
    fn test_unsupported_type() {
        let err = build(
            r"
project:
  name: web
resources:
  - type: aws_instance
    name: web
",
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedResourceType { .. }));
    }

    #[test]
    fn test_cycle_names_path() {
        let err = build(
            r#"
project:
  name: web
resources:
  - type: aws_security_group
    name: a
    attributes:
      peer: "${aws_security_group.b.id}"
  - type: aws_security_group
    name: b
    depends_on: [aws_security_group.a]
"#,
        )
        .unwrap_err();
        let ValidationError::Cycle { cycle } = err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert_eq!(
            cycle,
            "aws_security_group.a -> aws_security_group.b -> aws_security_group.a"
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let err = build(
            r#"
project:
  name: web
resources:
  - type: aws_security_group
    name: a
    attributes:
      description: "${aws_security_group.a.name}"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::Cycle { .. }));
    }

    #[test]
    fn test_output_with_unknown_resource() {
        let err = build(
            r#"
project:
  name: web
outputs:
  dns:
    value: "${aws_elb.missing.dns_name}"
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnresolvedReference { resource, .. } if resource == "output.dns"
        ));
    }
}
