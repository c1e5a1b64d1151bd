//! Static schema catalog for supported resource types.
//!
//! The catalog tells the planner which attributes force replacement,
//! which are computed by the provider, and which are unique per type.

use std::collections::{BTreeMap, BTreeSet};

/// Schema for a single resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSchema {
    /// Resource type name.
    pub resource_type: String,
    /// Prefix used by the simulated provider for generated ids.
    pub id_prefix: String,
    /// Attributes whose change forces delete-then-create.
    pub immutable: BTreeSet<String>,
    /// Attributes assigned by the provider.
    pub computed: BTreeSet<String>,
    /// Attributes the provider enforces as unique within the type.
    pub unique: BTreeSet<String>,
}

/// Catalog of resource schemas, keyed by type.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: BTreeMap<String, ResourceSchema>,
}

impl ResourceSchema {
    /// Creates a schema with no attribute constraints.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, id_prefix: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id_prefix: id_prefix.into(),
            immutable: BTreeSet::new(),
            computed: ["id", "arn"].into_iter().map(String::from).collect(),
            unique: BTreeSet::new(),
        }
    }

    /// Marks attributes as forcing replacement.
    #[must_use]
    pub fn immutable(mut self, attributes: &[&str]) -> Self {
        self.immutable.extend(attributes.iter().map(|a| (*a).to_string()));
        self
    }

    /// Marks attributes as provider-computed.
    #[must_use]
    pub fn computed(mut self, attributes: &[&str]) -> Self {
        self.computed.extend(attributes.iter().map(|a| (*a).to_string()));
        self
    }

    /// Marks attributes as unique within the type.
    #[must_use]
    pub fn unique(mut self, attributes: &[&str]) -> Self {
        self.unique.extend(attributes.iter().map(|a| (*a).to_string()));
        self
    }

    /// Returns true if changing `attribute` forces replacement.
    #[must_use]
    pub fn forces_replacement(&self, attribute: &str) -> bool {
        self.immutable.contains(attribute)
    }

    /// Returns true if `attribute` is assigned by the provider.
    #[must_use]
    pub fn is_computed(&self, attribute: &str) -> bool {
        self.computed.contains(attribute)
    }
}

impl SchemaCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the built-in catalog for the web cluster resource types.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new()
            .with_schema(
                ResourceSchema::new("aws_security_group", "sg")
                    .immutable(&["name", "description", "vpc_id"])
                    .computed(&["owner_id"])
                    .unique(&["name"]),
            )
            .with_schema(
                ResourceSchema::new("aws_launch_template", "lt")
                    .immutable(&["name"])
                    .computed(&["latest_version"])
                    .unique(&["name"]),
            )
            .with_schema(
                ResourceSchema::new("aws_launch_configuration", "lc")
                    .immutable(&[
                        "name",
                        "image_id",
                        "instance_type",
                        "security_groups",
                        "user_data",
                    ])
                    .unique(&["name"]),
            )
            .with_schema(
                ResourceSchema::new("aws_autoscaling_group", "asg")
                    .immutable(&["name"])
                    .unique(&["name"]),
            )
            .with_schema(
                ResourceSchema::new("aws_elb", "elb")
                    .immutable(&["name", "internal"])
                    .computed(&["dns_name", "zone_id"])
                    .unique(&["name"]),
            )
    }

    /// Adds or replaces a schema.
    #[must_use]
    pub fn with_schema(mut self, schema: ResourceSchema) -> Self {
        self.schemas.insert(schema.resource_type.clone(), schema);
        self
    }

    /// Looks up the schema for a type.
    #[must_use]
    pub fn get(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.schemas.get(resource_type)
    }

    /// Returns true if the type is known.
    #[must_use]
    pub fn supports(&self, resource_type: &str) -> bool {
        self.schemas.contains_key(resource_type)
    }

    /// Returns all known type names, sorted.
    #[must_use]
    pub fn resource_types(&self) -> Vec<&str> {
        self.schemas.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_types() {
        let catalog = SchemaCatalog::builtin();
        assert!(catalog.supports("aws_security_group"));
        assert!(catalog.supports("aws_elb"));
        assert!(!catalog.supports("aws_instance"));
        assert_eq!(catalog.resource_types().len(), 5);
    }

    #[test]
    fn test_replacement_and_computed() {
        let catalog = SchemaCatalog::builtin();
        let sg = catalog.get("aws_security_group").expect("sg schema");
        assert!(sg.forces_replacement("name"));
        assert!(!sg.forces_replacement("ingress"));
        assert!(sg.is_computed("id"));

        let elb = catalog.get("aws_elb").expect("elb schema");
        assert!(elb.is_computed("dns_name"));
        assert!(elb.unique.contains("name"));
    }
}
