//! Attribute expressions and `${...}` references.
//!
//! Attribute values are parsed once into an [`Expr`] tree. Variables are
//! bound while the graph is built; resource references stay symbolic until
//! the planner or executor evaluates them against planned or recorded state.

use serde_json::Value;
use std::collections::BTreeMap;

use super::address::ResourceId;
use crate::config::is_valid_identifier;

/// A parsed `${...}` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    /// `${var.name}`
    Variable(String),
    /// `${type.name.attribute}`
    Attribute {
        /// The referenced resource.
        target: ResourceId,
        /// The referenced attribute.
        attribute: String,
    },
}

/// One piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text.
    Literal(String),
    /// An interpolation.
    Reference(Reference),
}

/// A parsed attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A value without references.
    Literal(Value),
    /// A string that is exactly one interpolation; keeps the referenced type.
    Reference(Reference),
    /// A string mixing text and interpolations; renders to a string.
    Template(Vec<Segment>),
    /// A list containing references.
    List(Vec<Expr>),
    /// A mapping containing references.
    Map(BTreeMap<String, Expr>),
}

/// Outcome of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// The value is known now.
    Known(Value),
    /// The value is only known after apply.
    Unknown,
}

impl Reference {
    /// Parses the inside of a `${...}` interpolation.
    #[must_use]
    pub fn parse(expression: &str) -> Option<Self> {
        let parts: Vec<&str> = expression.trim().split('.').collect();
        match parts.as_slice() {
            ["var", name] if is_valid_identifier(name) => Some(Self::Variable((*name).to_string())),
            [resource_type, name, attribute]
                if *resource_type != "var"
                    && is_valid_identifier(resource_type)
                    && is_valid_identifier(name)
                    && is_valid_identifier(attribute) =>
            {
                Some(Self::Attribute {
                    target: ResourceId::new(*resource_type, *name),
                    attribute: (*attribute).to_string(),
                })
            }
            _ => None,
        }
    }

    /// Returns the referenced resource, if this is not a variable.
    #[must_use]
    pub const fn target(&self) -> Option<&ResourceId> {
        match self {
            Self::Attribute { target, .. } => Some(target),
            Self::Variable(_) => None,
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Variable(name) => write!(f, "${{var.{name}}}"),
            Self::Attribute { target, attribute } => write!(f, "${{{target}.{attribute}}}"),
        }
    }
}

impl Expr {
    /// Parses a raw attribute value.
    ///
    /// # Errors
    ///
    /// Returns the offending text if an interpolation is unterminated or
    /// is neither `var.NAME` nor `TYPE.NAME.ATTRIBUTE`.
    pub fn parse(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => parse_string(s),
            Value::Array(items) => {
                let items = items.iter().map(Self::parse).collect::<Result<Vec<_>, _>>()?;
                Ok(Self::List(items).fold())
            }
            Value::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::parse(v)?)))
                    .collect::<Result<BTreeMap<_, _>, String>>()?;
                Ok(Self::Map(entries).fold())
            }
            other => Ok(Self::Literal(other.clone())),
        }
    }

    /// Substitutes variable values.
    ///
    /// # Errors
    ///
    /// Returns the name of the first variable missing from `variables`.
    pub fn bind_variables(&self, variables: &BTreeMap<String, Value>) -> Result<Self, String> {
        let bound = match self {
            Self::Literal(_) | Self::Reference(Reference::Attribute { .. }) => self.clone(),
            Self::Reference(Reference::Variable(name)) => Self::Literal(
                variables.get(name).cloned().ok_or_else(|| name.clone())?,
            ),
            Self::Template(segments) => {
                let mut bound = Vec::with_capacity(segments.len());
                for segment in segments {
                    match segment {
                        Segment::Reference(Reference::Variable(name)) => {
                            let value = variables.get(name).ok_or_else(|| name.clone())?;
                            bound.push(Segment::Literal(render(value)));
                        }
                        other => bound.push(other.clone()),
                    }
                }
                Self::Template(bound)
            }
            Self::List(items) => Self::List(
                items
                    .iter()
                    .map(|item| item.bind_variables(variables))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.bind_variables(variables)?)))
                    .collect::<Result<_, String>>()?,
            ),
        };
        Ok(bound.fold())
    }

    /// Collapses subtrees that no longer contain references into literals.
    fn fold(self) -> Self {
        match self {
            Self::Template(segments) => {
                let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
                for segment in segments {
                    if let (Segment::Literal(text), Some(Segment::Literal(prev))) =
                        (&segment, merged.last_mut())
                    {
                        prev.push_str(text);
                        continue;
                    }
                    merged.push(segment);
                }
                match merged.as_slice() {
                    [] => Self::Literal(Value::String(String::new())),
                    [Segment::Literal(text)] => Self::Literal(Value::String(text.clone())),
                    _ => Self::Template(merged),
                }
            }
            Self::List(items) => {
                if items.iter().all(|i| matches!(i, Self::Literal(_))) {
                    Self::Literal(Value::Array(
                        items.into_iter().filter_map(Self::into_literal).collect(),
                    ))
                } else {
                    Self::List(items)
                }
            }
            Self::Map(entries) => {
                if entries.values().all(|v| matches!(v, Self::Literal(_))) {
                    Self::Literal(Value::Object(
                        entries
                            .into_iter()
                            .filter_map(|(k, v)| v.into_literal().map(|v| (k, v)))
                            .collect(),
                    ))
                } else {
                    Self::Map(entries)
                }
            }
            other => other,
        }
    }

    fn into_literal(self) -> Option<Value> {
        match self {
            Self::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the value if the expression contains no references.
    #[must_use]
    pub const fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Returns every reference in the expression, in source order.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Literal(_) => {}
            Self::Reference(reference) => out.push(reference),
            Self::Template(segments) => {
                for segment in segments {
                    if let Segment::Reference(reference) = segment {
                        out.push(reference);
                    }
                }
            }
            Self::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(out);
                }
            }
        }
    }

    /// Evaluates the expression, asking `lookup` for every reference.
    ///
    /// Every reference is looked up even once the result is known to be
    /// [`Resolved::Unknown`], so lookup errors are never masked.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `lookup`.
    pub fn evaluate<F, E>(&self, lookup: &mut F) -> Result<Resolved, E>
    where
        F: FnMut(&Reference) -> Result<Resolved, E>,
    {
        match self {
            Self::Literal(value) => Ok(Resolved::Known(value.clone())),
            Self::Reference(reference) => lookup(reference),
            Self::Template(segments) => {
                let mut rendered = String::new();
                let mut unknown = false;
                for segment in segments {
                    match segment {
                        Segment::Literal(text) => rendered.push_str(text),
                        Segment::Reference(reference) => match lookup(reference)? {
                            Resolved::Known(value) => rendered.push_str(&render(&value)),
                            Resolved::Unknown => unknown = true,
                        },
                    }
                }
                Ok(if unknown {
                    Resolved::Unknown
                } else {
                    Resolved::Known(Value::String(rendered))
                })
            }
            Self::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                let mut unknown = false;
                for item in items {
                    match item.evaluate(lookup)? {
                        Resolved::Known(value) => values.push(value),
                        Resolved::Unknown => unknown = true,
                    }
                }
                Ok(if unknown {
                    Resolved::Unknown
                } else {
                    Resolved::Known(Value::Array(values))
                })
            }
            Self::Map(entries) => {
                let mut values = serde_json::Map::new();
                let mut unknown = false;
                for (key, item) in entries {
                    match item.evaluate(lookup)? {
                        Resolved::Known(value) => {
                            values.insert(key.clone(), value);
                        }
                        Resolved::Unknown => unknown = true,
                    }
                }
                Ok(if unknown {
                    Resolved::Unknown
                } else {
                    Resolved::Known(Value::Object(values))
                })
            }
        }
    }
}

fn parse_string(s: &str) -> Result<Expr, String> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = s;

    while let Some(pos) = rest.find("${") {
        // `$${` is an escaped, literal `${`
        if rest[..pos].ends_with('$') {
            literal.push_str(&rest[..pos - 1]);
            literal.push_str("${");
            rest = &rest[pos + 2..];
            continue;
        }

        literal.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let Some(end) = after.find('}') else {
            return Err(rest[pos..].to_string());
        };
        let expression = &after[..end];
        let reference = Reference::parse(expression).ok_or_else(|| format!("${{{expression}}}"))?;

        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Reference(reference));
        rest = &after[end + 1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(match segments.as_slice() {
        [Segment::Reference(reference)] => Expr::Reference(reference.clone()),
        _ => Expr::Template(segments).fold(),
    })
}

/// Renders a value for string interpolation.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn known(expr: &Expr) -> Value {
        let mut lookup = |r: &Reference| -> Result<Resolved, String> {
            match r {
                Reference::Attribute { attribute, .. } if attribute == "id" => {
                    Ok(Resolved::Known(json!("sg-1234")))
                }
                Reference::Attribute { .. } => Ok(Resolved::Unknown),
                Reference::Variable(name) => Err(name.clone()),
            }
        };
        match expr.evaluate(&mut lookup).expect("evaluates") {
            Resolved::Known(v) => v,
            Resolved::Unknown => panic!("expected a known value"),
        }
    }

    #[test]
    fn test_parse_references() {
        assert_eq!(
            Reference::parse("var.server_port"),
            Some(Reference::Variable(String::from("server_port")))
        );
        assert_eq!(
            Reference::parse("aws_elb.example.dns_name"),
            Some(Reference::Attribute {
                target: ResourceId::new("aws_elb", "example"),
                attribute: String::from("dns_name"),
            })
        );
        assert_eq!(Reference::parse("var.a.b"), None);
        assert_eq!(Reference::parse("aws_elb.example"), None);
    }

    #[test]
    fn test_whole_string_reference_keeps_type() {
        let expr = Expr::parse(&json!("${var.server_port}")).expect("parse");
        let mut vars = BTreeMap::new();
        vars.insert(String::from("server_port"), json!(8080));
        assert_eq!(
            expr.bind_variables(&vars).expect("bind"),
            Expr::Literal(json!(8080))
        );
    }

    #[test]
    fn test_interpolation_renders_string() {
        let expr = Expr::parse(&json!("port-${var.server_port}/tcp")).expect("parse");
        let mut vars = BTreeMap::new();
        vars.insert(String::from("server_port"), json!(8080));
        assert_eq!(
            expr.bind_variables(&vars).expect("bind"),
            Expr::Literal(json!("port-8080/tcp"))
        );
    }

    #[test]
    fn test_missing_variable_is_reported() {
        let expr = Expr::parse(&json!(["${var.nope}"])).expect("parse");
        assert_eq!(expr.bind_variables(&BTreeMap::new()), Err(String::from("nope")));
    }

    #[test]
    fn test_malformed_reference() {
        assert!(Expr::parse(&json!("${aws_elb}")).is_err());
        assert!(Expr::parse(&json!("${var.x")).is_err());
    }

    #[test]
    fn test_escaped_interpolation_is_literal() {
        let expr = Expr::parse(&json!("echo $${HOME}")).expect("parse");
        assert_eq!(expr, Expr::Literal(json!("echo ${HOME}")));
    }

    #[test]
    fn test_nested_references_are_collected() {
        let expr = Expr::parse(&json!({
            "groups": ["${aws_security_group.elb.id}"],
            "port": 80
        }))
        .expect("parse");
        let refs = expr.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(
            refs[0].target(),
            Some(&ResourceId::new("aws_security_group", "elb"))
        );
        assert_eq!(known(&expr), json!({"groups": ["sg-1234"], "port": 80}));
    }

    #[test]
    fn test_unknown_propagates() {
        let expr = Expr::parse(&json!("http://${aws_elb.example.dns_name}")).expect("parse");
        let mut lookup = |_: &Reference| -> Result<Resolved, String> { Ok(Resolved::Unknown) };
        assert_eq!(expr.evaluate(&mut lookup), Ok(Resolved::Unknown));
    }
}
