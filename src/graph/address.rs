//! Resource identities.

use serde::{Deserialize, Serialize};

/// Identity of a resource: its type and name, rendered `type.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    /// Resource type, e.g. `aws_security_group`.
    pub resource_type: String,
    /// Resource name within its type.
    pub name: String,
}

impl ResourceId {
    /// Creates a resource identity.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Parses a `type.name` address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not have exactly two
    /// non-empty, dot-separated parts.
    pub fn parse(address: &str) -> Result<Self, String> {
        match address.split_once('.') {
            Some((t, n)) if !t.is_empty() && !n.is_empty() && !n.contains('.') => {
                Ok(Self::new(t, n))
            }
            _ => Err(format!(
                "Invalid resource address: {address}. Expected format: TYPE.NAME"
            )),
        }
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}
