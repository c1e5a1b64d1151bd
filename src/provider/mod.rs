//! Provider API boundary.
//!
//! The engine reaches the cloud only through the [`Provider`] trait:
//! - [`MemoryProvider`]: in-process simulated cloud with fault injection
//! - [`HttpProvider`]: JSON REST gateway client
//!
//! [`SchemaCatalog`] describes the attribute semantics of each type.

mod catalog;
mod http;
mod memory;

pub use catalog::{ResourceSchema, SchemaCatalog};
pub use http::HttpProvider;
pub use memory::{FaultRule, MemoryProvider, Operation, ProviderCall};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ProviderError;

/// Attribute map exchanged with a provider.
pub type Attributes = BTreeMap<String, Value>;

/// A cloud provider capable of managing typed resources.
///
/// `create` and `update` return the full attribute map as the provider sees
/// it, including computed fields such as `id`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates a resource and returns its attributes.
    async fn create(
        &self,
        resource_type: &str,
        attributes: &Attributes,
    ) -> Result<Attributes, ProviderError>;

    /// Reads the current attributes of a resource.
    async fn read(&self, resource_type: &str, id: &str) -> Result<Attributes, ProviderError>;

    /// Updates a resource in place and returns its attributes.
    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> Result<Attributes, ProviderError>;

    /// Deletes a resource.
    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), ProviderError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
