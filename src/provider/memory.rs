//! In-process simulated cloud.
//!
//! Assigns ids, ARNs and DNS names the way the real services do, enforces
//! per-type uniqueness, and can be told to fail specific calls so retry and
//! abort paths can be exercised without a network. With a snapshot file the
//! cloud outlives the process, so separate CLI runs see the same resources.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace};

use super::catalog::SchemaCatalog;
use super::{Attributes, Provider};
use crate::error::ProviderError;

/// Default region for the simulated cloud.
const DEFAULT_REGION: &str = "us-east-2";

/// Fixed account id used in generated ARNs.
const ACCOUNT_ID: &str = "000000000000";

/// Provider operations, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `create`
    Create,
    /// `read`
    Read,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    /// Operation performed.
    pub operation: Operation,
    /// Resource type.
    pub resource_type: String,
    /// Provider id (absent for create).
    pub id: Option<String>,
    /// Value of the `name` attribute, if any.
    pub name: Option<String>,
}

/// An injected failure.
#[derive(Debug, Clone)]
pub struct FaultRule {
    /// Only fail this operation (any if `None`).
    pub operation: Option<Operation>,
    /// Only fail calls for this type (any if `None`).
    pub resource_type: Option<String>,
    /// Error to return.
    pub error: ProviderError,
    /// How many more calls to fail.
    pub remaining: u32,
}

/// Simulated cloud provider.
#[derive(Debug)]
pub struct MemoryProvider {
    region: String,
    catalog: SchemaCatalog,
    latency: Duration,
    cloud: Mutex<Cloud>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    snapshot: Option<PathBuf>,
    /// Serializes snapshot writes so a later state never loses to an earlier one.
    persist: tokio::sync::Mutex<()>,
}

/// On-disk form of the simulated cloud.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    resources: Vec<StoredResource>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredResource {
    #[serde(rename = "type")]
    resource_type: String,
    id: String,
    attributes: Attributes,
}

#[derive(Debug, Default)]
struct Cloud {
    resources: BTreeMap<(String, String), Attributes>,
    faults: Vec<FaultRule>,
    calls: Vec<ProviderCall>,
}

impl FaultRule {
    /// Fails the next call with `error`.
    #[must_use]
    pub const fn new(error: ProviderError) -> Self {
        Self {
            operation: None,
            resource_type: None,
            error,
            remaining: 1,
        }
    }

    /// Restricts the rule to one operation.
    #[must_use]
    pub const fn on(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Restricts the rule to one resource type.
    #[must_use]
    pub fn for_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Fails `count` matching calls instead of one.
    #[must_use]
    pub const fn times(mut self, count: u32) -> Self {
        self.remaining = count;
        self
    }

    fn matches(&self, operation: Operation, resource_type: &str) -> bool {
        self.remaining > 0
            && self.operation.is_none_or(|op| op == operation)
            && self
                .resource_type
                .as_deref()
                .is_none_or(|t| t == resource_type)
    }
}

impl MemoryProvider {
    /// Creates an empty simulated cloud using the built-in catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::with_catalog(SchemaCatalog::builtin())
    }

    /// Creates an empty simulated cloud for a custom catalog.
    #[must_use]
    pub fn with_catalog(catalog: SchemaCatalog) -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            catalog,
            latency: Duration::ZERO,
            cloud: Mutex::new(Cloud::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            snapshot: None,
            persist: tokio::sync::Mutex::new(()),
        }
    }

    /// Keeps the cloud in the JSON file at `path`.
    ///
    /// Resources already in the file are loaded. Every successful create,
    /// update and delete writes the file back.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Storage` if the file exists but cannot be
    /// read or parsed.
    pub async fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let path = path.into();
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)
                    .map_err(|e| storage("parse", &path, &e))?;
                let count = snapshot.resources.len();
                let mut cloud = self.lock();
                for stored in snapshot.resources {
                    cloud
                        .resources
                        .insert((stored.resource_type, stored.id), stored.attributes);
                }
                drop(cloud);
                info!("Loaded {count} simulated resources from {}", path.display());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No simulated cloud at {} yet", path.display());
            }
            Err(e) => return Err(storage("read", &path, &e)),
        }
        self.snapshot = Some(path);
        Ok(self)
    }

    /// Sets the region used in generated ARNs and DNS names.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Delays every call, so concurrent calls overlap.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queues a failure.
    pub fn inject_fault(&self, rule: FaultRule) {
        self.lock().faults.push(rule);
    }

    /// Returns every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Returns the number of live resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    /// Returns the attributes of a live resource.
    #[must_use]
    pub fn get(&self, resource_type: &str, id: &str) -> Option<Attributes> {
        self.lock()
            .resources
            .get(&(resource_type.to_string(), id.to_string()))
            .cloned()
    }

    /// Changes an attribute behind the engine's back.
    ///
    /// Returns false if the resource does not exist.
    pub fn set_attribute(&self, resource_type: &str, id: &str, key: &str, value: Value) -> bool {
        let mut cloud = self.lock();
        match cloud
            .resources
            .get_mut(&(resource_type.to_string(), id.to_string()))
        {
            Some(attributes) => {
                attributes.insert(key.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Deletes a resource behind the engine's back.
    pub fn remove(&self, resource_type: &str, id: &str) -> Option<Attributes> {
        self.lock()
            .resources
            .remove(&(resource_type.to_string(), id.to_string()))
    }

    /// Highest number of calls observed in flight at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Writes the snapshot file, if one is configured.
    async fn persist(&self) -> Result<(), ProviderError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let _writing = self.persist.lock().await;

        let snapshot = Snapshot {
            resources: self
                .lock()
                .resources
                .iter()
                .map(|((resource_type, id), attributes)| StoredResource {
                    resource_type: resource_type.clone(),
                    id: id.clone(),
                    attributes: attributes.clone(),
                })
                .collect(),
        };
        let bytes =
            serde_json::to_vec_pretty(&snapshot).map_err(|e| storage("serialize", path, &e))?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage("create directory for", path, &e))?;
        }
        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);
        tokio::fs::write(&temp_path, &bytes)
            .await
            .map_err(|e| storage("write", &temp_path, &e))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| storage("rename into place", path, &e))?;
        trace!("Saved {} simulated resources", snapshot.resources.len());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Cloud> {
        self.cloud.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call, waits out the latency and applies any fault.
    async fn enter(
        &self,
        operation: Operation,
        resource_type: &str,
        id: Option<&str>,
        attributes: Option<&Attributes>,
    ) -> Result<(), ProviderError> {
        {
            let mut cloud = self.lock();
            cloud.calls.push(ProviderCall {
                operation,
                resource_type: resource_type.to_string(),
                id: id.map(String::from),
                name: attributes
                    .and_then(|a| a.get("name"))
                    .and_then(Value::as_str)
                    .map(String::from),
            });
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut cloud = self.lock();
        if let Some(rule) = cloud
            .faults
            .iter_mut()
            .find(|r| r.matches(operation, resource_type))
        {
            rule.remaining -= 1;
            debug!("Injected fault for {operation:?} {resource_type}: {}", rule.error);
            return Err(rule.error.clone());
        }
        Ok(())
    }

    fn check_unique(
        &self,
        cloud: &Cloud,
        resource_type: &str,
        attributes: &Attributes,
        except_id: Option<&str>,
    ) -> Result<(), ProviderError> {
        let Some(schema) = self.catalog.get(resource_type) else {
            return Ok(());
        };
        for attribute in &schema.unique {
            let Some(value) = attributes.get(attribute) else {
                continue;
            };
            let taken = cloud.resources.iter().any(|((t, id), existing)| {
                t == resource_type
                    && Some(id.as_str()) != except_id
                    && existing.get(attribute) == Some(value)
            });
            if taken {
                return Err(ProviderError::rejected(
                    409,
                    format!("{resource_type} with {attribute} {value} already exists"),
                ));
            }
        }
        Ok(())
    }

    fn arn(&self, resource_type: &str, id: &str) -> String {
        let service = match resource_type {
            "aws_autoscaling_group" => "autoscaling",
            "aws_elb" => "elasticloadbalancing",
            _ => "ec2",
        };
        let kind = resource_type.trim_start_matches("aws_");
        format!("arn:aws:{service}:{}:{ACCOUNT_ID}:{kind}/{id}", self.region)
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn create(
        &self,
        resource_type: &str,
        attributes: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        self.enter(Operation::Create, resource_type, None, Some(attributes))
            .await?;

        let Some(schema) = self.catalog.get(resource_type) else {
            return Err(ProviderError::rejected(
                400,
                format!("Unsupported resource type: {resource_type}"),
            ));
        };

        let created = {
            let mut cloud = self.lock();
            self.check_unique(&cloud, resource_type, attributes, None)?;

            let suffix = uuid::Uuid::new_v4().simple().to_string();
            let id = format!("{}-{}", schema.id_prefix, &suffix[..17]);

            let mut created = attributes.clone();
            created.insert(String::from("id"), json!(id));
            created.insert(String::from("arn"), json!(self.arn(resource_type, &id)));
            match resource_type {
                "aws_elb" => {
                    let name = attributes
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("elb");
                    created.insert(
                        String::from("dns_name"),
                        json!(format!(
                            "{name}-{}.{}.elb.amazonaws.com",
                            &suffix[..10],
                            self.region
                        )),
                    );
                    created.insert(String::from("zone_id"), json!("Z3AADJGX6KTTL2"));
                }
                "aws_launch_template" => {
                    created.insert(String::from("latest_version"), json!(1));
                }
                "aws_security_group" => {
                    created.insert(String::from("owner_id"), json!(ACCOUNT_ID));
                }
                _ => {}
            }

            trace!("Simulated create {resource_type} {id}");
            cloud
                .resources
                .insert((resource_type.to_string(), id), created.clone());
            created
        };
        self.persist().await?;
        Ok(created)
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Attributes, ProviderError> {
        self.enter(Operation::Read, resource_type, Some(id), None)
            .await?;

        self.get(resource_type, id)
            .ok_or_else(|| ProviderError::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            })
    }

    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        self.enter(Operation::Update, resource_type, Some(id), Some(attributes))
            .await?;

        let computed = self
            .catalog
            .get(resource_type)
            .map(|s| s.computed.clone())
            .unwrap_or_default();

        let updated = {
            let mut cloud = self.lock();
            self.check_unique(&cloud, resource_type, attributes, Some(id))?;

            let key = (resource_type.to_string(), id.to_string());
            let Some(existing) = cloud.resources.get(&key) else {
                return Err(ProviderError::NotFound {
                    resource_type: resource_type.to_string(),
                    id: id.to_string(),
                });
            };

            let mut updated = attributes.clone();
            for attribute in &computed {
                if let Some(value) = existing.get(attribute) {
                    updated.insert(attribute.clone(), value.clone());
                }
            }
            if let Some(version) = updated.get("latest_version").and_then(Value::as_u64) {
                updated.insert(String::from("latest_version"), json!(version + 1));
            }

            trace!("Simulated update {resource_type} {id}");
            cloud.resources.insert(key, updated.clone());
            updated
        };
        self.persist().await?;
        Ok(updated)
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), ProviderError> {
        self.enter(Operation::Delete, resource_type, Some(id), None)
            .await?;

        if self.remove(resource_type, id).is_none() {
            return Err(ProviderError::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            });
        }
        trace!("Simulated delete {resource_type} {id}");
        self.persist().await
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

fn storage(what: &str, path: &Path, e: &dyn std::fmt::Display) -> ProviderError {
    ProviderError::Storage {
        message: format!("Failed to {what} {}: {e}", path.display()),
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(name: &str) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(String::from("name"), json!(name));
        attributes
    }

    #[tokio::test]
    async fn test_create_assigns_computed_attributes() {
        let provider = MemoryProvider::new();
        let created = provider
            .create("aws_elb", &attrs("web-elb"))
            .await
            .expect("create");

        let id = created["id"].as_str().expect("id");
        assert!(id.starts_with("elb-"));
        assert!(
            created["dns_name"]
                .as_str()
                .expect("dns")
                .ends_with(".us-east-2.elb.amazonaws.com")
        );
        assert_eq!(provider.resource_count(), 1);
    }

    #[tokio::test]
    async fn test_unique_name_is_enforced() {
        let provider = MemoryProvider::new();
        provider
            .create("aws_security_group", &attrs("web"))
            .await
            .expect("first create");
        let err = provider
            .create("aws_security_group", &attrs("web"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_update_keeps_computed_fields() {
        let provider = MemoryProvider::new();
        let created = provider
            .create("aws_launch_template", &attrs("web"))
            .await
            .expect("create");
        let id = created["id"].as_str().expect("id").to_string();

        let mut changed = attrs("web");
        changed.insert(String::from("instance_type"), json!("t3.micro"));
        let updated = provider
            .update("aws_launch_template", &id, &changed)
            .await
            .expect("update");

        assert_eq!(updated["id"], json!(id));
        assert_eq!(updated["latest_version"], json!(2));
        assert_eq!(updated["instance_type"], json!("t3.micro"));
    }

    #[tokio::test]
    async fn test_fault_injection_counts_down() {
        let provider = MemoryProvider::new();
        provider.inject_fault(
            FaultRule::new(ProviderError::RateLimited { retry_after_secs: 1 })
                .on(Operation::Create)
                .times(2),
        );

        for _ in 0..2 {
            let err = provider
                .create("aws_elb", &attrs("web-elb"))
                .await
                .unwrap_err();
            assert!(err.is_transient());
        }
        provider
            .create("aws_elb", &attrs("web-elb"))
            .await
            .expect("third attempt succeeds");
        assert_eq!(provider.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let provider = MemoryProvider::new();
        let err = provider.delete("aws_elb", "elb-missing").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_carries_cloud_between_providers() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join(".halyard").join("cloud.json");

        let first = MemoryProvider::new().with_snapshot(&path).await.expect("open");
        let created = first
            .create("aws_launch_template", &attrs("web-lt"))
            .await
            .expect("create");
        let id = created["id"].as_str().expect("id").to_string();
        assert!(path.exists());

        let second = MemoryProvider::new().with_snapshot(&path).await.expect("reopen");
        assert_eq!(second.read("aws_launch_template", &id).await.expect("read"), created);
        let updated = second
            .update("aws_launch_template", &id, &attrs("web-lt"))
            .await
            .expect("update");
        assert_eq!(updated["latest_version"], json!(2));

        let third = MemoryProvider::new().with_snapshot(&path).await.expect("reopen");
        assert_eq!(third.get("aws_launch_template", &id), Some(updated));
        third.delete("aws_launch_template", &id).await.expect("delete");

        let fourth = MemoryProvider::new().with_snapshot(&path).await.expect("reopen");
        assert_eq!(fourth.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupted_snapshot_is_rejected() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("cloud.json");
        std::fs::write(&path, "not json").expect("write");

        let err = MemoryProvider::new().with_snapshot(&path).await.unwrap_err();
        assert!(matches!(err, ProviderError::Storage { .. }));
    }
}
