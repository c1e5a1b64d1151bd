//! S3-based state storage backend.
//!
//! Keeps the state document and the lock as two objects under a common
//! prefix. The lock is written with `If-None-Match: *`, so only one of two
//! racing writers can create it.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::ProvideErrorMetadata;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{HalyardError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::StateStore;
use super::types::RemoteState;

/// State object key suffix.
const STATE_KEY: &str = "state.json";

/// Lock object key suffix.
const LOCK_KEY: &str = "state.lock";

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, empty or ending in `/`.
    prefix: String,
}

impl S3StateStore {
    /// Creates a store using the ambient AWS configuration.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let loader = aws_config::from_env();
        let config = match region {
            Some(region) => {
                loader
                    .region(aws_config::Region::new(region.to_string()))
                    .load()
                    .await
            }
            None => loader.load().await,
        };

        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response.body.collect().await.map_err(|e| {
                    HalyardError::State(StateError::s3(format!("Failed to read s3://{}/{key}: {e}", self.bucket)))
                })?;
                Ok(Some(bytes.to_vec()))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(HalyardError::State(StateError::s3(format!(
                        "S3 get error for {key}: {service_err}"
                    ))))
                }
            }
        }
    }

    /// Writes an object. With `exclusive`, fails if the key already exists
    /// and returns `Ok(false)`.
    async fn put_object(&self, key: &str, body: Vec<u8>, exclusive: bool) -> Result<bool> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body.into())
            .content_type("application/json");
        if exclusive {
            request = request.if_none_match("*");
        }

        match request.send().await {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let code = sdk_err.as_service_error().and_then(|e| e.code());
                if exclusive && matches!(code, Some("PreconditionFailed" | "ConditionalRequestConflict")) {
                    Ok(false)
                } else {
                    Err(HalyardError::State(StateError::s3(format!(
                        "S3 put error for {key}: {sdk_err}"
                    ))))
                }
            }
        }
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| HalyardError::State(StateError::s3(format!("S3 delete error for {key}: {e}"))))?;
        Ok(())
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        match self.get_object(&self.key(LOCK_KEY)).await? {
            Some(bytes) => parse(&bytes, "lock").map(Some),
            None => Ok(None),
        }
    }

    async fn create_lock(&self, lock_info: &LockInfo) -> Result<bool> {
        let body = serde_json::to_vec_pretty(lock_info).map_err(|e| {
            HalyardError::State(StateError::serialization(format!(
                "Failed to serialize lock: {e}"
            )))
        })?;
        self.put_object(&self.key(LOCK_KEY), body, true).await
    }
}

fn parse<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        HalyardError::State(StateError::Corrupted {
            message: format!("Failed to parse {what}: {e}"),
        })
    })
}

/// Trims slashes and appends one, so keys join cleanly.
fn normalize_prefix(prefix: Option<&str>) -> String {
    match prefix.map(|p| p.trim_matches('/')) {
        Some(p) if !p.is_empty() => format!("{p}/"),
        _ => String::new(),
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<Option<RemoteState>> {
        let key = self.key(STATE_KEY);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        let Some(bytes) = self.get_object(&key).await? else {
            debug!("No state found in S3");
            return Ok(None);
        };

        let state: RemoteState = parse(&bytes, "state")?;
        state.check_version()?;
        debug!(
            "Loaded state for {}/{} at serial {}",
            state.project, state.environment, state.serial
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &RemoteState) -> Result<()> {
        let key = self.key(STATE_KEY);

        let body = serde_json::to_vec_pretty(state).map_err(|e| {
            HalyardError::State(StateError::serialization(format!(
                "Failed to serialize state: {e}"
            )))
        })?;

        self.put_object(&key, body, false).await?;
        debug!("Saved state serial {} to s3://{}/{key}", state.serial, self.bucket);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let state_key = self.key(STATE_KEY);
        info!("Deleting state from s3://{}/{state_key}", self.bucket);

        self.delete_object(&state_key).await?;
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn exists(&self) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(STATE_KEY))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(HalyardError::State(StateError::s3(format!(
                        "S3 head error: {service_err}"
                    ))))
                }
            }
        }
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let lock_info = LockInfo::new(holder, operation);

        if !self.create_lock(&lock_info).await? {
            match self.read_lock().await? {
                Some(existing) if !existing.is_expired() => {
                    return Err(HalyardError::State(StateError::LockedByOther {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }));
                }
                _ => {
                    warn!("Taking over expired state lock");
                    self.delete_object(&self.key(LOCK_KEY)).await?;
                    if !self.create_lock(&lock_info).await? {
                        return Err(HalyardError::State(StateError::LockFailed {
                            message: String::from("Lock was taken concurrently"),
                        }));
                    }
                }
            }
        }

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );
        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_object(&self.key(LOCK_KEY)).await?;
                info!("Released state lock: {lock_id}");
            }
            Some(existing) => warn!(
                "Not releasing lock {lock_id}: held lock is {}",
                existing.lock_id
            ),
            None => debug!("No lock to release"),
        }
        Ok(())
    }

    async fn renew_lock(&self, lock: &LockInfo) -> Result<LockInfo> {
        match self.read_lock().await? {
            Some(existing) if existing.lock_id == lock.lock_id => {
                let renewed = existing.renewed();
                let body = serde_json::to_vec_pretty(&renewed).map_err(|e| {
                    HalyardError::State(StateError::serialization(format!(
                        "Failed to serialize lock: {e}"
                    )))
                })?;
                self.put_object(&self.key(LOCK_KEY), body, false).await?;
                debug!("Renewed state lock {}", renewed.lock_id);
                Ok(renewed)
            }
            _ => Err(HalyardError::State(StateError::LockLost {
                lock_id: lock.lock_id.clone(),
            })),
        }
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
