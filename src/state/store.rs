//! State store trait definition.
//!
//! Backends persist one [`RemoteState`] document and one lock. Saves must
//! be durable when they return: the executor only schedules dependents of a
//! resource after its record has been saved.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::RemoteState;
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state document.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<RemoteState>>;

    /// Saves the state document, replacing the stored one.
    async fn save(&self, state: &RemoteState) -> Result<()>;

    /// Deletes the state document and any lock.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the global lock.
    ///
    /// An empty `holder` is replaced by a generated process identifier.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases the global lock if `lock_id` matches the held one.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Extends the expiry of a lock this process holds.
    ///
    /// Fails with `StateError::LockLost` if the stored lock is not `lock`.
    async fn renew_lock(&self, lock: &LockInfo) -> Result<LockInfo>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked by an unexpired lock.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .get_lock_info()
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
