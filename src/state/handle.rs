//! Shared, serialized access to the state document during a run.
//!
//! A [`StateHandle`] owns the in-memory copy of the document for one run.
//! Every write re-reads the stored serial first: if anything else wrote the
//! state since this run loaded it, the write fails with
//! [`StateError::Conflict`] instead of overwriting.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{HalyardError, Result, StateError};
use crate::graph::ResourceId;

use super::store::StateStore;
use super::types::{RemoteState, ResourceRecord};

/// Handle to the state document shared by concurrent actions.
pub struct StateHandle {
    store: Arc<dyn StateStore>,
    document: AsyncMutex<RemoteState>,
    resource_locks: Mutex<HashMap<ResourceId, Arc<AsyncMutex<()>>>>,
}

impl StateHandle {
    /// Loads the stored document, or starts an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored document cannot be read.
    pub async fn open(store: Arc<dyn StateStore>, project: &str, environment: &str) -> Result<Self> {
        let document = match store.load().await? {
            Some(state) => {
                if state.project != project || state.environment != environment {
                    warn!(
                        "State belongs to {}/{}, configuration is {project}/{environment}",
                        state.project, state.environment
                    );
                }
                state
            }
            None => {
                debug!("No stored state, starting empty");
                RemoteState::new(project, environment)
            }
        };

        Ok(Self {
            store,
            document: AsyncMutex::new(document),
            resource_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Returns a snapshot of the document.
    pub async fn read(&self) -> RemoteState {
        self.document.lock().await.clone()
    }

    /// Waits for exclusive access to one resource.
    pub async fn lock_resource(&self, id: &ResourceId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .resource_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Records the applied state of a resource and persists it.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Conflict` if the stored document changed
    /// out-of-band, or the backend's error if the save fails.
    pub async fn write(&self, record: ResourceRecord) -> Result<()> {
        let label = record.id.to_string();
        self.commit(&label, move |doc| {
            let mut record = record;
            if let Some(previous) = doc.resources.get(&record.id) {
                record.created_at = previous.created_at;
            }
            record.updated_at = Utc::now();
            doc.resources.insert(record.id.clone(), record);
        })
        .await
    }

    /// Removes a resource record and persists the document.
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write).
    pub async fn remove(&self, id: &ResourceId) -> Result<Option<ResourceRecord>> {
        self.commit(&id.to_string(), |doc| doc.resources.remove(id))
            .await
    }

    /// Applies a document-level change (outputs, history) and persists it.
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write).
    pub async fn update<F>(&self, label: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut RemoteState) + Send,
    {
        self.commit(label, change).await
    }

    /// Backend name, for display.
    #[must_use]
    pub fn backend_type(&self) -> &'static str {
        self.store.backend_type()
    }

    async fn commit<T, F>(&self, label: &str, change: F) -> Result<T>
    where
        F: FnOnce(&mut RemoteState) -> T + Send,
    {
        let mut document = self.document.lock().await;

        let stored = self.store.load().await?;
        let (found, same_lineage) = stored
            .as_ref()
            .map_or((0, true), |s| (s.serial, s.lineage == document.lineage));
        if found != document.serial || !same_lineage {
            return Err(HalyardError::State(StateError::Conflict {
                resource: label.to_string(),
                expected: document.serial,
                found,
            }));
        }

        let mut next = document.clone();
        let out = change(&mut next);
        next.serial += 1;
        next.last_updated = Utc::now();

        self.store.save(&next).await?;
        debug!("State serial {} written for {label}", next.serial);
        *document = next;
        Ok(out)
    }
}

impl std::fmt::Debug for StateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateHandle")
            .field("backend", &self.store.backend_type())
            .finish_non_exhaustive()
    }
}
