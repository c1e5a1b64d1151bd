//! Local file-based state storage backend.
//!
//! State lives in `<dir>/state.json` next to `<dir>/state.lock`. Saves go
//! through a synced temporary file and an atomic rename; the lock file is
//! created exclusively so two processes cannot both win it.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{HalyardError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::StateStore;
use super::types::RemoteState;

/// Default state directory name.
pub const STATE_DIR: &str = ".halyard";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store rooted at `base_dir`.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Path of the state document.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| storage("create state directory", &self.base_dir, &e))?;
        }
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage("read lock file", &self.lock_path, &e)),
        };

        let lock_info = serde_json::from_str(&content).map_err(|e| {
            HalyardError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file, failing if it already exists.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<bool> {
        self.ensure_dir().await?;

        let content = serde_json::to_vec_pretty(lock_info).map_err(|e| {
            HalyardError::State(StateError::serialization(format!(
                "Failed to serialize lock: {e}"
            )))
        })?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(lock_failed("create lock file", &e)),
        };

        file.write_all(&content)
            .await
            .map_err(|e| lock_failed("write lock file", &e))?;
        file.sync_all()
            .await
            .map_err(|e| lock_failed("sync lock file", &e))?;

        Ok(true)
    }

    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(lock_failed("delete lock file", &e)),
        }
    }
}

fn storage(what: &str, path: &Path, e: &std::io::Error) -> HalyardError {
    HalyardError::State(StateError::storage(format!(
        "Failed to {what} {}: {e}",
        path.display()
    )))
}

fn lock_failed(what: &str, e: &std::io::Error) -> HalyardError {
    HalyardError::State(StateError::LockFailed {
        message: format!("Failed to {what}: {e}"),
    })
}

/// Writes `content` to a synced temporary file and renames it over `path`.
async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| storage("create", &temp_path, &e))?;
    file.write_all(content)
        .await
        .map_err(|e| storage("write", &temp_path, &e))?;
    file.sync_all()
        .await
        .map_err(|e| storage("sync", &temp_path, &e))?;
    drop(file);

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| storage("rename into place", path, &e))
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<RemoteState>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("State file does not exist: {}", self.state_path.display());
                return Ok(None);
            }
            Err(e) => return Err(storage("read state file", &self.state_path, &e)),
        };

        debug!("Loaded state from: {}", self.state_path.display());

        let state: RemoteState = serde_json::from_str(&content).map_err(|e| {
            HalyardError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;
        state.check_version()?;

        Ok(Some(state))
    }

    async fn save(&self, state: &RemoteState) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_vec_pretty(state).map_err(|e| {
            HalyardError::State(StateError::serialization(format!(
                "Failed to serialize state: {e}"
            )))
        })?;

        write_atomic(&self.state_path, &content).await?;

        debug!("Saved state serial {} to {}", state.serial, self.state_path.display());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.state_path).await {
            Ok(()) => info!("Deleted state file: {}", self.state_path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(storage("delete state file", &self.state_path, &e)),
        }
        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(fs::try_exists(&self.state_path).await.unwrap_or(false))
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let lock_info = LockInfo::new(holder, operation);

        if self.create_lock_file(&lock_info).await? {
            info!(
                "Acquired state lock: {} (expires in {}s)",
                lock_info.lock_id, LOCK_EXPIRY_SECS
            );
            return Ok(lock_info);
        }

        match self.read_lock_file().await? {
            Some(existing) if !existing.is_expired() => {
                Err(HalyardError::State(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }))
            }
            _ => {
                warn!("Taking over expired state lock");
                self.delete_lock_file().await?;
                if self.create_lock_file(&lock_info).await? {
                    Ok(lock_info)
                } else {
                    Err(HalyardError::State(StateError::LockFailed {
                        message: String::from("Lock was taken concurrently"),
                    }))
                }
            }
        }
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            }
            Some(existing) => {
                warn!(
                    "Not releasing lock {lock_id}: held lock is {}",
                    existing.lock_id
                );
            }
            None => debug!("No lock to release"),
        }
        Ok(())
    }

    async fn renew_lock(&self, lock: &LockInfo) -> Result<LockInfo> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock.lock_id => {
                let renewed = existing.renewed();
                let content = serde_json::to_vec_pretty(&renewed).map_err(|e| {
                    HalyardError::State(StateError::serialization(format!(
                        "Failed to serialize lock: {e}"
                    )))
                })?;
                write_atomic(&self.lock_path, &content).await?;
                debug!("Renewed state lock {} until {}", renewed.lock_id, renewed.expires_at);
                Ok(renewed)
            }
            _ => Err(HalyardError::State(StateError::LockLost {
                lock_id: lock.lock_id.clone(),
            })),
        }
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
