//! State management module for the Halyard provisioning engine.
//!
//! This module persists the last-applied resource records, outputs and run
//! history, and guards them with a global lock:
//! - [`StateStore`] backends: local files and S3
//! - [`StateHandle`]: serialized, conflict-checked writes during a run

mod handle;
mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use handle::StateHandle;
pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LOCK_RENEW_INTERVAL, LockInfo, generate_holder_id};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{
    HistoryEntry, HistoryOperation, MAX_HISTORY, OutputValue, RemoteState, ResourceRecord,
    STATE_VERSION,
};
