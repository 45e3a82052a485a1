//! Leader Election Error Hierarchy
//!
//! Errors are grouped by the collaborator that produced them, so the election
//! loop can tell contention (retried) apart from failures that must surface
//! through a pending continuation.

use config::ConfigError;

use crate::LockState;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Watcher configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Election engine lifecycle violations
    #[error(transparent)]
    Election(#[from] ElectionError),

    /// Shared leader lock failures
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Watch/notify transport failures
    #[error(transparent)]
    Notify(#[from] NotifyError),

    /// The application refused to take over (or hand off) leadership
    #[error("Listener failure: {0}")]
    Listener(String),

    /// Secondary status watcher could not be started or stopped
    #[error("Status watcher failure: {0}")]
    StatusWatcher(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    #[error("Leader watcher is already initialized")]
    AlreadyInitialized,

    #[error("Leader watcher is shutting down")]
    ShuttingDown,

    #[error("Leader watcher shut down failed: {0}")]
    ShutDownFailed(String),

    /// The election loop exited before answering
    #[error("Election loop is no longer running")]
    EngineStopped,

    #[error("Invalid leader lock transition from {from:?} to {to:?}")]
    InvalidLockTransition { from: LockState, to: LockState },
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Someone else owns the lock (EBUSY class)
    #[error("Leader lock is held by another participant")]
    Busy,

    /// Lock or its backing object vanished (ENOENT class)
    #[error("Leader lock not found")]
    NotFound,

    /// The holder we meant to break is no longer the holder
    #[error("Leader lock holder changed before it could be broken")]
    HolderChanged,

    /// This client has been fenced off by a previous lock break
    #[error("Client is blacklisted until {expire_secs}s after the lock break")]
    Blacklisted { expire_secs: u64 },

    #[error("Lock driver failure: {0}")]
    Driver(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to create leader object {oid}: {reason}")]
    ObjectCreation { oid: String, reason: String },

    #[error("Failed to register watch on {oid}: {reason}")]
    WatchRegistration { oid: String, reason: String },

    #[error("Failed to unregister watch {watch_id}: {reason}")]
    WatchUnregistration { watch_id: u64, reason: String },

    #[error("Broadcast on {oid} failed: {reason}")]
    Broadcast { oid: String, reason: String },

    #[error("Failed to acknowledge notification {notify_id}: {reason}")]
    Ack { notify_id: u64, reason: String },

    /// Payload (de)serialization failures
    #[error(transparent)]
    Codec(#[from] bincode::Error),
}

impl Error {
    /// Lock is busy: retried through the state machine
    pub fn is_contention(&self) -> bool {
        matches!(self, Error::Lock(LockError::Busy))
    }

    /// Lock (or its holder) vanished
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Lock(LockError::NotFound))
    }

    pub fn is_holder_changed(&self) -> bool {
        matches!(self, Error::Lock(LockError::HolderChanged))
    }
}
