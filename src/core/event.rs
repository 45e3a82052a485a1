use tokio::sync::oneshot;

use crate::Locker;
use crate::Result;
use crate::WatchHandle;

/// Requests from [`crate::LeaderWatcher`] handles
#[derive(Debug)]
pub(crate) enum LeaderEvent {
    Init(oneshot::Sender<Result<()>>),
    ShutDown(oneshot::Sender<Result<()>>),
    ReleaseLeader,
}

/// Collaborator calls that drive the election. At most one is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    CreateObject,
    RegisterWatch,
    AcquireLock,
    GetLocker,
    BreakLock,
    InitStatusWatcher,
    NotifyListenerPostAcquire,
    NotifyLockAcquired,
    NotifyHeartbeat,
    NotifyListenerPreRelease,
    ShutDownStatusWatcher,
    ReleaseLock,
    NotifyLockReleased,
    UnregisterWatch,
}

/// Result of an [`Operation`], fed back into the election loop
#[derive(Debug)]
pub(crate) enum Completion {
    CreateObject(Result<()>),
    RegisterWatch(Result<WatchHandle>),
    AcquireLock(Result<()>),
    GetLocker(Result<Option<Locker>>),
    BreakLock(Result<()>),
    InitStatusWatcher(Result<()>),
    NotifyListenerPostAcquire(Result<()>),
    NotifyLockAcquired(Result<()>),
    NotifyHeartbeat(Result<()>),
    NotifyListenerPreRelease(Result<()>),
    ShutDownStatusWatcher(Result<()>),
    ReleaseLock(Result<()>),
    NotifyLockReleased(Result<()>),
    UnregisterWatch(Result<()>),
}

impl Completion {
    pub(crate) fn operation(&self) -> Operation {
        match self {
            Completion::CreateObject(_) => Operation::CreateObject,
            Completion::RegisterWatch(_) => Operation::RegisterWatch,
            Completion::AcquireLock(_) => Operation::AcquireLock,
            Completion::GetLocker(_) => Operation::GetLocker,
            Completion::BreakLock(_) => Operation::BreakLock,
            Completion::InitStatusWatcher(_) => Operation::InitStatusWatcher,
            Completion::NotifyListenerPostAcquire(_) => Operation::NotifyListenerPostAcquire,
            Completion::NotifyLockAcquired(_) => Operation::NotifyLockAcquired,
            Completion::NotifyHeartbeat(_) => Operation::NotifyHeartbeat,
            Completion::NotifyListenerPreRelease(_) => Operation::NotifyListenerPreRelease,
            Completion::ShutDownStatusWatcher(_) => Operation::ShutDownStatusWatcher,
            Completion::ReleaseLock(_) => Operation::ReleaseLock,
            Completion::NotifyLockReleased(_) => Operation::NotifyLockReleased,
            Completion::UnregisterWatch(_) => Operation::UnregisterWatch,
        }
    }
}
