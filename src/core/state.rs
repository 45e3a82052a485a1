use tokio::sync::oneshot;

use super::Operation;
use super::TimerTask;
use crate::LeaderLock;
use crate::Locker;
use crate::Result;
use crate::WatchHandle;

/// Where the election currently is.
///
/// ```text
///  Uninitialized -> CreatingObject -> RegisteringWatch -> AcquiringLock
///  AcquiringLock -> {GettingLocker | BreakingLock} -> NotLeader -> AcquiringLock
///  AcquiringLock -> InitializingStatusWatcher -> NotifyingListenersPostAcquire
///                -> NotifyingLockAcquired -> Leader
///  Leader -> NotifyingListenersPreRelease -> ShuttingDownStatusWatcher
///         -> ReleasingLock -> NotifyingLockReleased -> NotLeader
///  (shut down) -> ShuttingDownLeaderLock -> UnregisteringWatch -> Uninitialized
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    CreatingObject,
    RegisteringWatch,
    AcquiringLock,
    GettingLocker,
    BreakingLock,
    /// Secondary, waiting on a timer or a notification
    NotLeader,
    InitializingStatusWatcher,
    NotifyingListenersPostAcquire,
    NotifyingLockAcquired,
    Leader,
    NotifyingListenersPreRelease,
    ShuttingDownStatusWatcher,
    ReleasingLock,
    NotifyingLockReleased,
    ShuttingDownLeaderLock,
    UnregisteringWatch,
}

/// Why the leader lock is being given up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseReason {
    /// `release_leader()`
    Requested,
    /// Promotion failed after the lock was taken
    Unwind,
    ShutDown,
}

/// Single mutable record of one election, guarded by one mutex.
#[derive(Debug)]
pub(crate) struct ElectionState {
    pub(crate) phase: Phase,
    pub(crate) leader_lock: LeaderLock,

    /// Consecutive failed acquisitions; drives backoff and lock breaking
    pub(crate) acquire_attempts: u32,
    /// Last known holder of the leader lock
    pub(crate) locker: Option<Locker>,
    /// Our own lock identity, known once the watch is registered
    pub(crate) owner: Option<Locker>,
    pub(crate) watch_handle: Option<WatchHandle>,

    pub(crate) timer_task: Option<TimerTask>,
    pub(crate) in_flight: Option<Operation>,

    /// Holder lookup was started to feed a lock break
    pub(crate) break_after_get_locker: bool,
    pub(crate) status_watcher_ready: bool,
    /// Listener accepted leadership and has not been told to let go yet
    pub(crate) listener_notified: bool,
    pub(crate) release_reason: Option<ReleaseReason>,
    pub(crate) release_pending: bool,
    /// The holder announced a release while an operation was in flight
    pub(crate) lock_released_pending: bool,

    pub(crate) on_finish: Option<oneshot::Sender<Result<()>>>,
    pub(crate) shutting_down: bool,
    pub(crate) on_shut_down_finish: Vec<oneshot::Sender<Result<()>>>,
    /// First failure seen while tearing down, reported to shut down callers
    pub(crate) teardown_error: Option<String>,
}

impl Default for ElectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ElectionState {
    pub(crate) fn new() -> Self {
        Self {
            phase: Phase::Uninitialized,
            leader_lock: LeaderLock::new(),
            acquire_attempts: 0,
            locker: None,
            owner: None,
            watch_handle: None,
            timer_task: None,
            in_flight: None,
            break_after_get_locker: false,
            status_watcher_ready: false,
            listener_notified: false,
            release_reason: None,
            release_pending: false,
            lock_released_pending: false,
            on_finish: None,
            shutting_down: false,
            on_shut_down_finish: Vec::new(),
            teardown_error: None,
        }
    }

    pub(crate) fn is_leader(&self) -> bool {
        self.leader_lock.is_leader()
    }

    /// Arms `task`, replacing whatever was pending
    pub(crate) fn schedule_timer_task(
        &mut self,
        task: TimerTask,
    ) -> Option<TimerTask> {
        self.timer_task.replace(task)
    }

    pub(crate) fn cancel_timer_task(&mut self) -> Option<TimerTask> {
        self.timer_task.take()
    }

    pub(crate) fn record_teardown_error(
        &mut self,
        reason: String,
    ) {
        if self.teardown_error.is_none() {
            self.teardown_error = Some(reason);
        }
    }

    /// Forgets everything tied to a single `init`..`shut_down` session
    pub(crate) fn reset_session(&mut self) {
        self.phase = Phase::Uninitialized;
        self.acquire_attempts = 0;
        self.locker = None;
        self.owner = None;
        self.watch_handle = None;
        self.timer_task = None;
        self.break_after_get_locker = false;
        self.status_watcher_ready = false;
        self.listener_notified = false;
        self.release_reason = None;
        self.release_pending = false;
        self.lock_released_pending = false;
        self.shutting_down = false;
    }
}
