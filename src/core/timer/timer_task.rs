use tokio::time::Duration;
use tokio::time::Instant;

/// What a fired timer drives the election into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerAction {
    AcquireLeaderLock,
    GetLocker,
    /// No heartbeat arrived in time: the holder is presumed dead
    BreakLeaderLock,
    NotifyHeartbeat,
}

/// The single outstanding delayed task of an election.
///
/// Owned by the election state; cancelling is dropping it, which is
/// synchronous with respect to the election loop.
#[derive(Debug, Clone)]
pub(crate) struct TimerTask {
    pub(crate) name: &'static str,
    pub(crate) next_deadline: Instant,
    /// Only fire if `is_leader()` still equals this when the deadline passes
    pub(crate) leader: bool,
    pub(crate) action: TimerAction,
}

impl TimerTask {
    pub(crate) fn new(
        name: &'static str,
        delay: Duration,
        leader: bool,
        action: TimerAction,
    ) -> Self {
        Self {
            name,
            next_deadline: Instant::now() + delay,
            leader,
            action,
        }
    }

    pub(crate) fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    pub(crate) fn remaining(&self) -> Duration {
        self.next_deadline.saturating_duration_since(Instant::now())
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.next_deadline <= Instant::now()
    }
}
