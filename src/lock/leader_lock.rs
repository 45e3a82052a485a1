use tracing::trace;

use crate::ElectionError;
use crate::Result;

/// Engine-side view of the leader lock.
///
/// The lock driver only knows "held" or "free"; the engine additionally
/// needs the hook phases around acquire and release to answer
/// `is_leader()` consistently while listeners and the status watcher are
/// being brought up or torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Acquiring,
    /// Lock is owned, post-acquire hook running
    PostAcquiring,
    Locked,
    /// Pre-release hook running, lock still owned
    PreReleasing,
    Releasing,
    ShuttingDown,
    Shutdown,
}

#[derive(Debug)]
pub struct LeaderLock {
    state: LockState,
    shutting_down: bool,
}

impl Default for LeaderLock {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderLock {
    pub fn new() -> Self {
        Self {
            state: LockState::Unlocked,
            shutting_down: false,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    /// Leader iff the lock is owned and not on its way out
    pub fn is_leader(&self) -> bool {
        matches!(self.state, LockState::PostAcquiring | LockState::Locked)
    }

    pub fn is_locked(&self) -> bool {
        self.state == LockState::Locked
    }

    /// Lock is owned in any phase, including the release hooks
    pub fn is_owned(&self) -> bool {
        matches!(
            self.state,
            LockState::PostAcquiring | LockState::Locked | LockState::PreReleasing | LockState::Releasing
        )
    }

    pub fn is_shutdown(&self) -> bool {
        self.state == LockState::Shutdown
    }

    /// Back to a fresh lock for a new `init`
    pub fn reset(&mut self) {
        self.state = LockState::Unlocked;
        self.shutting_down = false;
    }

    pub fn start_acquire(&mut self) -> Result<()> {
        self.transition(&[LockState::Unlocked], LockState::Acquiring)
    }

    /// Driver answered the acquisition
    pub fn handle_acquire(
        &mut self,
        acquired: bool,
    ) -> Result<()> {
        let next = if acquired {
            LockState::PostAcquiring
        } else {
            LockState::Unlocked
        };
        self.transition(&[LockState::Acquiring], next)
    }

    /// Post-acquire hook finished successfully
    pub fn mark_locked(&mut self) -> Result<()> {
        self.transition(&[LockState::PostAcquiring], LockState::Locked)
    }

    /// Enters the pre-release hook. Idempotent while a release is underway;
    /// a shutdown request upgrades the pending release.
    pub fn start_release(
        &mut self,
        shutting_down: bool,
    ) -> Result<()> {
        if matches!(self.state, LockState::PreReleasing | LockState::Releasing) {
            self.shutting_down |= shutting_down;
            return Ok(());
        }
        self.transition(&[LockState::PostAcquiring, LockState::Locked], LockState::PreReleasing)?;
        self.shutting_down = shutting_down;
        Ok(())
    }

    /// Pre-release hook finished, the driver release is about to run
    pub fn start_unlock(&mut self) -> Result<()> {
        self.transition(&[LockState::PreReleasing], LockState::Releasing)
    }

    /// Driver release returned; the lock is considered gone either way.
    pub fn handle_release(&mut self) -> Result<()> {
        let next = if self.shutting_down {
            LockState::ShuttingDown
        } else {
            LockState::Unlocked
        };
        self.transition(&[LockState::Releasing], next)
    }

    /// No further acquisitions are allowed until `reset`
    pub fn shut_down(&mut self) -> Result<()> {
        self.transition(
            &[LockState::Unlocked, LockState::ShuttingDown, LockState::Shutdown],
            LockState::Shutdown,
        )
    }

    fn transition(
        &mut self,
        allowed: &[LockState],
        to: LockState,
    ) -> Result<()> {
        if !allowed.contains(&self.state) {
            return Err(ElectionError::InvalidLockTransition { from: self.state, to }.into());
        }
        trace!("leader lock {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }
}
