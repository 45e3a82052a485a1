//! Shared exclusive lock capability and the engine-side managed lock state.
mod leader_lock;
mod locker;

pub use leader_lock::*;
pub use locker::*;


///--------------------------------------
/// Trait Definition
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Exclusive lock on the shared leader object.
///
/// Contention must be reported as [`crate::LockError::Busy`]; a vanished lock
/// or object as [`crate::LockError::NotFound`] (or `Ok(None)` from
/// `get_locker`).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LockDriver: Send + Sync + 'static {
    /// Takes the lock on behalf of `owner` without waiting.
    async fn try_acquire(
        &self,
        owner: &Locker,
    ) -> Result<()>;

    async fn release(
        &self,
        owner: &Locker,
    ) -> Result<()>;

    /// Forcibly removes `locker`'s lock. With `fence` set the previous holder
    /// is blacklisted for `fence_expiry`.
    async fn break_lock(
        &self,
        locker: &Locker,
        fence: bool,
        fence_expiry: Duration,
    ) -> Result<()>;

    /// Current holder, `None` when the lock is free.
    async fn get_locker(&self) -> Result<Option<Locker>>;
}
