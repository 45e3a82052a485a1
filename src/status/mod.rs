//! Secondary status watcher, only alive while this process leads.
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Started after the leader lock is owned and stopped strictly before it is
/// released.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusWatcher: Send + Sync + 'static {
    async fn init(&self) -> Result<()>;

    async fn shut_down(&self) -> Result<()>;
}

/// For deployments without a status subsystem
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatusWatcher;

#[async_trait]
impl StatusWatcher for NoopStatusWatcher {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn shut_down(&self) -> Result<()> {
        Ok(())
    }
}
