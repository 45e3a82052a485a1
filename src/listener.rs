use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Application hooks around leadership changes.
///
/// Both handlers complete when they return; the engine does not advance the
/// election until they do.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// This process now owns the leader lock and its status watcher is up.
    /// Returning an error aborts the promotion and releases the lock.
    async fn post_acquire_handler(&self) -> Result<()>;

    /// This process is about to give up the leader lock.
    async fn pre_release_handler(&self) -> Result<()>;
}
