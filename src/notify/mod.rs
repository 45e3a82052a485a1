//! Watch/notify transport capability and the leader notification payloads.
mod payload;

pub use payload::*;


///--------------------------------------
/// Trait Definition
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;

use crate::Result;

pub type NotifyId = u64;

/// Identity of a watcher on the notification channel
pub type NotifierId = u64;

/// Returned by a successful watch registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchHandle {
    pub watch_id: u64,
    /// Our own identity as seen by other watchers
    pub notifier_id: NotifierId,
}

/// One inbound broadcast, to be acknowledged exactly once
#[derive(Debug, Clone)]
pub struct InboundNotify {
    pub notify_id: NotifyId,
    pub notifier_id: NotifierId,
    pub payload: Vec<u8>,
}

/// Registration based broadcast channel bound to the leader object.
///
/// Every registered watcher, the sender included, receives each broadcast
/// through the sink handed to `register_watch`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync + 'static {
    /// Creates `oid` if absent; an existing object is not an error.
    async fn create_object(
        &self,
        oid: &str,
    ) -> Result<()>;

    async fn register_watch(
        &self,
        oid: &str,
        sink: mpsc::UnboundedSender<InboundNotify>,
    ) -> Result<WatchHandle>;

    async fn unregister_watch(
        &self,
        handle: &WatchHandle,
    ) -> Result<()>;

    async fn broadcast(
        &self,
        oid: &str,
        payload: Vec<u8>,
    ) -> Result<()>;

    async fn ack(
        &self,
        notify_id: NotifyId,
    ) -> Result<()>;
}
