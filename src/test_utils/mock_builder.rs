use std::sync::Arc;

use super::test_config;
use super::MockTypeConfig;
use crate::LeaderWatcher;
use crate::LeaderWatcherConfig;
use crate::MockListener;
use crate::MockLockDriver;
use crate::MockNotificationChannel;
use crate::MockStatusWatcher;
use crate::WatchHandle;

pub const MOCK_WATCH_ID: u64 = 1;
pub const MOCK_NOTIFIER_ID: u64 = 101;

/// Assembles a [`LeaderWatcher`] over mocked collaborators. Anything not
/// supplied gets a mock that always succeeds.
#[derive(Default)]
pub struct MockBuilder {
    pub lock_driver: Option<MockLockDriver>,
    pub channel: Option<MockNotificationChannel>,
    pub status_watcher: Option<MockStatusWatcher>,
    pub listener: Option<MockListener>,
    pub config: Option<LeaderWatcherConfig>,
}

impl MockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_driver(
        mut self,
        lock_driver: MockLockDriver,
    ) -> Self {
        self.lock_driver = Some(lock_driver);
        self
    }

    pub fn with_channel(
        mut self,
        channel: MockNotificationChannel,
    ) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_status_watcher(
        mut self,
        status_watcher: MockStatusWatcher,
    ) -> Self {
        self.status_watcher = Some(status_watcher);
        self
    }

    pub fn with_listener(
        mut self,
        listener: MockListener,
    ) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_config(
        mut self,
        config: LeaderWatcherConfig,
    ) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> LeaderWatcher<MockTypeConfig> {
        LeaderWatcher::<MockTypeConfig>::new(
            self.config.unwrap_or_else(test_config),
            Arc::new(self.lock_driver.unwrap_or_else(mock_lock_driver)),
            Arc::new(self.channel.unwrap_or_else(mock_channel)),
            Arc::new(self.status_watcher.unwrap_or_else(mock_status_watcher)),
            Arc::new(self.listener.unwrap_or_else(mock_listener)),
        )
        .expect("test config should be valid")
    }
}

/// Lock that is always free
pub fn mock_lock_driver() -> MockLockDriver {
    let mut lock_driver = MockLockDriver::new();
    lock_driver.expect_try_acquire().returning(|_| Ok(()));
    lock_driver.expect_release().returning(|_| Ok(()));
    lock_driver.expect_get_locker().returning(|| Ok(None));
    lock_driver
}

/// Channel without peers: every call succeeds and nothing is delivered
pub fn mock_channel() -> MockNotificationChannel {
    let mut channel = MockNotificationChannel::new();
    channel.expect_create_object().returning(|_| Ok(()));
    channel.expect_register_watch().returning(|_, _| {
        Ok(WatchHandle {
            watch_id: MOCK_WATCH_ID,
            notifier_id: MOCK_NOTIFIER_ID,
        })
    });
    channel.expect_unregister_watch().returning(|_| Ok(()));
    channel.expect_broadcast().returning(|_, _| Ok(()));
    channel.expect_ack().returning(|_| Ok(()));
    channel
}

pub fn mock_status_watcher() -> MockStatusWatcher {
    let mut status_watcher = MockStatusWatcher::new();
    status_watcher.expect_init().returning(|| Ok(()));
    status_watcher.expect_shut_down().returning(|| Ok(()));
    status_watcher
}

pub fn mock_listener() -> MockListener {
    let mut listener = MockListener::new();
    listener.expect_post_acquire_handler().returning(|| Ok(()));
    listener.expect_pre_release_handler().returning(|| Ok(()));
    listener
}
