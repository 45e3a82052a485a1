use crate::MockListener;
use crate::MockLockDriver;
use crate::MockNotificationChannel;
use crate::MockStatusWatcher;
use crate::TypeConfig;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct MockTypeConfig;

impl TypeConfig for MockTypeConfig {
    type L = MockLockDriver;

    type N = MockNotificationChannel;

    type S = MockStatusWatcher;

    type H = MockListener;
}
