use std::time::Duration;

// -
// Leader object

/// Shared object every participant watches and locks
pub(crate) const DEFAULT_LEADER_OBJECT: &str = "leader_watcher.leader";

/// Lock cookies are `"<prefix> <watch id>"`
pub(crate) const LOCK_COOKIE_PREFIX: &str = "auto";

// -
// Notification codec

pub(crate) const NOTIFY_MESSAGE_VERSION: u8 = 1;

pub(crate) const NOTIFY_OP_HEARTBEAT: u32 = 0;
pub(crate) const NOTIFY_OP_LOCK_ACQUIRED: u32 = 1;
pub(crate) const NOTIFY_OP_LOCK_RELEASED: u32 = 2;

// -
// Election timing

/// Ceiling of any delay derived from the election config
pub(crate) const MAX_ACQUIRE_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);
