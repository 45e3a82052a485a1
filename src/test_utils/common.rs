use lazy_static::lazy_static;
use tokio::time::sleep;
use tokio::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use crate::ElectionConfig;
use crate::FencingConfig;
use crate::LeaderWatcherConfig;

pub const TEST_HEARTBEAT_INTERVAL_MS: u64 = 100;

/// `heartbeat_interval * max_missed_heartbeats` of [`test_config`]
pub const TEST_NO_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(200);

lazy_static! {
    // Only initialize the subscriber once per test binary
    static ref LOGGER_INIT: () = {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    };
}

pub fn enable_logger() {
    lazy_static::initialize(&LOGGER_INIT);
}

pub fn test_config() -> LeaderWatcherConfig {
    LeaderWatcherConfig {
        object_name: "test.leader".to_string(),
        election: ElectionConfig {
            heartbeat_interval_ms: TEST_HEARTBEAT_INTERVAL_MS,
            max_missed_heartbeats: 2,
            max_acquire_attempts_before_break: 3,
            max_backoff_factor: 4,
        },
        fencing: FencingConfig::default(),
    }
}

/// Polls `condition` every millisecond of tokio time, usually paused.
pub async fn wait_until(
    timeout: Duration,
    mut condition: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(1)).await;
    }
}
