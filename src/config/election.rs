use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::MAX_ACQUIRE_RETRY_DELAY;
use crate::Error;
use crate::Result;

/// Timing parameters of the election state machine
///
/// All delays derive from `heartbeat_interval_ms`:
/// - the leader broadcasts a heartbeat every interval
/// - a secondary gives up on a silent leader after
///   `heartbeat_interval_ms * max_missed_heartbeats`
/// - acquisition retries back off in multiples of that timeout
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ElectionConfig {
    /// Period of leader heartbeat broadcasts (milliseconds)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Heartbeats a secondary may miss before breaking the leader lock
    #[serde(default = "default_max_missed_heartbeats")]
    pub max_missed_heartbeats: u32,

    /// Busy acquisitions tolerated before escalating to a lock break
    #[serde(default = "default_max_acquire_attempts_before_break")]
    pub max_acquire_attempts_before_break: u32,

    /// Upper bound of the retry backoff multiplier
    #[serde(default = "default_max_backoff_factor")]
    pub max_backoff_factor: u32,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_missed_heartbeats: default_max_missed_heartbeats(),
            max_acquire_attempts_before_break: default_max_acquire_attempts_before_break(),
            max_backoff_factor: default_max_backoff_factor(),
        }
    }
}

impl ElectionConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "heartbeat_interval_ms must be greater than 0".into(),
            )));
        }

        if self.max_missed_heartbeats == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_missed_heartbeats must be at least 1".into(),
            )));
        }

        if self.max_backoff_factor == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_backoff_factor must be at least 1".into(),
            )));
        }

        let longest_delay = self
            .heartbeat_interval()
            .checked_mul(self.max_missed_heartbeats)
            .and_then(|timeout| timeout.checked_mul(self.max_backoff_factor));
        match longest_delay {
            Some(delay) if delay <= MAX_ACQUIRE_RETRY_DELAY => {}
            _ => {
                return Err(Error::Config(ConfigError::Message(format!(
                    "heartbeat_interval_ms * max_missed_heartbeats * max_backoff_factor must not exceed {}s",
                    MAX_ACQUIRE_RETRY_DELAY.as_secs()
                ))));
            }
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// How long a secondary waits for proof of life from the holder
    pub fn no_heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval().saturating_mul(self.max_missed_heartbeats)
    }

    /// Delay before the next acquisition attempt.
    ///
    /// Grows linearly with consecutive failed attempts and saturates at
    /// `max_backoff_factor` timeouts.
    pub fn acquire_retry_delay(
        &self,
        acquire_attempts: u32,
    ) -> Duration {
        let factor = acquire_attempts.clamp(1, self.max_backoff_factor.max(1));
        self.no_heartbeat_timeout().saturating_mul(factor)
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}
fn default_max_missed_heartbeats() -> u32 {
    2
}
fn default_max_acquire_attempts_before_break() -> u32 {
    3
}
fn default_max_backoff_factor() -> u32 {
    4
}
