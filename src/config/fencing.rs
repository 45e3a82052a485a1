use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Fencing policy applied when a silent leader's lock is broken
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FencingConfig {
    /// Blacklist the previous holder so it can no longer touch the resource
    #[serde(default = "default_blacklist_on_break_lock")]
    pub blacklist_on_break_lock: bool,

    /// How long the blacklist entry lives (seconds)
    #[serde(default = "default_blacklist_expire_secs")]
    pub blacklist_expire_secs: u64,
}

impl Default for FencingConfig {
    fn default() -> Self {
        Self {
            blacklist_on_break_lock: default_blacklist_on_break_lock(),
            blacklist_expire_secs: default_blacklist_expire_secs(),
        }
    }
}

impl FencingConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.blacklist_on_break_lock && self.blacklist_expire_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "blacklist_expire_secs must be > 0 when blacklist_on_break_lock is enabled".into(),
            )));
        }
        Ok(())
    }

    pub fn blacklist_expire(&self) -> Duration {
        Duration::from_secs(self.blacklist_expire_secs)
    }
}

fn default_blacklist_on_break_lock() -> bool {
    true
}
fn default_blacklist_expire_secs() -> u64 {
    30
}
