//! Configuration management for the leader watcher.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Environment variable overrides
//! - Configuration file support
//! - Component-wise validation
mod election;
mod fencing;
use std::env;
use std::fmt::Debug;

pub use election::*;
pub use fencing::*;


use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_LEADER_OBJECT;
use crate::Error;
use crate::Result;

/// Environment variable prefix, e.g. `LEADER__ELECTION__HEARTBEAT_INTERVAL_MS=1000`
const ENV_PREFIX: &str = "LEADER";

/// Main configuration container for a leader watcher
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone)]
pub struct LeaderWatcherConfig {
    /// Shared object every participant watches and locks
    #[serde(default = "default_object_name")]
    pub object_name: String,

    /// Heartbeat, timeout and retry tuning
    #[serde(default)]
    pub election: ElectionConfig,

    /// What happens to a holder whose lock gets broken
    #[serde(default)]
    pub fencing: FencingConfig,
}

impl Default for LeaderWatcherConfig {
    fn default() -> Self {
        Self {
            object_name: default_object_name(),
            election: ElectionConfig::default(),
            fencing: FencingConfig::default(),
        }
    }
}

impl Debug for LeaderWatcherConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LeaderWatcherConfig")
            .field("object_name", &self.object_name)
            .field("election", &self.election)
            .field("fencing", &self.fencing)
            .finish()
    }
}

impl LeaderWatcherConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `LEADER__` prefix (highest priority)
    ///
    /// # Note
    /// Validation is deferred so further overrides can be applied with
    /// `with_override_config()`. Callers MUST call `validate()` before use.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("LEADER__ELECTION__MAX_MISSED_HEARTBEATS", "3");
    /// let cfg = LeaderWatcherConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    pub fn validate(self) -> Result<Self> {
        if self.object_name.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "object_name must not be empty".into(),
            )));
        }

        self.election.validate()?;
        self.fencing.validate()?;
        Ok(self)
    }
}

fn default_object_name() -> String {
    DEFAULT_LEADER_OBJECT.to_string()
}
