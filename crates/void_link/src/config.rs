//! Link manager configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// Configuration for the link manager
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkManagerConfig {
    /// Wall-clock budget of a single tick, in milliseconds
    pub max_processing_millis: u64,

    /// Re-derive relationships when a stored back-link's referrer is resident
    pub validate_back_links: bool,

    /// Log references whose stored partition disagrees with the target
    pub warn_on_partition_mismatch: bool,
}

impl Default for LinkManagerConfig {
    fn default() -> Self {
        Self {
            max_processing_millis: 2,
            validate_back_links: true,
            warn_on_partition_mismatch: true,
        }
    }
}

impl LinkManagerConfig {
    /// Parse a configuration from TOML text. Missing keys keep defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| LinkError::Config(e.to_string()))
    }

    /// Tick budget as a duration
    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.max_processing_millis)
    }

    /// Set the tick budget
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.max_processing_millis = budget.as_millis() as u64;
        self
    }
}
