//! Streaming configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the streaming world
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Background threads decoding partition records
    pub load_workers: usize,

    /// Completed loads bound per tick in asynchronous mode
    pub max_binds_per_tick: usize,

    /// Longest wait for an outstanding load in synchronous mode
    pub synchronous_wait_millis: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            load_workers: 1,
            max_binds_per_tick: 2,
            synchronous_wait_millis: 5000,
        }
    }
}

impl StreamingConfig {
    pub fn synchronous_wait(&self) -> Duration {
        Duration::from_millis(self.synchronous_wait_millis)
    }
}
