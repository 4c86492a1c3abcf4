//! Blob reclamation settings

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// Settings for the two blob sweepers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GarbageCollectionConfig {
    /// Run the daily stale-blob collector
    pub enabled: bool,
    /// Run the commit-driven cleaner for soft-deleted blobs
    pub cleaner_enabled: bool,
    /// Seconds between collector passes
    pub interval_secs: u64,
    /// Untracked blobs younger than this are left alone
    pub min_age_secs: u64,
    /// Bound on waiting for a sweeper to stop at shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for GarbageCollectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cleaner_enabled: true,
            interval_secs: 86_400,
            min_age_secs: 86_400,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl GarbageCollectionConfig {
    pub(crate) fn validate(&self) -> ConfigResult<()> {
        if self.interval_secs == 0 {
            return Err(ConfigError::invalid("gc.interval_secs", "must be greater than zero"));
        }
        Ok(())
    }
}
