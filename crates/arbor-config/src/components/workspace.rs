//! Per-workspace settings
//!
//! Session budget, connection pool sizing, cache capacity and the nodes
//! every fresh workspace is seeded with.

use crate::error::{ConfigError, ConfigResult};
use crate::loader;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Lowest accepted session budget
pub const MIN_SESSIONS: usize = 8;
/// Lowest accepted node cache capacity
pub const MIN_NODE_CACHE_SIZE: usize = 8;

/// Workspace configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Concurrent non-system sessions allowed
    pub max_sessions: usize,
    /// How long `login` waits for a free session slot
    pub login_timeout_ms: u64,
    /// How long a pool checkout waits for a free connection
    pub connection_wait_ms: u64,
    /// Connections kept open while idle; derived from `max_sessions` when unset
    pub min_idle_connections: Option<usize>,
    /// Extra connections reserved for system sessions and sweepers
    pub system_connections: usize,
    /// Nodes kept per session cache
    pub node_cache_size: usize,
    /// SQLite busy timeout
    pub busy_timeout_ms: u64,
    /// Open the database in WAL mode
    pub wal_mode: bool,
    /// Nodes created at bootstrap when missing
    pub default_nodes: Vec<DefaultNodeConfig>,
}

/// A node created at workspace bootstrap
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultNodeConfig {
    /// Absolute path
    pub path: String,
    /// Primary node type
    #[serde(default = "default_primary_type")]
    pub primary_type: String,
    /// Mixin node types
    #[serde(default)]
    pub mixin_types: Vec<String>,
}

fn default_primary_type() -> String {
    "nt:folder".to_string()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            max_sessions: 32,
            login_timeout_ms: 10_000,
            connection_wait_ms: 3_000,
            min_idle_connections: None,
            system_connections: 4,
            node_cache_size: 64,
            busy_timeout_ms: 5_000,
            wal_mode: true,
            default_nodes: Vec::new(),
        }
    }
}

impl WorkspaceConfig {
    /// Clamp floors and reject zero timeouts
    pub fn validated(mut self) -> ConfigResult<Self> {
        if self.max_sessions < MIN_SESSIONS {
            debug!(
                requested = self.max_sessions,
                floor = MIN_SESSIONS,
                "Raising max_sessions to floor"
            );
            self.max_sessions = MIN_SESSIONS;
        }
        if self.node_cache_size < MIN_NODE_CACHE_SIZE {
            self.node_cache_size = MIN_NODE_CACHE_SIZE;
        }
        if self.login_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "workspace.login_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.connection_wait_ms == 0 {
            return Err(ConfigError::invalid(
                "workspace.connection_wait_ms",
                "must be greater than zero",
            ));
        }
        for node in &self.default_nodes {
            if !node.path.starts_with('/') || node.path == "/" {
                return Err(ConfigError::invalid(
                    "workspace.default_nodes.path",
                    format!("not an absolute non-root path: {}", node.path),
                ));
            }
        }
        Ok(self)
    }

    /// Connections the pool keeps warm
    pub fn min_idle(&self) -> usize {
        self.min_idle_connections
            .unwrap_or_else(|| std::cmp::max(MIN_SESSIONS, self.max_sessions / 4))
            .min(self.max_sessions)
    }

    /// Hard ceiling on open connections
    pub fn max_connections(&self) -> usize {
        self.max_sessions + self.system_connections
    }

    /// Overlay `path` on top of `self` if the file exists
    ///
    /// Fields missing from the file keep the values already in `self`.
    pub fn with_override_file(self, path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(self);
        }
        let overrides: WorkspaceOverride = loader::load_file(path)?;
        overrides.apply(self).validated()
    }
}

/// Sparse form of [`WorkspaceConfig`] read from `etc/workspace.yml`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WorkspaceOverride {
    max_sessions: Option<usize>,
    login_timeout_ms: Option<u64>,
    connection_wait_ms: Option<u64>,
    min_idle_connections: Option<usize>,
    system_connections: Option<usize>,
    node_cache_size: Option<usize>,
    busy_timeout_ms: Option<u64>,
    wal_mode: Option<bool>,
    default_nodes: Option<Vec<DefaultNodeConfig>>,
}

impl WorkspaceOverride {
    fn apply(self, base: WorkspaceConfig) -> WorkspaceConfig {
        WorkspaceConfig {
            max_sessions: self.max_sessions.unwrap_or(base.max_sessions),
            login_timeout_ms: self.login_timeout_ms.unwrap_or(base.login_timeout_ms),
            connection_wait_ms: self.connection_wait_ms.unwrap_or(base.connection_wait_ms),
            min_idle_connections: self.min_idle_connections.or(base.min_idle_connections),
            system_connections: self.system_connections.unwrap_or(base.system_connections),
            node_cache_size: self.node_cache_size.unwrap_or(base.node_cache_size),
            busy_timeout_ms: self.busy_timeout_ms.unwrap_or(base.busy_timeout_ms),
            wal_mode: self.wal_mode.unwrap_or(base.wal_mode),
            default_nodes: self.default_nodes.unwrap_or(base.default_nodes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_min_idle_derivation() {
        let mut config = WorkspaceConfig::default();
        assert_eq!(config.min_idle(), 8);

        config.max_sessions = 100;
        assert_eq!(config.min_idle(), 25);

        config.min_idle_connections = Some(200);
        assert_eq!(config.min_idle(), 100);
    }

    #[test]
    fn test_rejects_zero_login_timeout() {
        let config = WorkspaceConfig {
            login_timeout_ms: 0,
            ..WorkspaceConfig::default()
        };
        assert!(config.validated().is_err());
    }

    #[test]
    fn test_override_file_keeps_unset_fields() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("workspace.yml");
        std::fs::write(
            &path,
            "node_cache_size: 256\ndefault_nodes:\n  - path: /content\n",
        )
        .expect("write override");

        let base = WorkspaceConfig {
            max_sessions: 12,
            ..WorkspaceConfig::default()
        };
        let merged = base.with_override_file(&path).expect("override applies");
        assert_eq!(merged.max_sessions, 12);
        assert_eq!(merged.node_cache_size, 256);
        assert_eq!(merged.default_nodes[0].primary_type, "nt:folder");
    }

    #[test]
    fn test_missing_override_file_is_noop() {
        let dir = TempDir::new().expect("tempdir");
        let base = WorkspaceConfig::default();
        let merged = base
            .clone()
            .with_override_file(&dir.path().join("absent.yml"))
            .expect("missing file is fine");
        assert_eq!(merged, base);
    }
}
