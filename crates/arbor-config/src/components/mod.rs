//! Configuration components

mod gc;
mod security;
mod workspace;

pub use gc::GarbageCollectionConfig;
pub use security::SecurityConfig;
pub use workspace::{DefaultNodeConfig, WorkspaceConfig};

use crate::error::ConfigResult;
use crate::loader::{self, ConfigFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level repository configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Root directory holding `workspaces/` and `etc/`
    pub repository_path: PathBuf,
    /// Defaults applied to every workspace
    pub workspace: WorkspaceConfig,
    /// Blob reclamation settings
    pub gc: GarbageCollectionConfig,
    /// Principal handling
    pub security: SecurityConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            repository_path: PathBuf::from("repository"),
            workspace: WorkspaceConfig::default(),
            gc: GarbageCollectionConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl RepositoryConfig {
    /// Configuration rooted at the given directory, everything else default
    pub fn with_root(path: impl Into<PathBuf>) -> Self {
        Self {
            repository_path: path.into(),
            ..Self::default()
        }
    }

    /// Load from a `.yml`/`.yaml`/`.toml` file and validate
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let config: Self = loader::load_file(path.as_ref())?;
        config.validated()
    }

    /// Parse YAML text and validate
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = loader::parse_str(content, ConfigFormat::Yaml)?;
        config.validated()
    }

    /// Parse TOML text and validate
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = loader::parse_str(content, ConfigFormat::Toml)?;
        config.validated()
    }

    /// Clamp bounded values and reject unusable ones
    pub fn validated(mut self) -> ConfigResult<Self> {
        self.workspace = self.workspace.validated()?;
        self.gc.validate()?;
        Ok(self)
    }

    /// Directory holding every workspace
    pub fn workspace_root(&self) -> PathBuf {
        self.repository_path.join("workspaces")
    }

    /// Directory of a single workspace
    pub fn workspace_path(&self, name: &str) -> PathBuf {
        self.workspace_root().join(name)
    }

    /// Repository-wide `etc/` directory
    pub fn etc_path(&self) -> PathBuf {
        self.repository_path.join("etc")
    }
}
