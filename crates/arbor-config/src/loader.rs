//! File loading shared by every config section

use crate::error::{ConfigError, ConfigResult};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

/// Serialization format of a config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.yml` / `.yaml`
    Yaml,
    /// `.toml`
    Toml,
}

impl ConfigFormat {
    /// Pick the format from a file extension
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

pub(crate) fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        #[cfg(feature = "yaml")]
        ConfigFormat::Yaml => {
            // An empty YAML document deserializes as unit, not as an empty map
            if content.trim().is_empty() {
                return Ok(serde_yaml::from_str("{}")?);
            }
            Ok(serde_yaml::from_str(content)?)
        }
        #[cfg(feature = "toml")]
        ConfigFormat::Toml => Ok(toml::from_str(content)?),
        #[allow(unreachable_patterns)]
        other => Err(ConfigError::UnsupportedFormat(format!("{:?}", other))),
    }
}

pub(crate) fn load_file<T: DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    let format = ConfigFormat::from_path(path)?;
    debug!(path = %path.display(), ?format, "Loading config file");
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(&content, format)
}
