//! MIME type detection for new content nodes

use crate::error::RepositoryResult;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Extension lookup with site overrides ahead of the built-in table
#[derive(Debug, Clone, Default)]
pub struct MimeTypes {
    overrides: HashMap<String, String>,
}

impl MimeTypes {
    /// Read `mime.types`-style lines: `type ext ext ...`
    ///
    /// A missing file yields an empty override table.
    pub fn load(path: &Path) -> RepositoryResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let table = Self::parse(&content);
        debug!(path = %path.display(), entries = table.overrides.len(), "Loaded MIME overrides");
        Ok(table)
    }

    pub fn parse(content: &str) -> Self {
        let mut overrides = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(mime) = parts.next() else { continue };
            for ext in parts {
                overrides.insert(ext.to_ascii_lowercase(), mime.to_string());
            }
        }
        Self { overrides }
    }

    /// Guess from a file name, trying the longest dotted suffix first
    pub fn detect(&self, file_name: &str) -> String {
        let lower = file_name.to_ascii_lowercase();
        let mut rest = lower.as_str();
        while let Some(i) = rest.find('.') {
            rest = &rest[i + 1..];
            if let Some(mime) = self.overrides.get(rest) {
                return mime.clone();
            }
        }
        mime_guess::from_path(file_name)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
    }
}
