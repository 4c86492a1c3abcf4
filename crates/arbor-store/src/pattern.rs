//! Name patterns for child and property listings
//!
//! A pattern is one or more globs separated by `|`, e.g. `jcr:*|title`.
//! Whitespace around each alternative is ignored.

use crate::error::{RepositoryError, RepositoryResult};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    set: GlobSet,
}

impl NamePattern {
    pub fn new(pattern: &str) -> RepositoryResult<Self> {
        let mut builder = GlobSetBuilder::new();
        for alternative in pattern.split('|').map(str::trim).filter(|a| !a.is_empty()) {
            let glob = GlobBuilder::new(alternative)
                .literal_separator(true)
                .backslash_escape(true)
                .build()
                .map_err(|e| RepositoryError::value_format(format!("invalid pattern {:?}: {}", pattern, e)))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| RepositoryError::value_format(format!("invalid pattern {:?}: {}", pattern, e)))?;
        Ok(Self {
            source: pattern.to_string(),
            set,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, name: &str) -> bool {
        self.set.is_match(name)
    }
}
