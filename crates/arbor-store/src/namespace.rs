//! Namespace prefixes and qualified-name normalization
//!
//! Stored names always use the prefix registered for their namespace URI.
//! A session may alias a URI under another prefix; such names are rewritten
//! to the registered prefix before they reach the database.

use crate::error::{RepositoryError, RepositoryResult};
use std::collections::HashMap;

pub const JCR_URI: &str = "http://www.jcp.org/jcr/1.0";
pub const NT_URI: &str = "http://www.jcp.org/jcr/nt/1.0";
pub const MIX_URI: &str = "http://www.jcp.org/jcr/mix/1.0";
pub const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";
pub const MI_URI: &str = "http://www.mintjams.jp/jcr/1.0";

/// Namespaces every workspace knows and nobody may remap
pub const PREDEFINED: &[(&str, &str)] = &[
    ("", ""),
    ("jcr", JCR_URI),
    ("nt", NT_URI),
    ("mix", MIX_URI),
    ("xml", XML_URI),
    ("mi", MI_URI),
];

pub fn is_predefined_prefix(prefix: &str) -> bool {
    PREDEFINED.iter().any(|(p, _)| p.eq_ignore_ascii_case(prefix))
}

pub fn is_predefined_uri(uri: &str) -> bool {
    PREDEFINED.iter().any(|(_, u)| *u == uri)
}

/// A name split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedName<'a> {
    /// `{uri}local`
    Expanded { uri: &'a str, local: &'a str },
    /// `prefix:local`, or just `local` with an empty prefix
    Prefixed { prefix: &'a str, local: &'a str },
}

/// Split a JCR name into prefix/URI and local part, validating the local part
pub fn parse_name(name: &str) -> RepositoryResult<ParsedName<'_>> {
    let parsed = if let Some(rest) = name.strip_prefix('{') {
        let end = rest
            .find('}')
            .ok_or_else(|| RepositoryError::namespace(format!("unterminated URI in name: {}", name)))?;
        ParsedName::Expanded {
            uri: &rest[..end],
            local: &rest[end + 1..],
        }
    } else {
        match name.split_once(':') {
            Some((prefix, local)) => ParsedName::Prefixed { prefix, local },
            None => ParsedName::Prefixed {
                prefix: "",
                local: name,
            },
        }
    };
    let local = match &parsed {
        ParsedName::Expanded { local, .. } | ParsedName::Prefixed { local, .. } => *local,
    };
    if local.is_empty() || local.contains(|c: char| matches!(c, '/' | '[' | ']' | '*' | '|' | ':')) {
        return Err(RepositoryError::value_format(format!("invalid name: {}", name)));
    }
    Ok(parsed)
}

/// Join a prefix and local name
pub fn qualified(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_string()
    } else {
        format!("{}:{}", prefix, local)
    }
}

/// Prefix of a stored qualified name
pub fn prefix_of(name: &str) -> &str {
    name.split_once(':').map(|(p, _)| p).unwrap_or("")
}

/// Per-session prefix/URI cache plus session-local aliases
#[derive(Debug, Clone)]
pub struct NamespaceCache {
    uris: HashMap<String, String>,
    prefixes: HashMap<String, String>,
    aliases: HashMap<String, String>,
}

impl Default for NamespaceCache {
    fn default() -> Self {
        let mut cache = Self {
            uris: HashMap::new(),
            prefixes: HashMap::new(),
            aliases: HashMap::new(),
        };
        for (prefix, uri) in PREDEFINED {
            cache.remember(prefix, uri);
        }
        cache
    }
}

impl NamespaceCache {
    pub fn remember(&mut self, prefix: &str, uri: &str) {
        self.uris.insert(prefix.to_string(), uri.to_string());
        self.prefixes.insert(uri.to_string(), prefix.to_string());
    }

    pub fn forget(&mut self, prefix: &str) {
        if let Some(uri) = self.uris.remove(prefix) {
            self.prefixes.remove(&uri);
        }
    }

    pub fn uri(&self, prefix: &str) -> Option<&str> {
        self.aliases
            .get(prefix)
            .or_else(|| self.uris.get(prefix))
            .map(String::as_str)
    }

    pub fn registered_uri(&self, prefix: &str) -> Option<&str> {
        self.uris.get(prefix).map(String::as_str)
    }

    pub fn prefix(&self, uri: &str) -> Option<&str> {
        self.prefixes.get(uri).map(String::as_str)
    }

    pub fn alias(&self, prefix: &str) -> Option<&str> {
        self.aliases.get(prefix).map(String::as_str)
    }

    /// Map `prefix` to `uri` for this session only
    pub fn set_alias(&mut self, prefix: &str, uri: &str) -> RepositoryResult<()> {
        if prefix.is_empty() || is_predefined_prefix(prefix) {
            return Err(RepositoryError::namespace(format!(
                "cannot remap predefined prefix: {}",
                prefix
            )));
        }
        if is_predefined_uri(uri) {
            return Err(RepositoryError::namespace(format!(
                "cannot alias predefined namespace: {:?}",
                uri
            )));
        }
        self.aliases.retain(|_, u| u != uri);
        self.aliases.insert(prefix.to_string(), uri.to_string());
        Ok(())
    }

    pub fn clear_aliases(&mut self) {
        self.aliases.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            parse_name("jcr:content").unwrap(),
            ParsedName::Prefixed {
                prefix: "jcr",
                local: "content"
            }
        );
        assert_eq!(
            parse_name("{http://www.jcp.org/jcr/1.0}data").unwrap(),
            ParsedName::Expanded {
                uri: JCR_URI,
                local: "data"
            }
        );
        assert_eq!(
            parse_name("plain").unwrap(),
            ParsedName::Prefixed {
                prefix: "",
                local: "plain"
            }
        );
        assert!(parse_name("bad/name").is_err());
        assert!(parse_name("jcr:").is_err());
        assert!(parse_name("{urn:x").is_err());
    }

    #[test]
    fn test_predefined_seeded() {
        let cache = NamespaceCache::default();
        assert_eq!(cache.uri("jcr"), Some(JCR_URI));
        assert_eq!(cache.prefix(MIX_URI), Some("mix"));
        assert_eq!(cache.uri(""), Some(""));
    }

    #[test]
    fn test_alias_cannot_shadow_predefined() {
        let mut cache = NamespaceCache::default();
        assert!(cache.set_alias("jcr", "urn:other").is_err());
        assert!(cache.set_alias("j", JCR_URI).is_err());

        cache.set_alias("ex", "urn:example").unwrap();
        assert_eq!(cache.uri("ex"), Some("urn:example"));
        assert_eq!(cache.registered_uri("ex"), None);
    }

    #[test]
    fn test_prefix_of() {
        assert_eq!(prefix_of("jcr:data"), "jcr");
        assert_eq!(prefix_of("data"), "");
    }
}
