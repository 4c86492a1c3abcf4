//! Persistent namespace registry rows

use super::WorkspaceQuery;
use crate::error::{RepositoryError, RepositoryResult};
use crate::namespace::{is_predefined_prefix, is_predefined_uri, PREDEFINED};
use rusqlite::{params, OptionalExtension};
use tracing::info;

pub struct NamespaceQuery<'q> {
    query: &'q WorkspaceQuery,
}

impl<'q> NamespaceQuery<'q> {
    pub(super) fn new(query: &'q WorkspaceQuery) -> Self {
        Self { query }
    }

    /// Insert the predefined namespaces if missing
    pub fn seed(&self) -> RepositoryResult<()> {
        self.query.atomic(|q| {
            for (prefix, uri) in PREDEFINED {
                q.conn().execute(
                    "INSERT OR IGNORE INTO namespaces (namespace_prefix, namespace_uri) VALUES (?1, ?2)",
                    params![prefix, uri],
                )?;
            }
            Ok(())
        })
    }

    pub fn uri(&self, prefix: &str) -> RepositoryResult<Option<String>> {
        let uri = self
            .query
            .conn()
            .query_row(
                "SELECT namespace_uri FROM namespaces WHERE namespace_prefix = ?1",
                [prefix],
                |row| row.get(0),
            )
            .optional()?;
        Ok(uri)
    }

    pub fn prefix(&self, uri: &str) -> RepositoryResult<Option<String>> {
        let prefix = self
            .query
            .conn()
            .query_row(
                "SELECT namespace_prefix FROM namespaces WHERE namespace_uri = ?1",
                [uri],
                |row| row.get(0),
            )
            .optional()?;
        Ok(prefix)
    }

    /// Every registered `(prefix, uri)` pair ordered by prefix
    pub fn all(&self) -> RepositoryResult<Vec<(String, String)>> {
        let mut stmt = self.query.conn().prepare_cached(
            "SELECT namespace_prefix, namespace_uri FROM namespaces ORDER BY namespace_prefix",
        )?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    pub fn register(&self, prefix: &str, uri: &str) -> RepositoryResult<()> {
        validate_prefix(prefix)?;
        if uri.is_empty() || is_predefined_uri(uri) {
            return Err(RepositoryError::namespace(format!(
                "cannot register namespace URI {:?}",
                uri
            )));
        }
        match self.uri(prefix)? {
            Some(existing) if existing == uri => return Ok(()),
            Some(existing) => {
                return Err(RepositoryError::namespace(format!(
                    "prefix {} is already mapped to {}",
                    prefix, existing
                )))
            }
            None => {}
        }
        if let Some(existing) = self.prefix(uri)? {
            return Err(RepositoryError::namespace(format!(
                "{} is already registered as {}",
                uri, existing
            )));
        }
        self.query.atomic(|q| {
            q.conn().execute(
                "INSERT INTO namespaces (namespace_prefix, namespace_uri) VALUES (?1, ?2)",
                params![prefix, uri],
            )?;
            Ok(())
        })?;
        self.query.namespace_cache().remember(prefix, uri);
        info!(prefix = %prefix, uri = %uri, "Namespace registered");
        Ok(())
    }

    /// Remove a mapping that no stored name uses
    pub fn unregister(&self, prefix: &str) -> RepositoryResult<()> {
        if prefix.is_empty() || is_predefined_prefix(prefix) {
            return Err(RepositoryError::namespace(format!(
                "cannot unregister predefined prefix: {}",
                prefix
            )));
        }
        if self.uri(prefix)?.is_none() {
            return Err(RepositoryError::namespace(format!("unknown prefix: {}", prefix)));
        }
        let qualified = format!("{}:", prefix);
        let in_use: bool = self.query.conn().query_row(
            r#"
            SELECT EXISTS(SELECT 1 FROM items WHERE is_deleted = 0 AND substr(item_name, 1, ?2) = ?1)
                OR EXISTS(SELECT 1 FROM properties WHERE is_deleted = 0 AND substr(item_name, 1, ?2) = ?1)
            "#,
            params![qualified, qualified.chars().count() as i64],
            |row| row.get(0),
        )?;
        if in_use {
            return Err(RepositoryError::namespace(format!(
                "prefix {} is still in use",
                prefix
            )));
        }
        self.query.atomic(|q| {
            q.conn()
                .execute("DELETE FROM namespaces WHERE namespace_prefix = ?1", [prefix])?;
            Ok(())
        })?;
        self.query.namespace_cache().forget(prefix);
        info!(prefix = %prefix, "Namespace unregistered");
        Ok(())
    }
}

fn validate_prefix(prefix: &str) -> RepositoryResult<()> {
    let reserved = prefix.len() >= 3 && prefix[..3].eq_ignore_ascii_case("xml");
    if prefix.is_empty()
        || is_predefined_prefix(prefix)
        || reserved
        || prefix.contains(|c: char| c == ':' || c == '/' || c == '{' || c == '}' || c.is_whitespace())
    {
        return Err(RepositoryError::namespace(format!(
            "invalid or reserved prefix: {:?}",
            prefix
        )));
    }
    Ok(())
}
