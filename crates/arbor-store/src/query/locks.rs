//! Lock rows

use super::WorkspaceQuery;
use crate::error::{RepositoryError, RepositoryResult};
use crate::path;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

/// One `locks` row, with the current path of its node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRow {
    pub item_id: String,
    pub item_path: String,
    pub token: String,
    pub created: DateTime<Utc>,
    pub is_deep: bool,
    /// Set for session-scoped locks
    pub session_id: Option<String>,
    pub principal: String,
}

const LOCK_SELECT: &str = r#"
    SELECT l.item_id, i.item_path, l.lock_token, l.lock_created, l.is_deep, l.session_id, l.principal_name
    FROM locks l
    JOIN items i ON i.item_id = l.item_id AND i.is_deleted = 0
"#;

fn row_to_lock(row: &Row) -> rusqlite::Result<LockRow> {
    let created: i64 = row.get(3)?;
    Ok(LockRow {
        item_id: row.get(0)?,
        item_path: row.get(1)?,
        token: row.get(2)?,
        created: DateTime::from_timestamp_millis(created).unwrap_or_default(),
        is_deep: row.get(4)?,
        session_id: row.get(5)?,
        principal: row.get(6)?,
    })
}

pub struct LockQuery<'q> {
    query: &'q WorkspaceQuery,
}

impl<'q> LockQuery<'q> {
    pub(super) fn new(query: &'q WorkspaceQuery) -> Self {
        Self { query }
    }

    pub fn insert(
        &self,
        item_id: &str,
        token: &str,
        is_deep: bool,
        session_id: Option<&str>,
        principal: &str,
    ) -> RepositoryResult<()> {
        self.query
            .conn()
            .execute(
                r#"
                INSERT INTO locks (item_id, lock_token, lock_created, is_deep, session_id, principal_name)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![item_id, token, Utc::now().timestamp_millis(), is_deep, session_id, principal],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    RepositoryError::lock(format!("node {} is already locked", item_id))
                }
                other => other.into(),
            })?;
        Ok(())
    }

    pub fn get(&self, item_id: &str) -> RepositoryResult<Option<LockRow>> {
        let sql = format!("{} WHERE l.item_id = ?1", LOCK_SELECT);
        let lock = self
            .query
            .conn()
            .query_row(&sql, [item_id], row_to_lock)
            .optional()?;
        Ok(lock)
    }

    pub fn by_token(&self, token: &str) -> RepositoryResult<Option<LockRow>> {
        let sql = format!("{} WHERE l.lock_token = ?1", LOCK_SELECT);
        let lock = self
            .query
            .conn()
            .query_row(&sql, [token], row_to_lock)
            .optional()?;
        Ok(lock)
    }

    /// Locks on the path itself and every ancestor, nearest first
    pub fn on_ancestors_or_self(&self, node_path: &str) -> RepositoryResult<Vec<LockRow>> {
        let paths = path::ancestors_and_self(node_path);
        let placeholders = vec!["?"; paths.len()].join(", ");
        let sql = format!(
            "{} WHERE i.item_path IN ({}) ORDER BY length(i.item_path) DESC",
            LOCK_SELECT, placeholders
        );
        let mut stmt = self.query.conn().prepare(&sql)?;
        let locks = stmt
            .query_map(rusqlite::params_from_iter(paths.iter()), row_to_lock)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(locks)
    }

    /// Locks strictly below a path
    pub fn below(&self, node_path: &str) -> RepositoryResult<Vec<LockRow>> {
        let (low, high) = path::descendant_range(node_path);
        let sql = format!(
            "{} WHERE i.item_path > ?1 AND i.item_path < ?2 ORDER BY i.item_path",
            LOCK_SELECT
        );
        let mut stmt = self.query.conn().prepare_cached(&sql)?;
        let locks = stmt
            .query_map(params![low, high], row_to_lock)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(locks)
    }

    /// Tokens of open-scoped locks a principal owns
    pub fn open_scoped_tokens(&self, principal: &str) -> RepositoryResult<Vec<String>> {
        let mut stmt = self.query.conn().prepare_cached(
            "SELECT lock_token FROM locks WHERE principal_name = ?1 AND session_id IS NULL",
        )?;
        let tokens = stmt
            .query_map([principal], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tokens)
    }

    /// Locks tied to one session
    pub fn session_scoped(&self, session_id: &str) -> RepositoryResult<Vec<LockRow>> {
        let sql = format!("{} WHERE l.session_id = ?1", LOCK_SELECT);
        let mut stmt = self.query.conn().prepare_cached(&sql)?;
        let locks = stmt
            .query_map([session_id], row_to_lock)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(locks)
    }

    pub fn touch(&self, item_id: &str) -> RepositoryResult<bool> {
        let updated = self.query.conn().execute(
            "UPDATE locks SET lock_created = ?2 WHERE item_id = ?1",
            params![item_id, Utc::now().timestamp_millis()],
        )?;
        Ok(updated > 0)
    }

    /// Drop a node's lock row; a node without one is fine
    pub fn delete(&self, item_id: &str) -> RepositoryResult<bool> {
        let removed = self
            .query
            .conn()
            .execute("DELETE FROM locks WHERE item_id = ?1", [item_id])?;
        Ok(removed > 0)
    }
}
