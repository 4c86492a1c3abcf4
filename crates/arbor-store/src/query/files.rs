//! Sized index over the blob store

use super::WorkspaceQuery;
use crate::error::RepositoryResult;
use rusqlite::{params, OptionalExtension};

pub struct FileQuery<'q> {
    query: &'q WorkspaceQuery,
}

impl<'q> FileQuery<'q> {
    pub(super) fn new(query: &'q WorkspaceQuery) -> Self {
        Self { query }
    }

    pub fn insert(&self, id: &str, size: u64) -> RepositoryResult<()> {
        self.query.conn().execute(
            "INSERT INTO files (file_id, file_size) VALUES (?1, ?2)",
            params![id, size as i64],
        )?;
        Ok(())
    }

    /// Mark a blob for reclamation; releasing twice is harmless
    pub fn release(&self, id: &str) -> RepositoryResult<()> {
        self.query
            .conn()
            .execute("UPDATE files SET is_deleted = 1 WHERE file_id = ?1", [id])?;
        Ok(())
    }

    pub fn size(&self, id: &str) -> RepositoryResult<Option<u64>> {
        let size: Option<i64> = self
            .query
            .conn()
            .query_row("SELECT file_size FROM files WHERE file_id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(size.map(|s| s as u64))
    }

    /// Whether any row, live or released, tracks the blob
    pub fn is_tracked(&self, id: &str) -> RepositoryResult<bool> {
        Ok(self.size(id)?.is_some())
    }

    /// Ids of released blobs awaiting reclamation
    pub fn deleted(&self) -> RepositoryResult<Vec<String>> {
        let mut stmt = self
            .query
            .conn()
            .prepare_cached("SELECT file_id FROM files WHERE is_deleted = 1 ORDER BY file_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Drop the row of a reclaimed blob
    pub fn purge(&self, id: &str) -> RepositoryResult<bool> {
        let removed = self.query.conn().execute(
            "DELETE FROM files WHERE file_id = ?1 AND is_deleted = 1",
            [id],
        )?;
        Ok(removed > 0)
    }
}
