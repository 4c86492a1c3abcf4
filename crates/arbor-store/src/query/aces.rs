//! Access-control entry rows

use super::WorkspaceQuery;
use crate::acl::{AccessControlEntry, NodeEntries};
use crate::error::RepositoryResult;
use crate::path;
use rusqlite::params;

pub struct AceQuery<'q> {
    query: &'q WorkspaceQuery,
}

impl<'q> AceQuery<'q> {
    pub(super) fn new(query: &'q WorkspaceQuery) -> Self {
        Self { query }
    }

    /// A node's own entries in order
    pub fn entries(&self, item_id: &str) -> RepositoryResult<Vec<AccessControlEntry>> {
        let mut stmt = self.query.conn().prepare_cached(
            r#"
            SELECT principal_name, is_group, privilege_names, is_allow
            FROM aces WHERE item_id = ?1 ORDER BY row_no
            "#,
        )?;
        let raw = stmt
            .query_map([item_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(principal, is_group, privileges, allow)| {
                Ok(AccessControlEntry {
                    principal,
                    is_group,
                    privileges: serde_json::from_str(&privileges)?,
                    allow,
                })
            })
            .collect()
    }

    /// Replace a node's entries; row numbers restart at 1
    pub fn replace(&self, item_id: &str, entries: &[AccessControlEntry]) -> RepositoryResult<()> {
        self.delete(item_id)?;
        self.insert_from(item_id, 1, entries)
    }

    /// Add entries after the existing ones
    pub fn append(&self, item_id: &str, entries: &[AccessControlEntry]) -> RepositoryResult<()> {
        let last: i64 = self.query.conn().query_row(
            "SELECT COALESCE(MAX(row_no), 0) FROM aces WHERE item_id = ?1",
            [item_id],
            |row| row.get(0),
        )?;
        self.insert_from(item_id, last + 1, entries)
    }

    fn insert_from(
        &self,
        item_id: &str,
        first_row: i64,
        entries: &[AccessControlEntry],
    ) -> RepositoryResult<()> {
        let mut stmt = self.query.conn().prepare_cached(
            r#"
            INSERT INTO aces (item_id, row_no, principal_name, is_group, privilege_names, is_allow)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )?;
        for (offset, entry) in entries.iter().enumerate() {
            stmt.execute(params![
                item_id,
                first_row + offset as i64,
                entry.principal,
                entry.is_group,
                serde_json::to_string(&entry.privileges)?,
                entry.allow,
            ])?;
        }
        self.query.cache().clear_privileges();
        Ok(())
    }

    pub fn delete(&self, item_id: &str) -> RepositoryResult<usize> {
        let removed = self
            .query
            .conn()
            .execute("DELETE FROM aces WHERE item_id = ?1", [item_id])?;
        if removed > 0 {
            self.query.cache().clear_privileges();
        }
        Ok(removed)
    }

    /// Entries from `node_path` up to the root, nearest node first
    pub fn effective(&self, node_path: &str) -> RepositoryResult<Vec<NodeEntries>> {
        let paths = path::ancestors_and_self(node_path);
        let placeholders = vec!["?"; paths.len()].join(", ");
        let sql = format!(
            r#"
            SELECT i.item_path, a.principal_name, a.is_group, a.privilege_names, a.is_allow
            FROM aces a
            JOIN items i ON i.item_id = a.item_id AND i.is_deleted = 0
            WHERE i.item_path IN ({})
            ORDER BY length(i.item_path) DESC, a.row_no
            "#,
            placeholders
        );
        let mut stmt = self.query.conn().prepare(&sql)?;
        let raw = stmt
            .query_map(rusqlite::params_from_iter(paths.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut levels: Vec<NodeEntries> = Vec::new();
        for (item_path, principal, is_group, privileges, allow) in raw {
            let entry = AccessControlEntry {
                principal,
                is_group,
                privileges: serde_json::from_str(&privileges)?,
                allow,
            };
            match levels.last_mut() {
                Some(level) if level.path == item_path => level.entries.push(entry),
                _ => levels.push(NodeEntries {
                    path: item_path,
                    entries: vec![entry],
                }),
            }
        }
        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use crate::acl::AccessControlEntry;
    use crate::query::test_support::fixture;
    use crate::query::NodeDefinition;

    #[test]
    fn test_root_carries_type_entry() {
        let f = fixture();
        let root = f.query.root().unwrap();
        let entries = f.query.aces().entries(&root.id).unwrap();
        assert_eq!(entries, vec![AccessControlEntry::allow("everyone", true, &["jcr:read"])]);
    }

    #[test]
    fn test_effective_nearest_first() {
        let f = fixture();
        let q = &f.query;
        let a = q.create_node(&NodeDefinition::new("/a", "nt:folder")).unwrap();
        let b = q.create_node(&NodeDefinition::new("/a/b", "nt:folder")).unwrap();
        q.aces()
            .replace(&a.id, &[AccessControlEntry::deny("bob", false, &["jcr:all"])])
            .unwrap();
        q.aces()
            .append(&b.id, &[
                AccessControlEntry::allow("bob", false, &["jcr:read"]),
                AccessControlEntry::allow("eve", false, &["jcr:read"]),
            ])
            .unwrap();

        let levels = q.aces().effective("/a/b").unwrap();
        let paths: Vec<&str> = levels.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec!["/a/b", "/a", "/"]);
        assert_eq!(levels[0].entries[1].principal, "eve");

        q.aces().delete(&b.id).unwrap();
        assert_eq!(q.aces().effective("/a/b").unwrap().len(), 2);
    }
}
