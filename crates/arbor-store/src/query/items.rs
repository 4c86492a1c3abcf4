//! Node rows: lookup, create, remove, move, copy and mixins

use super::{NodeRecord, PropertyMap, WorkspaceQuery};
use crate::acl::AccessControlEntry;
use crate::error::{RepositoryError, RepositoryResult};
use crate::journal::{EventType, JournalEvent};
use crate::node_type::{
    NodeTypeDef, PropertyDefinition, MIX_CREATED, MIX_REFERENCEABLE, MIX_SIMPLE_VERSIONABLE,
    MI_ROOT, NT_FOLDER,
};
use crate::pattern::NamePattern;
use crate::path;
use crate::value::{PropertyType, Token, Value};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub(crate) const PRIMARY_TYPE: &str = "jcr:primaryType";
pub(crate) const MIXIN_TYPES: &str = "jcr:mixinTypes";
pub(crate) const CONTENT: &str = "jcr:content";

/// Properties a copy never carries over from its source
const NOT_COPIED: &[&str] = &[
    "jcr:uuid",
    "jcr:lockOwner",
    "jcr:lockIsDeep",
    "jcr:versionHistory",
    "jcr:baseVersion",
    "jcr:predecessors",
    "mi:checkedOutBy",
];

const NODE_COLUMNS: &str = "item_id, item_name, item_path, parent_item_id";

/// A node to create
#[derive(Debug, Clone)]
pub struct NodeDefinition {
    pub path: String,
    pub primary_type: String,
    pub mixin_types: Vec<String>,
    pub identifier: Option<String>,
    pub access_control: Vec<AccessControlEntry>,
}

impl NodeDefinition {
    pub fn new(path: &str, primary_type: &str) -> Self {
        Self {
            path: path.to_string(),
            primary_type: primary_type.to_string(),
            mixin_types: Vec::new(),
            identifier: None,
            access_control: Vec::new(),
        }
    }

    pub fn mixin(mut self, name: &str) -> Self {
        self.mixin_types.push(name.to_string());
        self
    }

    pub fn identifier(mut self, id: &str) -> Self {
        self.identifier = Some(id.to_string());
        self
    }

    pub fn access_control(mut self, entry: AccessControlEntry) -> Self {
        self.access_control.push(entry);
        self
    }
}

/// What a node removal leaves in place
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    pub leave_lock: bool,
    pub leave_access_control: bool,
}

/// Outcome of a subtree copy
#[derive(Debug, Clone)]
pub struct CopyResult {
    pub root: Arc<NodeRecord>,
    /// Copied nodes that need a fresh version history
    pub versionable: Vec<String>,
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn row_to_node(row: &Row) -> rusqlite::Result<NodeRecord> {
    Ok(NodeRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        parent_id: row.get(3)?,
    })
}

impl WorkspaceQuery {
    pub fn find_node_by_id(&self, id: &str) -> RepositoryResult<Option<Arc<NodeRecord>>> {
        let cached = self.cache().node(id);
        if cached.is_some() {
            return Ok(cached);
        }
        // The node and its content child in one round trip
        let sql = format!(
            "SELECT {} FROM items WHERE is_deleted = 0 AND (item_id = ?1 OR (parent_item_id = ?1 AND item_name = ?2))",
            NODE_COLUMNS
        );
        let mut stmt = self.conn().prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![id, CONTENT], row_to_node)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.remember_nodes(rows, |n| n.id == id))
    }

    pub fn node_by_id(&self, id: &str) -> RepositoryResult<Arc<NodeRecord>> {
        self.find_node_by_id(id)?
            .ok_or_else(|| RepositoryError::not_found(format!("identifier {}", id)))
    }

    /// Look up a node by an already resolved path
    pub fn find_node_by_path(&self, node_path: &str) -> RepositoryResult<Option<Arc<NodeRecord>>> {
        let cached = self.cache().node_by_path(node_path);
        if cached.is_some() {
            return Ok(cached);
        }
        let content = path::child(node_path, CONTENT);
        let sql = format!(
            "SELECT {} FROM items WHERE is_deleted = 0 AND item_path IN (?1, ?2)",
            NODE_COLUMNS
        );
        let mut stmt = self.conn().prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![node_path, content], row_to_node)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.remember_nodes(rows, |n| n.path == node_path))
    }

    pub fn node_by_path(&self, node_path: &str) -> RepositoryResult<Arc<NodeRecord>> {
        self.find_node_by_path(node_path)?
            .ok_or_else(|| RepositoryError::not_found(node_path.to_string()))
    }

    fn remember_nodes(
        &self,
        rows: Vec<NodeRecord>,
        wanted: impl Fn(&NodeRecord) -> bool,
    ) -> Option<Arc<NodeRecord>> {
        let mut found = None;
        let mut cache = self.cache();
        for row in rows {
            let record = Arc::new(row);
            if wanted(&record) {
                found = Some(record.clone());
            }
            cache.put_node(record);
        }
        found
    }

    pub fn root(&self) -> RepositoryResult<Arc<NodeRecord>> {
        self.node_by_path(path::ROOT)
    }

    pub fn parent_of(&self, node: &NodeRecord) -> RepositoryResult<Option<Arc<NodeRecord>>> {
        match &node.parent_id {
            Some(parent_id) => self.find_node_by_id(parent_id),
            None => Ok(None),
        }
    }

    /// Children ordered by name, optionally filtered by a name pattern
    pub fn children(
        &self,
        id: &str,
        pattern: Option<&NamePattern>,
    ) -> RepositoryResult<Vec<Arc<NodeRecord>>> {
        let sql = format!(
            "SELECT {} FROM items WHERE parent_item_id = ?1 AND is_deleted = 0 ORDER BY item_name",
            NODE_COLUMNS
        );
        let mut stmt = self.conn().prepare_cached(&sql)?;
        let rows = stmt
            .query_map([id], row_to_node)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut cache = self.cache();
        Ok(rows
            .into_iter()
            .filter(|n| pattern.map(|p| p.matches(&n.name)).unwrap_or(true))
            .map(|n| {
                let record = Arc::new(n);
                cache.put_node(record.clone());
                record
            })
            .collect())
    }

    pub fn count_children(&self, id: &str) -> RepositoryResult<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM items WHERE parent_item_id = ?1 AND is_deleted = 0",
            [id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Identifiers of every live node below `node_path`
    pub fn descendant_ids(&self, node_path: &str) -> RepositoryResult<Vec<String>> {
        let (low, high) = path::descendant_range(node_path);
        let mut stmt = self.conn().prepare_cached(
            "SELECT item_id FROM items WHERE item_path > ?1 AND item_path < ?2 AND is_deleted = 0",
        )?;
        let ids = stmt
            .query_map(params![low, high], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn primary_type(&self, id: &str) -> RepositoryResult<String> {
        self.property(id, PRIMARY_TYPE)?
            .and_then(|p| p.first_inline().map(str::to_string))
            .ok_or_else(|| RepositoryError::not_found(format!("primary type of {}", id)))
    }

    pub fn mixin_types(&self, id: &str) -> RepositoryResult<Vec<String>> {
        Ok(self
            .property(id, MIXIN_TYPES)?
            .map(|p| p.inline_values().map(str::to_string).collect())
            .unwrap_or_default())
    }

    /// Whether the node's primary type or any mixin is or inherits `wanted`
    pub fn is_node_type(&self, id: &str, wanted: &str) -> RepositoryResult<bool> {
        let primary = self.primary_type(id)?;
        let mixins = self.mixin_types(id)?;
        Ok(self.types().is_node_type(&primary, &mixins, wanted))
    }

    /// Look up a type by any spelling, checking that it can be instantiated
    pub fn node_type_def(&self, name: &str, mixin: bool) -> RepositoryResult<Arc<NodeTypeDef>> {
        let resolved = self.resolve_name(name)?;
        let def = self
            .types()
            .node_type(&resolved)
            .ok_or_else(|| RepositoryError::constraint(format!("no such node type: {}", name)))?;
        if def.is_abstract {
            return Err(RepositoryError::constraint(format!(
                "node type is abstract: {}",
                def.name
            )));
        }
        if def.is_mixin != mixin {
            let expected = if mixin { "a mixin" } else { "a primary type" };
            return Err(RepositoryError::constraint(format!(
                "{} is not {}",
                def.name, expected
            )));
        }
        Ok(def)
    }

    /// Create the root node if the workspace has none
    pub fn create_root(&self) -> RepositoryResult<Arc<NodeRecord>> {
        if let Some(root) = self.find_node_by_path(path::ROOT)? {
            return Ok(root);
        }
        self.atomic(|q| {
            let id = new_id();
            q.insert_node_row(&id, "", path::ROOT, None)?;
            q.finish_create(&id, MI_ROOT, &[MIX_CREATED.to_string()], &[])
        })
    }

    /// Create a node and run post-create population
    pub fn create_node(&self, def: &NodeDefinition) -> RepositoryResult<Arc<NodeRecord>> {
        self.atomic(|q| q.create_node_inner(def))
    }

    /// Create every missing ancestor of `node_path` as a folder
    pub fn ensure_ancestors(&self, node_path: &str) -> RepositoryResult<()> {
        self.atomic(|q| {
            let mut missing = Vec::new();
            let mut current = path::parent(node_path);
            while let Some(p) = current {
                if q.find_node_by_path(p)?.is_some() {
                    break;
                }
                missing.push(p.to_string());
                current = path::parent(p);
            }
            for p in missing.iter().rev() {
                q.create_node_inner(&NodeDefinition::new(p, NT_FOLDER))?;
            }
            Ok(())
        })
    }

    fn create_node_inner(&self, def: &NodeDefinition) -> RepositoryResult<Arc<NodeRecord>> {
        let node_path = self.resolve_path(&def.path)?;
        if self.find_node_by_path(&node_path)?.is_some() {
            return Err(RepositoryError::exists(node_path));
        }
        let parent_path = path::parent(&node_path)
            .ok_or_else(|| RepositoryError::exists(path::ROOT.to_string()))?;
        let parent = self.node_by_path(parent_path)?;

        let primary = self.node_type_def(&def.primary_type, false)?;
        let mut mixins = Vec::new();
        for name in &def.mixin_types {
            let mixin = self.node_type_def(name, true)?;
            if !mixins.contains(&mixin.name) {
                mixins.push(mixin.name.clone());
            }
        }

        let id = match &def.identifier {
            Some(id) => {
                if self.find_node_by_id(id)?.is_some() {
                    return Err(RepositoryError::exists(format!("identifier {}", id)));
                }
                id.clone()
            }
            None => new_id(),
        };
        self.insert_node_row(&id, path::name(&node_path), &node_path, Some(&parent.id))?;
        self.finish_create(&id, &primary.name, &mixins, &def.access_control)
    }

    fn insert_node_row(
        &self,
        id: &str,
        name: &str,
        node_path: &str,
        parent_id: Option<&str>,
    ) -> RepositoryResult<()> {
        // A row removed earlier in this transaction may still hold the id
        self.conn()
            .execute("DELETE FROM items WHERE item_id = ?1 AND is_deleted = 1", [id])?;
        self.conn().execute(
            "INSERT INTO items (item_id, item_name, item_path, parent_item_id) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, node_path, parent_id],
        )?;
        Ok(())
    }

    fn finish_create(
        &self,
        id: &str,
        primary: &str,
        mixins: &[String],
        access_control: &[AccessControlEntry],
    ) -> RepositoryResult<Arc<NodeRecord>> {
        let node = self.node_by_id(id)?;
        self.write_tokens(
            &node,
            PRIMARY_TYPE,
            PropertyType::Name,
            vec![Token::Inline(primary.to_string())],
            false,
        )?;
        if !mixins.is_empty() {
            self.write_tokens(
                &node,
                MIXIN_TYPES,
                PropertyType::Name,
                mixins.iter().map(|m| Token::Inline(m.clone())).collect(),
                true,
            )?;
        }
        self.journal().write(
            JournalEvent::new(EventType::NodeAdded, id, &node.path)
                .primary_type(Some(primary.to_string()))
                .info(serde_json::json!({ "mixins": mixins })),
        )?;

        let types = self.types().effective_types(primary, mixins);
        self.post_create(&node, &types)?;
        if !access_control.is_empty() {
            for entry in access_control {
                entry.validate()?;
            }
            self.aces().append(id, access_control)?;
        }
        debug!(item_id = %id, path = %node.path, primary_type = %primary, "Node created");
        Ok(node)
    }

    /// Fill in autocreated properties, mandatory children and type ACEs
    pub(crate) fn post_create(
        &self,
        node: &NodeRecord,
        types: &[Arc<NodeTypeDef>],
    ) -> RepositoryResult<()> {
        let existing = self.properties(&node.id)?;
        let mut written: HashSet<String> = existing.keys().cloned().collect();

        for def in types {
            for prop in def.properties.iter().filter(|p| p.autocreated) {
                if written.contains(&prop.name) {
                    continue;
                }
                let Some(values) = self.default_values(node, prop)? else {
                    continue;
                };
                self.write_property(
                    &node.id,
                    &prop.name,
                    prop.property_type,
                    Some(values.as_slice()),
                    prop.multiple,
                )?;
                written.insert(prop.name.clone());
            }
        }

        for def in types {
            for child in &def.children {
                let child_path = path::child(&node.path, &child.name);
                if self.find_node_by_path(&child_path)?.is_none() {
                    self.create_node_inner(&NodeDefinition::new(&child_path, &child.primary_type))?;
                }
            }
        }

        let entries: Vec<AccessControlEntry> = types
            .iter()
            .flat_map(|d| d.access_control.iter())
            .map(|t| AccessControlEntry {
                principal: t.principal.clone(),
                is_group: t.is_group,
                privileges: t.privileges.clone(),
                allow: t.allow,
            })
            .collect();
        if !entries.is_empty() {
            self.aces().append(&node.id, &entries)?;
        }
        Ok(())
    }

    fn default_values(
        &self,
        node: &NodeRecord,
        prop: &PropertyDefinition,
    ) -> RepositoryResult<Option<Vec<Value>>> {
        if !prop.default_values.is_empty() {
            let values = prop
                .default_values
                .iter()
                .map(|v| Value::parse(prop.property_type, v))
                .collect::<RepositoryResult<Vec<_>>>()?;
            return Ok(Some(values));
        }
        let value = match (prop.property_type, prop.name.as_str()) {
            (PropertyType::Date, _) => Value::now(),
            (_, "jcr:createdBy" | "jcr:lastModifiedBy") => Value::String(self.user_id().to_string()),
            (_, "jcr:mimeType") => {
                let file_name = if node.name == CONTENT {
                    path::parent(&node.path).map(path::name).unwrap_or_default()
                } else {
                    node.name.as_str()
                };
                Value::String(self.mime().detect(file_name))
            }
            (_, "jcr:isCheckedOut") => Value::Boolean(true),
            (_, "jcr:uuid") => Value::String(node.id.clone()),
            _ => return Ok(None),
        };
        Ok(Some(vec![value]))
    }

    /// Depth-first removal of a node and its subtree
    pub fn remove_node(&self, id: &str, options: RemoveOptions) -> RepositoryResult<()> {
        self.atomic(|q| q.remove_node_inner(id, options))
    }

    fn remove_node_inner(&self, id: &str, options: RemoveOptions) -> RepositoryResult<()> {
        let node = self.node_by_id(id)?;
        if !options.leave_lock {
            self.locks().delete(id)?;
        }
        if !options.leave_access_control {
            self.aces().delete(id)?;
        }
        for child in self.children(id, None)? {
            self.remove_node_inner(&child.id, options)?;
        }
        let primary = self.primary_type(id).ok();

        let properties = self.properties(id)?;
        for prop in properties.values() {
            self.release_tokens(&prop.tokens)?;
        }
        self.conn().execute(
            "UPDATE properties SET is_deleted = 1 WHERE parent_item_id = ?1 AND is_deleted = 0",
            [id],
        )?;
        self.conn()
            .execute("UPDATE items SET is_deleted = 1 WHERE item_id = ?1", [id])?;
        self.cache().remove(id);

        self.journal()
            .write(JournalEvent::new(EventType::NodeRemoved, id, &node.path).primary_type(primary))?;
        debug!(item_id = %id, path = %node.path, "Node removed");
        Ok(())
    }

    /// Move a node, rewriting the path of every descendant
    pub fn move_node(&self, id: &str, destination: &str) -> RepositoryResult<Arc<NodeRecord>> {
        self.atomic(|q| q.move_node_inner(id, destination))
    }

    fn move_node_inner(&self, id: &str, destination: &str) -> RepositoryResult<Arc<NodeRecord>> {
        let node = self.node_by_id(id)?;
        if node.parent_id.is_none() {
            return Err(RepositoryError::constraint("cannot move the root node"));
        }
        let dest = self.resolve_path(destination)?;
        if dest == node.path || path::is_descendant(&dest, &node.path) {
            return Err(RepositoryError::constraint(format!(
                "cannot move {} into itself",
                node.path
            )));
        }
        if self.find_node_by_path(&dest)?.is_some() {
            return Err(RepositoryError::exists(dest));
        }
        let dest_parent_path = path::parent(&dest)
            .ok_or_else(|| RepositoryError::exists(path::ROOT.to_string()))?;
        let dest_parent = self.node_by_path(dest_parent_path)?;

        let touched = self.descendant_ids(&node.path)?;
        let (low, high) = path::descendant_range(&node.path);
        let keep_from = node.path.chars().count() as i64 + 1;

        self.conn().execute(
            "UPDATE items SET item_name = ?2, item_path = ?3, parent_item_id = ?4 WHERE item_id = ?1",
            params![id, path::name(&dest), dest, dest_parent.id],
        )?;
        self.conn().execute(
            r#"
            UPDATE items SET item_path = ?1 || substr(item_path, ?2)
            WHERE item_path > ?3 AND item_path < ?4 AND is_deleted = 0
            "#,
            params![dest, keep_from, low, high],
        )?;

        {
            let mut cache = self.cache();
            cache.remove(id);
            for touched_id in &touched {
                cache.remove(touched_id);
            }
            cache.clear_privileges();
        }

        let primary = self.primary_type(id).ok();
        self.journal().write(
            JournalEvent::new(EventType::NodeMoved, id, &dest)
                .primary_type(primary)
                .moved(&node.path, &dest),
        )?;
        debug!(item_id = %id, from = %node.path, to = %dest, descendants = touched.len(), "Node moved");
        self.node_by_id(id)
    }

    /// Deep-copy a subtree under fresh identifiers
    pub fn copy_node(&self, id: &str, destination: &str) -> RepositoryResult<CopyResult> {
        self.atomic(|q| {
            let source = q.node_by_id(id)?;
            let dest = q.resolve_path(destination)?;
            if dest == source.path || path::is_descendant(&dest, &source.path) {
                return Err(RepositoryError::constraint(format!(
                    "cannot copy {} into itself",
                    source.path
                )));
            }
            if q.find_node_by_path(&dest)?.is_some() {
                return Err(RepositoryError::exists(dest));
            }
            let parent_path = path::parent(&dest)
                .ok_or_else(|| RepositoryError::exists(path::ROOT.to_string()))?;
            let parent = q.node_by_path(parent_path)?;

            let mut versionable = Vec::new();
            let root = q.copy_tree(&source, &parent.id, &dest, &mut versionable)?;
            Ok(CopyResult { root, versionable })
        })
    }

    fn copy_tree(
        &self,
        source: &NodeRecord,
        parent_id: &str,
        dest: &str,
        versionable: &mut Vec<String>,
    ) -> RepositoryResult<Arc<NodeRecord>> {
        let id = new_id();
        self.insert_node_row(&id, path::name(dest), dest, Some(parent_id))?;
        let node = self.node_by_id(&id)?;

        let properties: Arc<PropertyMap> = self.properties(&source.id)?;
        for prop in properties.values() {
            if NOT_COPIED.contains(&prop.name.as_str()) {
                continue;
            }
            let tokens = if prop.name == "jcr:isCheckedOut" {
                vec![Token::Inline("true".to_string())]
            } else {
                self.duplicate_tokens(&prop.tokens)?
            };
            self.write_tokens(&node, &prop.name, prop.property_type, tokens, prop.multiple)?;
        }

        let primary = self.primary_type(&id)?;
        let mixins = self.mixin_types(&id)?;
        if self.types().is_node_type(&primary, &mixins, MIX_REFERENCEABLE) {
            self.write_tokens(
                &node,
                "jcr:uuid",
                PropertyType::String,
                vec![Token::Inline(id.clone())],
                false,
            )?;
        }
        if self.types().is_node_type(&primary, &mixins, MIX_SIMPLE_VERSIONABLE) {
            versionable.push(id.clone());
        }

        let entries = self.aces().entries(&source.id)?;
        if !entries.is_empty() {
            self.aces().append(&id, &entries)?;
        }
        self.journal().write(
            JournalEvent::new(EventType::NodeAdded, &id, dest)
                .primary_type(Some(primary))
                .info(serde_json::json!({ "copiedFrom": source.path })),
        )?;

        for child in self.children(&source.id, None)? {
            let child_dest = path::child(dest, &child.name);
            self.copy_tree(&child, &id, &child_dest, versionable)?;
        }
        Ok(node)
    }

    /// Add a mixin; returns `false` when the node already has that type
    pub fn add_mixin(&self, id: &str, name: &str) -> RepositoryResult<bool> {
        self.atomic(|q| {
            let def = q.node_type_def(name, true)?;
            if q.is_node_type(id, &def.name)? {
                return Ok(false);
            }
            let node = q.node_by_id(id)?;
            let mut mixins = q.mixin_types(id)?;
            mixins.push(def.name.clone());
            q.write_mixins(&node, &mixins)?;
            let types = q.types().hierarchy(&def.name);
            q.post_create(&node, &types)?;
            debug!(item_id = %id, mixin = %def.name, "Mixin added");
            Ok(true)
        })
    }

    /// Remove a mixin and the properties only it declared
    pub fn remove_mixin(&self, id: &str, name: &str) -> RepositoryResult<()> {
        self.atomic(|q| {
            let resolved = q.resolve_name(name)?;
            let canonical = q
                .types()
                .node_type(&resolved)
                .map(|d| d.name.clone())
                .unwrap_or(resolved);
            let node = q.node_by_id(id)?;
            let mut mixins = q.mixin_types(id)?;
            if !mixins.contains(&canonical) {
                return Err(RepositoryError::constraint(format!(
                    "{} does not have mixin {}",
                    node.path, canonical
                )));
            }
            mixins.retain(|m| m != &canonical);

            let primary = q.primary_type(id)?;
            let kept: HashSet<String> = q
                .types()
                .effective_types(&primary, &mixins)
                .iter()
                .flat_map(|d| d.properties.iter().map(|p| p.name.clone()))
                .collect();
            let dropped: Vec<String> = q
                .types()
                .hierarchy(&canonical)
                .iter()
                .flat_map(|d| d.properties.iter().map(|p| p.name.clone()))
                .filter(|n| !kept.contains(n))
                .collect();
            for prop in dropped {
                q.remove_property_inner(id, &prop)?;
            }

            if mixins.is_empty() {
                q.remove_property_inner(id, MIXIN_TYPES)?;
            } else {
                q.write_mixins(&node, &mixins)?;
            }
            debug!(item_id = %id, mixin = %canonical, "Mixin removed");
            Ok(())
        })
    }

    fn write_mixins(&self, node: &NodeRecord, mixins: &[String]) -> RepositoryResult<()> {
        self.write_tokens(
            node,
            MIXIN_TYPES,
            PropertyType::Name,
            mixins.iter().map(|m| Token::Inline(m.clone())).collect(),
            true,
        )
    }

    /// Whether the item row is present, including soft-deleted rows
    pub fn node_row_exists(&self, id: &str) -> RepositoryResult<bool> {
        let exists = self
            .conn()
            .query_row("SELECT 1 FROM items WHERE item_id = ?1", [id], |_| Ok(()))
            .optional()?
            .is_some();
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::test_support::fixture;

    #[test]
    fn test_create_and_resolve_both_ways() {
        let f = fixture();
        let q = &f.query;
        let a = q.create_node(&NodeDefinition::new("/a", "folder")).unwrap();
        let b = q.create_node(&NodeDefinition::new("/a/b", "nt:folder")).unwrap();

        assert_eq!(q.node_by_path("/a/b").unwrap().id, b.id);
        assert_eq!(q.node_by_id(&b.id).unwrap().path, "/a/b");
        assert_eq!(b.parent_id.as_deref(), Some(a.id.as_str()));
        assert_eq!(q.primary_type(&a.id).unwrap(), "nt:folder");
        assert!(q.journal().node_is_new(&a.id).unwrap());
    }

    #[test]
    fn test_create_rejects_duplicates_and_bad_types() {
        let f = fixture();
        let q = &f.query;
        q.create_node(&NodeDefinition::new("/a", "nt:folder")).unwrap();
        assert!(matches!(
            q.create_node(&NodeDefinition::new("/a", "nt:folder")),
            Err(RepositoryError::ItemExists(_))
        ));
        assert!(matches!(
            q.create_node(&NodeDefinition::new("/b", "nt:base")),
            Err(RepositoryError::ConstraintViolation(_))
        ));
        assert!(matches!(
            q.create_node(&NodeDefinition::new("/b", "app:unknown")),
            Err(RepositoryError::Namespace(_))
        ));
        assert!(matches!(
            q.create_node(&NodeDefinition::new("/missing/b", "nt:folder")),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_post_create_defaults() {
        let f = fixture();
        let q = &f.query;
        q.create_node(&NodeDefinition::new("/report.pdf", "nt:file")).unwrap();
        let content = q
            .create_node(&NodeDefinition::new("/report.pdf/jcr:content", "nt:resource"))
            .unwrap();

        let props = q.properties(&content.id).unwrap();
        assert_eq!(props["jcr:mimeType"].first_inline(), Some("application/pdf"));
        assert_eq!(props["jcr:lastModifiedBy"].first_inline(), Some("system"));
        assert!(props.contains_key("jcr:lastModified"));

        let file = q.node_by_path("/report.pdf").unwrap();
        let file_props = q.properties(&file.id).unwrap();
        assert_eq!(file_props["jcr:createdBy"].first_inline(), Some("system"));
    }

    #[test]
    fn test_ensure_ancestors_creates_folders() {
        let f = fixture();
        let q = &f.query;
        q.ensure_ancestors("/x/y/z").unwrap();
        assert!(q.find_node_by_path("/x/y/z").unwrap().is_none());
        let y = q.node_by_path("/x/y").unwrap();
        assert_eq!(q.primary_type(&y.id).unwrap(), NT_FOLDER);
        q.ensure_ancestors("/x/y/z").unwrap();
    }

    #[test]
    fn test_move_rewrites_descendants() {
        let f = fixture();
        let q = &f.query;
        q.create_node(&NodeDefinition::new("/a", "nt:folder")).unwrap();
        q.create_node(&NodeDefinition::new("/a/b", "nt:folder")).unwrap();
        let c = q.create_node(&NodeDefinition::new("/a/b/c", "nt:folder")).unwrap();
        q.create_node(&NodeDefinition::new("/ab", "nt:folder")).unwrap();

        let a = q.node_by_path("/a").unwrap();
        q.move_node(&a.id, "/z").unwrap();

        assert!(q.find_node_by_path("/a").unwrap().is_none());
        assert!(q.find_node_by_path("/a/b/c").unwrap().is_none());
        assert_eq!(q.node_by_id(&c.id).unwrap().path, "/z/b/c");
        assert_eq!(q.node_by_path("/z/b/c").unwrap().id, c.id);
        // Sibling sharing a name prefix stays put
        assert!(q.find_node_by_path("/ab").unwrap().is_some());

        assert!(matches!(
            q.move_node(&a.id, "/z/b/inside"),
            Err(RepositoryError::ConstraintViolation(_))
        ));
        assert!(matches!(
            q.move_node(&a.id, "/ab"),
            Err(RepositoryError::ItemExists(_))
        ));
    }

    #[test]
    fn test_remove_is_soft_until_commit() {
        let f = fixture();
        let q = &f.query;
        let a = q.create_node(&NodeDefinition::new("/a", "nt:folder")).unwrap();
        let b = q.create_node(&NodeDefinition::new("/a/b", "nt:folder")).unwrap();
        q.commit().unwrap();

        q.remove_node(&a.id, RemoveOptions::default()).unwrap();
        assert!(q.find_node_by_id(&b.id).unwrap().is_none());
        assert!(q.node_row_exists(&b.id).unwrap());
        q.commit().unwrap();
        assert!(!q.node_row_exists(&b.id).unwrap());
    }

    #[test]
    fn test_copy_assigns_fresh_identifiers() {
        let f = fixture();
        let q = &f.query;
        let a = q
            .create_node(&NodeDefinition::new("/a", "nt:unstructured").mixin("mix:referenceable"))
            .unwrap();
        q.create_node(&NodeDefinition::new("/a/b", "nt:unstructured")).unwrap();
        q.set_property(&a.id, "title", PropertyType::String, Some(&[Value::from("hello")]), false)
            .unwrap();

        let copy = q.copy_node(&a.id, "/copy").unwrap();
        assert_ne!(copy.root.id, a.id);
        let props = q.properties(&copy.root.id).unwrap();
        assert_eq!(props["title"].first_inline(), Some("hello"));
        assert_eq!(props["jcr:uuid"].first_inline(), Some(copy.root.id.as_str()));
        assert!(q.find_node_by_path("/copy/b").unwrap().is_some());
    }

    #[test]
    fn test_mixin_add_and_remove() {
        let f = fixture();
        let q = &f.query;
        let a = q.create_node(&NodeDefinition::new("/a", "nt:unstructured")).unwrap();
        assert!(q.add_mixin(&a.id, "mix:referenceable").unwrap());
        assert!(!q.add_mixin(&a.id, "mix:referenceable").unwrap());
        assert_eq!(q.property(&a.id, "jcr:uuid").unwrap().unwrap().first_inline(), Some(a.id.as_str()));

        q.remove_mixin(&a.id, "mix:referenceable").unwrap();
        assert!(q.property(&a.id, "jcr:uuid").unwrap().is_none());
        assert!(q.mixin_types(&a.id).unwrap().is_empty());
        assert!(matches!(
            q.remove_mixin(&a.id, "mix:referenceable"),
            Err(RepositoryError::ConstraintViolation(_))
        ));
        assert!(matches!(
            q.add_mixin(&a.id, "nt:folder"),
            Err(RepositoryError::ConstraintViolation(_))
        ));
    }
}
