//! Sessions: one principal working against one workspace
//!
//! A [`Session`] owns a [`WorkspaceQuery`] (and with it one pooled
//! connection) for its whole life. Every public operation resolves names
//! through the session's namespace cache, checks the caller's privileges,
//! lock tokens and checkout state, and only then delegates to the query
//! engine. Writes accumulate in one relational transaction until
//! [`Session::commit`] or [`Session::rollback`].
//!
//! Dropping a session closes it: pending work is rolled back, its
//! session-scoped locks are released and committed, and its connection goes
//! back to the pool.

use crate::acl::{self, AccessControlManager, PrivilegeSet};
use crate::error::{RepositoryError, RepositoryResult};
use crate::index::IndexFeed;
use crate::lock::{self, LockManager};
use crate::node::{Node, Property};
use crate::node_type::{MIX_REFERENCEABLE, MIX_SIMPLE_VERSIONABLE};
use crate::observation::ObservationManager;
use crate::path;
use crate::principal::Principal;
use crate::provider::SessionLease;
use crate::query::{LockRow, NodeDefinition, NodeRecord, RemoveOptions, WorkspaceQuery};
use crate::registry::NamespaceRegistry;
use crate::value::{PropertyType, Value};
use crate::version::VersionManager;
use arbor_config::SecurityConfig;
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Repository-internal subtree holding version storage
pub const SYSTEM_PATH: &str = "/jcr:system";

/// Collaborators told about every successful commit
#[derive(Clone, Default)]
pub(crate) struct CommitHooks {
    pub committed: Option<Arc<Notify>>,
    pub index: Option<Arc<dyn IndexFeed>>,
    pub events: Option<ObservationManager>,
}

pub struct Session {
    query: WorkspaceQuery,
    principal: Principal,
    security: Arc<SecurityConfig>,
    lock_tokens: RefCell<HashSet<String>>,
    hooks: CommitHooks,
    // Released after the close sequence in `Drop` has run
    _lease: Option<SessionLease>,
}

impl Session {
    pub(crate) fn open(
        query: WorkspaceQuery,
        principal: Principal,
        security: Arc<SecurityConfig>,
        hooks: CommitHooks,
        lease: Option<SessionLease>,
    ) -> RepositoryResult<Self> {
        let tokens = query.locks().open_scoped_tokens(&principal.user_id)?;
        debug!(
            session_id = %query.session_id(),
            user_id = %principal.user_id,
            workspace = %query.workspace(),
            lock_tokens = tokens.len(),
            "Session opened"
        );
        Ok(Self {
            query,
            principal,
            security,
            lock_tokens: RefCell::new(tokens.into_iter().collect()),
            hooks,
            _lease: lease,
        })
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn user_id(&self) -> &str {
        &self.principal.user_id
    }

    pub fn workspace(&self) -> &str {
        self.query.workspace()
    }

    pub fn identifier(&self) -> &str {
        self.query.session_id().as_str()
    }

    /// The underlying query engine, without any privilege checks
    pub fn query(&self) -> &WorkspaceQuery {
        &self.query
    }

    /// Close the session
    pub fn logout(self) {
        drop(self)
    }

    // -- reading --------------------------------------------------------

    pub fn root_node(&self) -> RepositoryResult<Node<'_>> {
        self.node(path::ROOT)
    }

    pub fn node(&self, node_path: &str) -> RepositoryResult<Node<'_>> {
        let record = self.node_record(node_path)?;
        Ok(Node::new(self, record.id.clone()))
    }

    pub fn node_by_identifier(&self, id: &str) -> RepositoryResult<Node<'_>> {
        let record = self.query.node_by_id(id)?;
        self.check_privileges_at(&record.path, PrivilegeSet::READ)?;
        Ok(Node::new(self, record.id.clone()))
    }

    /// Whether a readable node exists at `node_path`
    pub fn node_exists(&self, node_path: &str) -> RepositoryResult<bool> {
        match self.node_record(node_path) {
            Ok(_) => Ok(true),
            Err(RepositoryError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// A property by absolute path
    pub fn property(&self, property_path: &str) -> RepositoryResult<Property<'_>> {
        let resolved = self.query.resolve_path(property_path)?;
        let owner = path::parent(&resolved)
            .ok_or_else(|| RepositoryError::not_found(resolved.clone()))?;
        self.node(owner)?.property(path::name(&resolved))
    }

    pub fn property_exists(&self, property_path: &str) -> RepositoryResult<bool> {
        match self.property(property_path) {
            Ok(_) => Ok(true),
            Err(RepositoryError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether a node or a property exists at the path
    pub fn item_exists(&self, item_path: &str) -> RepositoryResult<bool> {
        Ok(self.node_exists(item_path)? || self.property_exists(item_path)?)
    }

    /// Resolve a path and load the node the caller may read
    pub(crate) fn node_record(&self, node_path: &str) -> RepositoryResult<Arc<NodeRecord>> {
        let resolved = self.query.resolve_path(node_path)?;
        let record = self.query.node_by_path(&resolved)?;
        self.check_privileges_at(&record.path, PrivilegeSet::READ)?;
        Ok(record)
    }

    // -- writing --------------------------------------------------------

    pub fn add_node(&self, node_path: &str, primary_type: &str) -> RepositoryResult<Node<'_>> {
        self.create(NodeDefinition::new(node_path, primary_type))
    }

    /// Create a node from a full definition
    pub fn create(&self, mut def: NodeDefinition) -> RepositoryResult<Node<'_>> {
        def.path = self.query.resolve_path(&def.path)?;
        let parent_path = path::parent(&def.path)
            .ok_or_else(|| RepositoryError::exists(path::ROOT.to_string()))?;
        let parent = self.node_record(parent_path)?;
        self.check_privileges_at(&parent.path, PrivilegeSet::ADD_CHILD_NODES)?;
        if !def.access_control.is_empty() {
            self.check_privileges_at(&parent.path, PrivilegeSet::MODIFY_ACCESS_CONTROL)?;
        }
        self.check_writable(&parent)?;

        let node = self.query.atomic(|q| {
            let node = q.create_node(&def)?;
            if q.is_node_type(&node.id, MIX_SIMPLE_VERSIONABLE)? {
                self.version_manager().add_version_control(&node.id)?;
            }
            Ok(node)
        })?;
        Ok(Node::new(self, node.id.clone()))
    }

    /// Remove a node and its subtree
    pub fn remove(&self, node_path: &str) -> RepositoryResult<()> {
        let node = self.node_record(node_path)?;
        let parent = self
            .query
            .parent_of(&node)?
            .ok_or_else(|| RepositoryError::constraint("cannot remove the root node"))?;
        self.check_privileges_at(&node.path, PrivilegeSet::REMOVE_NODE)?;
        self.check_privileges_at(&parent.path, PrivilegeSet::REMOVE_CHILD_NODES)?;
        self.check_writable(&node)?;
        self.check_writable(&parent)?;
        self.check_subtree_locks(&node)?;

        let primary = self.query.primary_type(&node.id)?;
        if self
            .query
            .types()
            .node_type(&primary)
            .map(|d| d.is_protected)
            .unwrap_or(false)
        {
            return Err(RepositoryError::constraint(format!(
                "{} is protected by its type {}",
                node.path, primary
            )));
        }
        self.check_not_referenced(&node)?;

        self.query.remove_node(&node.id, RemoveOptions::default())?;
        info!(path = %node.path, "Node removed");
        Ok(())
    }

    pub fn move_node(&self, source: &str, destination: &str) -> RepositoryResult<Node<'_>> {
        let node = self.node_record(source)?;
        let parent = self
            .query
            .parent_of(&node)?
            .ok_or_else(|| RepositoryError::constraint("cannot move the root node"))?;
        let dest = self.query.resolve_path(destination)?;
        let dest_parent_path = path::parent(&dest)
            .ok_or_else(|| RepositoryError::exists(path::ROOT.to_string()))?;
        let dest_parent = self.node_record(dest_parent_path)?;

        self.check_privileges_at(&node.path, PrivilegeSet::REMOVE_NODE)?;
        self.check_privileges_at(&parent.path, PrivilegeSet::REMOVE_CHILD_NODES)?;
        self.check_privileges_at(&dest_parent.path, PrivilegeSet::ADD_CHILD_NODES)?;
        self.check_writable(&node)?;
        self.check_writable(&parent)?;
        self.check_writable(&dest_parent)?;
        self.check_subtree_locks(&node)?;

        let moved = self.query.move_node(&node.id, &dest)?;
        info!(from = %node.path, to = %moved.path, "Node moved");
        Ok(Node::new(self, moved.id.clone()))
    }

    /// Deep-copy a subtree; copied versionable nodes get fresh histories
    pub fn copy(&self, source: &str, destination: &str) -> RepositoryResult<Node<'_>> {
        let node = self.node_record(source)?;
        let dest = self.query.resolve_path(destination)?;
        let dest_parent_path = path::parent(&dest)
            .ok_or_else(|| RepositoryError::exists(path::ROOT.to_string()))?;
        let dest_parent = self.node_record(dest_parent_path)?;
        self.check_privileges_at(&dest_parent.path, PrivilegeSet::ADD_CHILD_NODES)?;
        self.check_writable(&dest_parent)?;

        let copied = self.query.atomic(|q| {
            let result = q.copy_node(&node.id, &dest)?;
            for id in &result.versionable {
                self.version_manager().add_version_control(id)?;
            }
            Ok(result.root)
        })?;
        info!(from = %node.path, to = %copied.path, "Subtree copied");
        Ok(Node::new(self, copied.id.clone()))
    }

    /// Set, replace or (with `None`) remove a property of a node
    pub(crate) fn write_property(
        &self,
        node: &NodeRecord,
        name: &str,
        property_type: PropertyType,
        values: Option<&[Value]>,
        multiple: bool,
    ) -> RepositoryResult<()> {
        let name = self.query.resolve_name(name)?;
        self.check_property_writable(node, &name)?;
        self.query
            .set_property(&node.id, &name, property_type, values, multiple)
    }

    pub(crate) fn remove_property(&self, node: &NodeRecord, name: &str) -> RepositoryResult<()> {
        let name = self.query.resolve_name(name)?;
        self.check_property_writable(node, &name)?;
        self.query.remove_property(&node.id, &name)
    }

    fn check_property_writable(&self, node: &NodeRecord, name: &str) -> RepositoryResult<()> {
        self.check_privileges_at(&node.path, PrivilegeSet::MODIFY_PROPERTIES)?;
        self.check_writable(node)?;
        if name == "jcr:primaryType" || name == "jcr:mixinTypes" {
            return Err(RepositoryError::constraint(format!(
                "{} is maintained by the repository",
                name
            )));
        }
        let primary = self.query.primary_type(&node.id)?;
        let mixins = self.query.mixin_types(&node.id)?;
        if self.query.types().is_protected_property(&primary, &mixins, name) {
            return Err(RepositoryError::constraint(format!(
                "property {} of {} is protected",
                name, node.path
            )));
        }
        Ok(())
    }

    pub(crate) fn add_mixin(&self, node: &NodeRecord, name: &str) -> RepositoryResult<bool> {
        self.check_privileges_at(&node.path, PrivilegeSet::MODIFY_PROPERTIES)?;
        self.check_writable(node)?;
        self.query.atomic(|q| {
            let added = q.add_mixin(&node.id, name)?;
            if added && q.is_node_type(&node.id, MIX_SIMPLE_VERSIONABLE)? {
                self.version_manager().add_version_control(&node.id)?;
            }
            Ok(added)
        })
    }

    pub(crate) fn remove_mixin(&self, node: &NodeRecord, name: &str) -> RepositoryResult<()> {
        self.check_privileges_at(&node.path, PrivilegeSet::MODIFY_PROPERTIES)?;
        self.check_writable(node)?;
        let resolved = self.query.resolve_name(name)?;
        let types = self.query.types();
        if types.is_subtype(&resolved, crate::node_type::MIX_LOCKABLE)
            && self.query.locks().get(&node.id)?.is_some()
        {
            return Err(RepositoryError::constraint(format!(
                "{} is locked; cannot remove {}",
                node.path, resolved
            )));
        }
        if types.is_subtype(&resolved, MIX_REFERENCEABLE) && self.query.count_referenced(&node.id)? > 0 {
            return Err(RepositoryError::constraint(format!(
                "{} is still referenced; cannot remove {}",
                node.path, resolved
            )));
        }
        self.query.remove_mixin(&node.id, &resolved)
    }

    // -- transactions ---------------------------------------------------

    /// Commit pending work and tell collaborators about it
    ///
    /// Returns the committed transaction id, or `None` if nothing was
    /// written.
    pub fn commit(&self) -> RepositoryResult<Option<String>> {
        let Some(transaction_id) = self.query.commit()? else {
            return Ok(None);
        };
        let observed = self.hooks.events.as_ref().filter(|events| events.has_listeners());
        if self.hooks.index.is_some() || observed.is_some() {
            match self.query.journal().entries(&transaction_id) {
                Ok(entries) if entries.is_empty() => {}
                Ok(entries) => {
                    if let Some(index) = &self.hooks.index {
                        if let Err(e) =
                            index.transaction_committed(self.workspace(), &transaction_id, &entries)
                        {
                            warn!(transaction_id = %transaction_id, error = %e, "Index feed failed");
                        }
                    }
                    if let Some(events) = observed {
                        events.publish(&transaction_id, &entries);
                    }
                }
                Err(e) => {
                    warn!(transaction_id = %transaction_id, error = %e, "Failed to read committed journal")
                }
            }
        }
        if let Some(committed) = &self.hooks.committed {
            committed.notify_one();
        }
        Ok(Some(transaction_id))
    }

    /// Alias of [`Session::commit`]
    pub fn save(&self) -> RepositoryResult<Option<String>> {
        self.commit()
    }

    pub fn rollback(&self) -> RepositoryResult<()> {
        self.query.rollback()
    }

    /// Drop cached state; without `keep_changes` pending work is rolled back
    pub fn refresh(&self, keep_changes: bool) -> RepositoryResult<()> {
        if keep_changes {
            self.query.cache().clear();
            Ok(())
        } else {
            self.query.rollback()
        }
    }

    pub fn has_pending_changes(&self) -> RepositoryResult<bool> {
        if !self.query.in_transaction() {
            return Ok(false);
        }
        self.query.journal().has_pending_changes()
    }

    /// Stamp subsequent journal entries with caller-supplied text
    pub fn set_user_data(&self, data: Option<String>) {
        self.query.set_user_data(data)
    }

    pub(crate) fn ensure_no_pending(&self) -> RepositoryResult<()> {
        if self.has_pending_changes()? {
            return Err(RepositoryError::InvalidItemState(
                "session has unsaved changes".to_string(),
            ));
        }
        Ok(())
    }

    /// Run one self-contained write and commit it immediately
    ///
    /// Used by operations that take effect outside the caller's unit of
    /// work, such as locking and versioning.
    pub(crate) fn write_and_commit<T>(
        &self,
        op: impl FnOnce(&WorkspaceQuery) -> RepositoryResult<T>,
    ) -> RepositoryResult<T> {
        self.ensure_no_pending()?;
        match self.query.atomic(op) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.query.rollback() {
                    warn!(error = %rollback, "Rollback after failed write failed");
                }
                Err(e)
            }
        }
    }

    // -- privileges -----------------------------------------------------

    /// Whether the principal bypasses access control
    pub fn is_privileged(&self) -> bool {
        self.principal.kind.is_privileged() || self.security.is_administrator(&self.principal.user_id)
    }

    pub fn privileges(&self, node_path: &str) -> RepositoryResult<PrivilegeSet> {
        let resolved = self.query.resolve_path(node_path)?;
        self.privileges_at(&resolved)
    }

    pub fn has_privileges(&self, node_path: &str, wanted: PrivilegeSet) -> RepositoryResult<bool> {
        Ok(self.privileges(node_path)?.contains(wanted))
    }

    pub fn check_privileges(&self, node_path: &str, wanted: PrivilegeSet) -> RepositoryResult<()> {
        let resolved = self.query.resolve_path(node_path)?;
        self.check_privileges_at(&resolved, wanted)
    }

    /// Check comma-separated actions: `read`, `add_node`, `set_property`, `remove`
    pub fn has_permission(&self, item_path: &str, actions: &str) -> RepositoryResult<bool> {
        let resolved = self.query.resolve_path(item_path)?;
        for action in actions.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            let allowed = match action {
                "read" => self.privileges_at(&resolved)?.contains(PrivilegeSet::READ),
                "add_node" => self.parent_privileges(&resolved)?.contains(PrivilegeSet::ADD_CHILD_NODES),
                "set_property" => {
                    // The path may name the property or the node owning it
                    self.privileges_at(&resolved)?.contains(PrivilegeSet::MODIFY_PROPERTIES)
                        || self.parent_privileges(&resolved)?.contains(PrivilegeSet::MODIFY_PROPERTIES)
                }
                "remove" => {
                    self.privileges_at(&resolved)?.contains(PrivilegeSet::REMOVE_NODE)
                        && self.parent_privileges(&resolved)?.contains(PrivilegeSet::REMOVE_CHILD_NODES)
                }
                other => {
                    return Err(RepositoryError::value_format(format!("unknown action: {}", other)))
                }
            };
            if !allowed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn check_permission(&self, item_path: &str, actions: &str) -> RepositoryResult<()> {
        if self.has_permission(item_path, actions)? {
            Ok(())
        } else {
            Err(RepositoryError::access_denied(format!("{} on {}", actions, item_path)))
        }
    }

    fn parent_privileges(&self, resolved: &str) -> RepositoryResult<PrivilegeSet> {
        match path::parent(resolved) {
            Some(parent) => self.privileges_at(parent),
            None => Ok(PrivilegeSet::NONE),
        }
    }

    /// Effective privileges at an already resolved path
    pub(crate) fn privileges_at(&self, resolved: &str) -> RepositoryResult<PrivilegeSet> {
        if self.is_privileged() {
            return Ok(PrivilegeSet::ALL);
        }
        if self.security.system_path_read_only
            && (resolved == SYSTEM_PATH || path::is_descendant(resolved, SYSTEM_PATH))
        {
            return Ok(PrivilegeSet::READ);
        }
        if let Some(cached) = self.query.cache().privileges(resolved) {
            return Ok(cached);
        }
        let levels = self.query.aces().effective(resolved)?;
        let granted = acl::evaluate(&levels, &self.principal);
        self.query.cache().put_privileges(resolved, granted);
        Ok(granted)
    }

    pub(crate) fn check_privileges_at(
        &self,
        resolved: &str,
        wanted: PrivilegeSet,
    ) -> RepositoryResult<()> {
        let granted = self.privileges_at(resolved)?;
        if granted.contains(wanted) {
            return Ok(());
        }
        debug!(
            user_id = %self.principal.user_id,
            path = %resolved,
            wanted = %wanted,
            granted = %granted,
            "Access denied"
        );
        Err(RepositoryError::access_denied(format!(
            "{} lacks {} on {}",
            self.principal.user_id,
            (wanted & !granted),
            resolved
        )))
    }

    // -- locks and checkout ---------------------------------------------

    pub(crate) fn holds_token(&self, token: &str) -> bool {
        self.lock_tokens.borrow().contains(token)
    }

    pub(crate) fn lock_token_set(&self) -> &RefCell<HashSet<String>> {
        &self.lock_tokens
    }

    /// The lock governing writes to `node_path`: one on the node itself or
    /// the nearest deep lock above it
    pub(crate) fn applicable_lock(&self, node_path: &str) -> RepositoryResult<Option<LockRow>> {
        Ok(self
            .query
            .locks()
            .on_ancestors_or_self(node_path)?
            .into_iter()
            .find(|l| l.item_path == node_path || l.is_deep))
    }

    /// Fail unless the caller may change `node` under its locks and checkout
    pub(crate) fn check_writable(&self, node: &NodeRecord) -> RepositoryResult<()> {
        if let Some(lock) = self.applicable_lock(&node.path)? {
            if !self.holds_token(&lock.token) {
                return Err(RepositoryError::lock(format!(
                    "{} is locked at {} by {}",
                    node.path, lock.item_path, lock.principal
                )));
            }
        }
        if self.principal.is_system() {
            return Ok(());
        }
        self.version_manager().check_writable(node)
    }

    /// Fail if any lock below `node` belongs to someone else
    fn check_subtree_locks(&self, node: &NodeRecord) -> RepositoryResult<()> {
        for lock in self.query.locks().below(&node.path)? {
            if !self.holds_token(&lock.token) {
                return Err(RepositoryError::lock(format!(
                    "{} is locked by {}",
                    lock.item_path, lock.principal
                )));
            }
        }
        Ok(())
    }

    /// Referential integrity for a subtree about to be removed
    fn check_not_referenced(&self, node: &NodeRecord) -> RepositoryResult<()> {
        let mut subtree: HashSet<String> = self.query.descendant_ids(&node.path)?.into_iter().collect();
        subtree.insert(node.id.clone());
        for id in &subtree {
            if !self.query.is_node_type(id, MIX_REFERENCEABLE)? {
                continue;
            }
            for reference in self.query.references(id, false)? {
                if !subtree.contains(&reference.owner_id) {
                    return Err(RepositoryError::constraint(format!(
                        "{} is referenced by property {}",
                        node.path, reference.id
                    )));
                }
            }
        }
        Ok(())
    }

    // -- namespaces -----------------------------------------------------

    /// Map `prefix` to a registered URI for this session only
    pub fn set_namespace_prefix(&self, prefix: &str, uri: &str) -> RepositoryResult<()> {
        if self.query.namespaces().prefix(uri)?.is_none() {
            return Err(RepositoryError::namespace(format!("unknown namespace URI: {}", uri)));
        }
        self.query.namespace_cache().set_alias(prefix, uri)
    }

    pub fn namespace_uri(&self, prefix: &str) -> RepositoryResult<String> {
        let cached = self.query.namespace_cache().uri(prefix).map(str::to_string);
        match cached {
            Some(uri) => Ok(uri),
            None => self
                .query
                .namespaces()
                .uri(prefix)?
                .ok_or_else(|| RepositoryError::namespace(format!("unknown namespace prefix: {}", prefix))),
        }
    }

    pub fn namespace_prefix(&self, uri: &str) -> RepositoryResult<String> {
        self.query
            .namespaces()
            .prefix(uri)?
            .ok_or_else(|| RepositoryError::namespace(format!("unknown namespace URI: {}", uri)))
    }

    pub fn namespace_prefixes(&self) -> RepositoryResult<Vec<String>> {
        Ok(self
            .query
            .namespaces()
            .all()?
            .into_iter()
            .map(|(prefix, _)| prefix)
            .collect())
    }

    // -- managers -------------------------------------------------------

    pub fn lock_manager(&self) -> LockManager<'_> {
        LockManager::new(self)
    }

    pub fn access_control_manager(&self) -> AccessControlManager<'_> {
        AccessControlManager::new(self)
    }

    pub fn version_manager(&self) -> VersionManager<'_> {
        VersionManager::new(self)
    }

    pub fn namespace_registry(&self) -> NamespaceRegistry<'_> {
        NamespaceRegistry::new(self)
    }

    fn release_session_locks(&self) -> RepositoryResult<usize> {
        let locks = self.query.locks().session_scoped(self.identifier())?;
        for lock in &locks {
            self.query
                .atomic(|q| lock::clear_lock(q, &lock.item_id, &lock.item_path))?;
        }
        Ok(locks.len())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.query.rollback() {
            warn!(session_id = %self.identifier(), error = %e, "Rollback on close failed");
        }
        match self.release_session_locks() {
            Ok(0) => {}
            Ok(released) => {
                debug!(session_id = %self.identifier(), released, "Released session-scoped locks")
            }
            Err(e) => {
                warn!(session_id = %self.identifier(), error = %e, "Failed to release session-scoped locks")
            }
        }
        if let Err(e) = self.commit() {
            warn!(session_id = %self.identifier(), error = %e, "Commit on close failed");
        }
        if let Err(e) = self.query.rollback() {
            warn!(session_id = %self.identifier(), error = %e, "Rollback on close failed");
        }
        debug!(session_id = %self.identifier(), "Session closed");
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::Workspace;
    use super::*;
    use crate::acl::AccessControlEntry;

    #[test]
    fn test_read_requires_privilege() {
        let ws = Workspace::new();
        let admin = ws.login(Principal::admin("root"));
        admin.add_node("/open", "nt:folder").unwrap();
        let secret = admin.add_node("/secret", "nt:folder").unwrap();
        admin
            .access_control_manager()
            .set_policy("/secret", &[AccessControlEntry::deny("everyone", true, &["jcr:read"])])
            .unwrap();
        admin.commit().unwrap();

        let alice = ws.login(Principal::user("alice"));
        assert!(alice.node("/open").is_ok());
        assert!(matches!(alice.node("/secret"), Err(RepositoryError::AccessDenied(_))));
        assert!(matches!(
            alice.node_by_identifier(secret.identifier()),
            Err(RepositoryError::AccessDenied(_))
        ));
        assert!(!alice.node_exists("/missing").unwrap());
        assert!(alice.node_exists("/secret").is_err());
    }

    #[test]
    fn test_writes_need_write_privileges() {
        let ws = Workspace::new();
        let alice = ws.login(Principal::user("alice"));
        assert!(matches!(
            alice.add_node("/a", "nt:folder"),
            Err(RepositoryError::AccessDenied(_))
        ));
        assert!(!alice.has_permission("/a", "add_node").unwrap());
        assert!(alice.has_permission("/", "read").unwrap());

        let admin = ws.login(Principal::admin("root"));
        admin
            .access_control_manager()
            .set_policy("/", &[
                AccessControlEntry::allow("everyone", true, &["jcr:read"]),
                AccessControlEntry::allow("alice", false, &["jcr:write"]),
            ])
            .unwrap();
        admin.commit().unwrap();

        alice.refresh(false).unwrap();
        let node = alice.add_node("/a", "nt:folder").unwrap();
        assert_eq!(node.path().unwrap(), "/a");
        assert!(alice.has_permission("/a", "add_node,set_property,remove").unwrap());
        alice.commit().unwrap();
    }

    #[test]
    fn test_sees_commits_of_other_sessions() {
        let ws = Workspace::new();
        let writer = ws.login(Principal::system());
        writer
            .add_node("/note", "nt:unstructured")
            .unwrap()
            .set_property("text", "first")
            .unwrap();
        writer.commit().unwrap();

        let reader = ws.login(Principal::user("reader"));
        let note = reader.node("/note").unwrap();
        assert_eq!(note.property("text").unwrap().string().unwrap(), "first");
        assert!(!reader.has_permission("/note", "set_property").unwrap());

        writer.node("/note").unwrap().set_property("text", "second").unwrap();
        writer
            .access_control_manager()
            .set_policy("/note", &[AccessControlEntry::allow("reader", false, &["jcr:write"])])
            .unwrap();
        // Uncommitted work stays invisible
        assert_eq!(note.property("text").unwrap().string().unwrap(), "first");
        writer.commit().unwrap();

        assert_eq!(note.property("text").unwrap().string().unwrap(), "second");
        assert!(reader.has_permission("/note", "set_property").unwrap());
    }

    #[test]
    fn test_system_subtree_is_read_only() {
        let ws = Workspace::new();
        let admin = ws.login(Principal::admin("root"));
        admin
            .access_control_manager()
            .set_policy("/", &[AccessControlEntry::allow("everyone", true, &["jcr:all"])])
            .unwrap();
        admin.commit().unwrap();

        let alice = ws.login(Principal::user("alice"));
        assert_eq!(alice.privileges(SYSTEM_PATH).unwrap(), PrivilegeSet::READ);
        assert!(alice.privileges("/").unwrap().contains(PrivilegeSet::ALL));
        assert!(alice.add_node("/jcr:system/x", "nt:folder").is_err());
    }

    #[test]
    fn test_remove_checks_references() {
        let ws = Workspace::new();
        let s = ws.login(Principal::system());
        let target = s.add_node("/target", "nt:unstructured").unwrap();
        target.add_mixin("mix:referenceable").unwrap();
        let holder = s.add_node("/holder", "nt:unstructured").unwrap();
        holder
            .set_property_typed("link", Value::Reference(target.identifier().to_string()), PropertyType::Reference)
            .unwrap();
        s.commit().unwrap();

        assert!(matches!(
            s.remove("/target"),
            Err(RepositoryError::ConstraintViolation(_))
        ));
        assert!(matches!(
            target.remove_mixin("mix:referenceable"),
            Err(RepositoryError::ConstraintViolation(_))
        ));
        s.remove("/holder").unwrap();
        s.remove("/target").unwrap();
        s.commit().unwrap();
        assert!(!s.node_exists("/target").unwrap());
    }

    #[test]
    fn test_protected_properties_rejected() {
        let ws = Workspace::new();
        let s = ws.login(Principal::system());
        let node = s.add_node("/n", "nt:unstructured").unwrap();
        assert!(matches!(
            node.set_property("jcr:primaryType", "nt:folder"),
            Err(RepositoryError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_move_and_copy() {
        let ws = Workspace::new();
        let s = ws.login(Principal::system());
        s.add_node("/a", "nt:folder").unwrap();
        let b = s.add_node("/a/b", "nt:unstructured").unwrap();
        b.set_property("title", "hello").unwrap();
        s.commit().unwrap();

        assert!(matches!(
            s.move_node("/a", "/a/b/c"),
            Err(RepositoryError::ConstraintViolation(_))
        ));
        assert!(matches!(
            s.move_node("/", "/x"),
            Err(RepositoryError::ConstraintViolation(_))
        ));
        let moved = s.move_node("/a", "/m").unwrap();
        assert_eq!(moved.path().unwrap(), "/m");
        assert_eq!(b.path().unwrap(), "/m/b");
        assert!(!s.node_exists("/a/b").unwrap());

        let copy = s.copy("/m", "/c").unwrap();
        assert_ne!(copy.identifier(), moved.identifier());
        let copied_b = s.node("/c/b").unwrap();
        assert_ne!(copied_b.identifier(), b.identifier());
        assert_eq!(copied_b.property("title").unwrap().string().unwrap(), "hello");
        s.commit().unwrap();
    }

    #[test]
    fn test_session_locks_released_on_close() {
        let ws = Workspace::new();
        let s = ws.login(Principal::system());
        s.add_node("/a", "nt:folder").unwrap().add_mixin("mix:lockable").unwrap();
        s.commit().unwrap();
        s.lock_manager().lock("/a", false, true).unwrap();
        assert!(s.lock_manager().is_locked("/a").unwrap());
        s.logout();

        let other = ws.login(Principal::system());
        assert!(!other.lock_manager().is_locked("/a").unwrap());
        let node = other.node("/a").unwrap();
        assert!(!node.has_property("jcr:lockOwner").unwrap());
    }

    #[test]
    fn test_pending_changes_and_rollback() {
        let ws = Workspace::new();
        let s = ws.login(Principal::system());
        assert!(!s.has_pending_changes().unwrap());
        s.add_node("/a", "nt:folder").unwrap();
        assert!(s.has_pending_changes().unwrap());
        s.rollback().unwrap();
        assert!(!s.has_pending_changes().unwrap());
        assert!(!s.node_exists("/a").unwrap());
    }

    #[test]
    fn test_namespace_alias() {
        let ws = Workspace::new();
        let s = ws.login(Principal::system());
        s.namespace_registry().register("app", "urn:app").unwrap();
        s.set_namespace_prefix("x", "urn:app").unwrap();
        let node = s.add_node("/x:page", "nt:unstructured").unwrap();
        assert_eq!(node.path().unwrap(), "/app:page");
        assert_eq!(s.namespace_uri("x").unwrap(), "urn:app");
        assert_eq!(s.namespace_prefix("urn:app").unwrap(), "app");
        assert!(s.set_namespace_prefix("jcr", "urn:app").is_err());
        assert!(s.set_namespace_prefix("y", "urn:unknown").is_err());
    }
}
