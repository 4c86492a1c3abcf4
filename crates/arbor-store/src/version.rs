//! Checkin, checkout and the read redirect for checked-out nodes
//!
//! A `mix:versionable` node owns a history under
//! `/jcr:system/jcr:versionStorage`. Each checkin freezes the node's
//! non-protected properties (and its `jcr:content` subtree) into a new
//! version. While a node is checked out by one user, everyone else reads
//! its content properties from the base version's frozen node, and only
//! the holder may write it.
//!
//! `mix:simpleVersionable` nodes carry only the checked-out flag and holder;
//! they get no history and no redirect.

use crate::acl::PrivilegeSet;
use crate::error::{RepositoryError, RepositoryResult};
use crate::node_type::{
    MIX_SIMPLE_VERSIONABLE, MIX_VERSIONABLE, NT_FROZEN_NODE, NT_VERSION, NT_VERSION_HISTORY,
};
use crate::path;
use crate::query::{NodeDefinition, NodeRecord, PropertyMap, WorkspaceQuery};
use crate::session::{Session, SYSTEM_PATH};
use crate::value::{PropertyType, Token, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const VERSION_STORAGE_PATH: &str = "/jcr:system/jcr:versionStorage";

pub(crate) const IS_CHECKED_OUT: &str = "jcr:isCheckedOut";
pub(crate) const CHECKED_OUT_BY: &str = "mi:checkedOutBy";
const VERSION_HISTORY: &str = "jcr:versionHistory";
const BASE_VERSION: &str = "jcr:baseVersion";
const PREDECESSORS: &str = "jcr:predecessors";
const SUCCESSORS: &str = "jcr:successors";
const ROOT_VERSION: &str = "jcr:rootVersion";
const FROZEN_NODE: &str = "jcr:frozenNode";
const CONTENT: &str = "jcr:content";

/// Never copied into a frozen node
const NOT_FROZEN: &[&str] = &[
    "jcr:primaryType",
    "jcr:mixinTypes",
    "jcr:uuid",
    "jcr:lockOwner",
    "jcr:lockIsDeep",
    IS_CHECKED_OUT,
    CHECKED_OUT_BY,
    VERSION_HISTORY,
    BASE_VERSION,
    PREDECESSORS,
];

/// Names that always read from the live node
///
/// Every `jcr:` name is administrative, which also keeps the frozen node's
/// own `jcr:frozen*` bookkeeping out of redirected reads.
fn is_administrative(name: &str) -> bool {
    name.starts_with("jcr:") || name == CHECKED_OUT_BY
}

fn history_path(id: &str) -> RepositoryResult<String> {
    match (id.get(0..2), id.get(2..4), id.get(4..6)) {
        (Some(a), Some(b), Some(c)) => Ok(format!(
            "{}/{}/{}/{}/{}",
            VERSION_STORAGE_PATH, a, b, c, id
        )),
        _ => Err(RepositoryError::version(format!(
            "identifier too short for version storage: {}",
            id
        ))),
    }
}

/// `jcr:rootVersion` -> `1.0`, `1.0` -> `1.1`
fn successor_name(base: &str) -> String {
    match base.rsplit_once('.') {
        Some((major, minor)) => match minor.parse::<u64>() {
            Ok(n) => format!("{}.{}", major, n + 1),
            Err(_) => format!("{}.1", base),
        },
        None => "1.0".to_string(),
    }
}

fn first_inline(q: &WorkspaceQuery, id: &str, name: &str) -> RepositoryResult<Option<String>> {
    Ok(q.property(id, name)?
        .and_then(|p| p.first_inline().map(str::to_string)))
}

fn set_one(q: &WorkspaceQuery, id: &str, name: &str, value: Value) -> RepositoryResult<()> {
    let ty = value.property_type();
    q.write_property(id, name, ty, Some(&[value]), false)
}

fn set_references(q: &WorkspaceQuery, id: &str, name: &str, targets: &[String]) -> RepositoryResult<()> {
    let values: Vec<Value> = targets.iter().map(|t| Value::Reference(t.clone())).collect();
    q.write_property(id, name, PropertyType::Reference, Some(values.as_slice()), true)
}

/// Checkout state of a version-controlled node
#[derive(Debug, Clone, PartialEq, Eq)]
struct Checkout {
    checked_out: bool,
    holder: Option<String>,
}

fn checkout_state(q: &WorkspaceQuery, id: &str) -> RepositoryResult<Checkout> {
    let checked_out = first_inline(q, id, IS_CHECKED_OUT)?
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);
    Ok(Checkout {
        checked_out,
        holder: first_inline(q, id, CHECKED_OUT_BY)?,
    })
}

pub struct VersionManager<'s> {
    session: &'s Session,
}

impl<'s> VersionManager<'s> {
    pub(crate) fn new(session: &'s Session) -> Self {
        Self { session }
    }

    fn query(&self) -> &'s WorkspaceQuery {
        self.session.query()
    }

    /// Give a newly versionable node its flags and, for full versioning,
    /// a history with a root version
    ///
    /// Runs inside the caller's unit of work.
    pub(crate) fn add_version_control(&self, id: &str) -> RepositoryResult<()> {
        self.query().atomic(|q| {
            let node = q.node_by_id(id)?;
            let state = checkout_state(q, id)?;
            if q.property(id, IS_CHECKED_OUT)?.is_none() {
                set_one(q, id, IS_CHECKED_OUT, Value::Boolean(true))?;
            }
            if state.checked_out && state.holder.is_none() {
                set_one(q, id, CHECKED_OUT_BY, Value::String(q.user_id().to_string()))?;
            }
            if !q.is_node_type(id, MIX_VERSIONABLE)? || q.property(id, VERSION_HISTORY)?.is_some() {
                return Ok(());
            }
            if q.property(id, "jcr:uuid")?.is_none() {
                set_one(q, id, "jcr:uuid", Value::String(id.to_string()))?;
            }

            let history_path = history_path(id)?;
            q.ensure_ancestors(&history_path)?;
            let history = q.create_node(&NodeDefinition::new(&history_path, NT_VERSION_HISTORY))?;
            set_one(q, &history.id, "jcr:versionableUuid", Value::String(id.to_string()))?;

            let root = self.create_version(q, &history, ROOT_VERSION, &[])?;
            self.create_frozen(q, &node, &root, false)?;

            set_one(q, id, VERSION_HISTORY, Value::Reference(history.id.clone()))?;
            set_one(q, id, BASE_VERSION, Value::Reference(root.id.clone()))?;
            set_references(q, id, PREDECESSORS, &[root.id.clone()])?;
            debug!(item_id = %id, history = %history.path, "Version history created");
            Ok(())
        })
    }

    fn create_version(
        &self,
        q: &WorkspaceQuery,
        history: &NodeRecord,
        name: &str,
        predecessors: &[String],
    ) -> RepositoryResult<Arc<NodeRecord>> {
        let version = q.create_node(&NodeDefinition::new(&path::child(&history.path, name), NT_VERSION))?;
        set_one(q, &version.id, "jcr:created", Value::now())?;
        set_one(q, &version.id, "jcr:createdBy", Value::String(q.user_id().to_string()))?;
        set_references(q, &version.id, PREDECESSORS, predecessors)?;
        for predecessor in predecessors {
            let mut successors: Vec<String> = q
                .property(predecessor, SUCCESSORS)?
                .map(|p| p.inline_values().map(str::to_string).collect())
                .unwrap_or_default();
            successors.push(version.id.clone());
            set_references(q, predecessor, SUCCESSORS, &successors)?;
        }
        Ok(version)
    }

    /// Snapshot `source` below `version`; the root version gets bookkeeping only
    fn create_frozen(
        &self,
        q: &WorkspaceQuery,
        source: &NodeRecord,
        version: &NodeRecord,
        with_content: bool,
    ) -> RepositoryResult<()> {
        let frozen_path = path::child(&version.path, FROZEN_NODE);
        let frozen = freeze_node(q, source, &frozen_path, with_content)?;
        if with_content {
            if let Some(content) = q.find_node_by_path(&path::child(&source.path, CONTENT))? {
                freeze_tree(q, &content, &path::child(&frozen.path, CONTENT))?;
            }
        }
        Ok(())
    }

    /// Resolve a path to a version-controlled node the caller may version
    fn controlled(&self, node_path: &str) -> RepositoryResult<Arc<NodeRecord>> {
        let node = self.session.node_record(node_path)?;
        self.session
            .check_privileges_at(&node.path, PrivilegeSet::VERSION_MANAGEMENT)?;
        if !self.query().is_node_type(&node.id, MIX_SIMPLE_VERSIONABLE)? {
            return Err(RepositoryError::constraint(format!(
                "{} is not versionable",
                node.path
            )));
        }
        Ok(node)
    }

    fn may_act_for(&self, holder: Option<&str>) -> bool {
        match holder {
            Some(holder) => holder == self.session.user_id() || self.session.is_privileged(),
            None => true,
        }
    }

    /// Freeze the node into a new version and mark it checked in
    ///
    /// Returns the base version identifier, which is `None` for
    /// simple-versionable nodes.
    pub fn checkin(&self, node_path: &str) -> RepositoryResult<Option<String>> {
        let node = self.controlled(node_path)?;
        let q = self.query();
        let state = checkout_state(q, &node.id)?;
        if !state.checked_out {
            return first_inline(q, &node.id, BASE_VERSION);
        }
        if !self.may_act_for(state.holder.as_deref()) {
            return Err(RepositoryError::version(format!(
                "{} is checked out by {}",
                node.path,
                state.holder.unwrap_or_default()
            )));
        }

        let version_id = self.session.write_and_commit(|q| {
            let mut version_id = None;
            if q.is_node_type(&node.id, MIX_VERSIONABLE)? {
                let history_id = first_inline(q, &node.id, VERSION_HISTORY)?
                    .ok_or_else(|| RepositoryError::version(format!("{} has no version history", node.path)))?;
                let history = q.node_by_id(&history_id)?;
                let base_id = first_inline(q, &node.id, BASE_VERSION)?
                    .ok_or_else(|| RepositoryError::version(format!("{} has no base version", node.path)))?;
                let base = q.node_by_id(&base_id)?;

                let mut name = successor_name(&base.name);
                while q.find_node_by_path(&path::child(&history.path, &name))?.is_some() {
                    name = successor_name(&name);
                }
                let mut predecessors: Vec<String> = q
                    .property(&node.id, PREDECESSORS)?
                    .map(|p| p.inline_values().map(str::to_string).collect())
                    .unwrap_or_default();
                if predecessors.is_empty() {
                    predecessors.push(base.id.clone());
                }
                let version = self.create_version(q, &history, &name, &predecessors)?;
                self.create_frozen(q, &node, &version, true)?;
                set_one(q, &node.id, BASE_VERSION, Value::Reference(version.id.clone()))?;
                set_references(q, &node.id, PREDECESSORS, &[])?;
                version_id = Some(version.id.clone());
            }
            set_one(q, &node.id, IS_CHECKED_OUT, Value::Boolean(false))?;
            q.remove_property_inner(&node.id, CHECKED_OUT_BY)?;
            Ok(version_id)
        })?;
        info!(path = %node.path, version = ?version_id, "Node checked in");
        Ok(version_id)
    }

    /// Mark the node checked out by the caller
    pub fn checkout(&self, node_path: &str) -> RepositoryResult<()> {
        let node = self.controlled(node_path)?;
        let q = self.query();
        let state = checkout_state(q, &node.id)?;
        if state.checked_out {
            return match state.holder {
                Some(holder) if holder != self.session.user_id() => Err(RepositoryError::version(
                    format!("{} is checked out by {}", node.path, holder),
                )),
                _ => Ok(()),
            };
        }
        self.session.write_and_commit(|q| {
            set_one(q, &node.id, IS_CHECKED_OUT, Value::Boolean(true))?;
            set_one(q, &node.id, CHECKED_OUT_BY, Value::String(q.user_id().to_string()))?;
            if let Some(base) = first_inline(q, &node.id, BASE_VERSION)? {
                set_references(q, &node.id, PREDECESSORS, &[base])?;
            }
            Ok(())
        })?;
        info!(path = %node.path, user_id = %self.session.user_id(), "Node checked out");
        Ok(())
    }

    /// Abandon a checkout, restoring content properties from the base version
    pub fn uncheckout(&self, node_path: &str) -> RepositoryResult<()> {
        let node = self.controlled(node_path)?;
        let q = self.query();
        let state = checkout_state(q, &node.id)?;
        if !state.checked_out {
            return Err(RepositoryError::version(format!("{} is not checked out", node.path)));
        }
        if state.holder.as_deref() != Some(self.session.user_id()) && !self.session.is_privileged() {
            return Err(RepositoryError::version(format!(
                "{} is checked out by {}",
                node.path,
                state.holder.unwrap_or_default()
            )));
        }
        let frozen = match first_inline(q, &node.id, BASE_VERSION)? {
            Some(base_id) => {
                let base = q.node_by_id(&base_id)?;
                if base.name == ROOT_VERSION {
                    return Err(RepositoryError::version(format!(
                        "{} has no checked-in version to restore",
                        node.path
                    )));
                }
                q.find_node_by_path(&path::child(&base.path, FROZEN_NODE))?
            }
            None => None,
        };

        self.session.write_and_commit(|q| {
            if let Some(frozen) = &frozen {
                restore_properties(q, frozen, &node)?;
            }
            set_one(q, &node.id, IS_CHECKED_OUT, Value::Boolean(false))?;
            q.remove_property_inner(&node.id, CHECKED_OUT_BY)?;
            if q.property(&node.id, PREDECESSORS)?.is_some() {
                set_references(q, &node.id, PREDECESSORS, &[])?;
            }
            Ok(())
        })?;
        info!(path = %node.path, "Checkout abandoned");
        Ok(())
    }

    pub fn is_checked_out(&self, node_path: &str) -> RepositoryResult<bool> {
        let node = self.session.node_record(node_path)?;
        match self.version_controlled(&node)? {
            Some((controlled, _)) => Ok(checkout_state(self.query(), &controlled.id)?.checked_out),
            // Nodes outside version control are always writable
            None => Ok(true),
        }
    }

    pub fn base_version(&self, node_path: &str) -> RepositoryResult<Option<String>> {
        let node = self.session.node_record(node_path)?;
        first_inline(self.query(), &node.id, BASE_VERSION)
    }

    /// The version-controlled node governing `node` and the relative path
    /// from it
    fn version_controlled(
        &self,
        node: &NodeRecord,
    ) -> RepositoryResult<Option<(Arc<NodeRecord>, Option<&'static str>)>> {
        let q = self.query();
        if q.is_node_type(&node.id, MIX_SIMPLE_VERSIONABLE)? {
            return Ok(Some((q.node_by_id(&node.id)?, None)));
        }
        if node.name == CONTENT {
            if let Some(parent) = q.parent_of(node)? {
                if q.is_node_type(&parent.id, MIX_SIMPLE_VERSIONABLE)? {
                    return Ok(Some((parent, Some(CONTENT))));
                }
            }
        }
        Ok(None)
    }

    /// Fail unless the caller may write `node` given its checkout state
    pub(crate) fn check_writable(&self, node: &NodeRecord) -> RepositoryResult<()> {
        if node.path == SYSTEM_PATH || path::is_descendant(&node.path, SYSTEM_PATH) {
            return Ok(());
        }
        let Some((controlled, _)) = self.version_controlled(node)? else {
            return Ok(());
        };
        let state = checkout_state(self.query(), &controlled.id)?;
        if !state.checked_out {
            return Err(RepositoryError::version(format!(
                "{} is checked in",
                controlled.path
            )));
        }
        match state.holder {
            Some(holder) if holder != self.session.user_id() => Err(RepositoryError::version(
                format!("{} is checked out by {}", controlled.path, holder),
            )),
            _ => Ok(()),
        }
    }

    /// The properties of `node` as the caller should see them
    pub(crate) fn visible_properties(&self, node: &NodeRecord) -> RepositoryResult<Arc<PropertyMap>> {
        let q = self.query();
        let live = q.properties(&node.id)?;
        let Some(frozen_id) = self.redirect_source(node)? else {
            return Ok(live);
        };
        let frozen = q.properties(&frozen_id)?;
        let mut visible = PropertyMap::new();
        for (name, record) in live.iter().filter(|(n, _)| is_administrative(n)) {
            visible.insert(name.clone(), record.clone());
        }
        for (name, record) in frozen.iter().filter(|(n, _)| !is_administrative(n)) {
            visible.insert(name.clone(), record.clone());
        }
        Ok(Arc::new(visible))
    }

    /// The frozen node serving reads of `node`, when reads are redirected
    fn redirect_source(&self, node: &NodeRecord) -> RepositoryResult<Option<String>> {
        let Some((controlled, relative)) = self.version_controlled(node)? else {
            return Ok(None);
        };
        let q = self.query();
        let state = checkout_state(q, &controlled.id)?;
        let held_by_other = match &state.holder {
            Some(holder) => holder != self.session.user_id(),
            None => false,
        };
        if !state.checked_out || !held_by_other {
            return Ok(None);
        }
        let Some(base_id) = first_inline(q, &controlled.id, BASE_VERSION)? else {
            return Ok(None);
        };
        let Some(base) = q.find_node_by_id(&base_id)? else {
            return Ok(None);
        };
        let mut frozen_path = path::child(&base.path, FROZEN_NODE);
        if let Some(relative) = relative {
            frozen_path = path::child(&frozen_path, relative);
        }
        Ok(q.find_node_by_path(&frozen_path)?.map(|n| n.id.clone()))
    }
}

/// Create one frozen node mirroring `source`
///
/// With `copy_properties` unset only the `jcr:frozen*` bookkeeping is
/// written.
fn freeze_node(
    q: &WorkspaceQuery,
    source: &NodeRecord,
    frozen_path: &str,
    copy_properties: bool,
) -> RepositoryResult<Arc<NodeRecord>> {
    let frozen = q.create_node(&NodeDefinition::new(frozen_path, NT_FROZEN_NODE))?;
    let primary = q.primary_type(&source.id)?;
    let mixins = q.mixin_types(&source.id)?;
    q.write_tokens(
        &frozen,
        "jcr:frozenPrimaryType",
        PropertyType::Name,
        vec![Token::Inline(primary.clone())],
        false,
    )?;
    q.write_tokens(
        &frozen,
        "jcr:frozenMixinTypes",
        PropertyType::Name,
        mixins.iter().map(|m| Token::Inline(m.clone())).collect(),
        true,
    )?;
    q.write_tokens(
        &frozen,
        "jcr:frozenUuid",
        PropertyType::String,
        vec![Token::Inline(source.id.clone())],
        false,
    )?;
    if !copy_properties {
        return Ok(frozen);
    }
    let properties = q.properties(&source.id)?;
    for record in properties.values() {
        if NOT_FROZEN.contains(&record.name.as_str())
            || q.types().is_protected_property(&primary, &mixins, &record.name)
        {
            continue;
        }
        let tokens = q.duplicate_tokens(&record.tokens)?;
        q.write_tokens(&frozen, &record.name, record.property_type, tokens, record.multiple)?;
    }
    Ok(frozen)
}

fn freeze_tree(q: &WorkspaceQuery, source: &NodeRecord, frozen_path: &str) -> RepositoryResult<()> {
    freeze_node(q, source, frozen_path, true)?;
    for child in q.children(&source.id, None)? {
        freeze_tree(q, &child, &path::child(frozen_path, &child.name))?;
    }
    Ok(())
}

/// Replace the live node's content properties with the frozen ones
fn restore_properties(q: &WorkspaceQuery, frozen: &NodeRecord, node: &NodeRecord) -> RepositoryResult<()> {
    let live = q.properties(&node.id)?;
    for name in live.keys().filter(|n| !is_administrative(n)) {
        q.remove_property_inner(&node.id, name)?;
    }
    let saved = q.properties(&frozen.id)?;
    for record in saved.values().filter(|r| !is_administrative(&r.name)) {
        let tokens = q.duplicate_tokens(&record.tokens)?;
        q.write_tokens(node, &record.name, record.property_type, tokens, record.multiple)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AccessControlEntry;
    use crate::principal::Principal;
    use crate::session::test_support::Workspace;

    fn open_to_everyone(ws: &Workspace) {
        let admin = ws.login(Principal::admin("root"));
        admin
            .access_control_manager()
            .set_policy("/", &[AccessControlEntry::allow("everyone", true, &["jcr:all"])])
            .unwrap();
        admin.commit().unwrap();
    }

    #[test]
    fn test_successor_names() {
        assert_eq!(successor_name(ROOT_VERSION), "1.0");
        assert_eq!(successor_name("1.0"), "1.1");
        assert_eq!(successor_name("1.9"), "1.10");
        assert!(history_path("ab").is_err());
        assert_eq!(
            history_path("abcdef-1").unwrap(),
            "/jcr:system/jcr:versionStorage/ab/cd/ef/abcdef-1"
        );
    }

    #[test]
    fn test_version_control_creates_history() {
        let ws = Workspace::new();
        let s = ws.login(Principal::system());
        let doc = s.add_node("/doc", "nt:unstructured").unwrap();
        doc.add_mixin(MIX_VERSIONABLE).unwrap();
        s.commit().unwrap();

        let id = doc.identifier().to_string();
        let history = s.node(&history_path(&id).unwrap()).unwrap();
        assert_eq!(history.primary_type().unwrap(), NT_VERSION_HISTORY);
        assert!(history.has_node(ROOT_VERSION).unwrap());
        assert!(doc.property(IS_CHECKED_OUT).unwrap().boolean().unwrap());
        assert_eq!(doc.property(CHECKED_OUT_BY).unwrap().string().unwrap(), "system");
        assert_eq!(
            doc.property(BASE_VERSION).unwrap().node().unwrap().name().unwrap(),
            ROOT_VERSION
        );
    }

    #[test]
    fn test_checkin_checkout_cycle() {
        let ws = Workspace::new();
        open_to_everyone(&ws);
        let alice = ws.login(Principal::user("alice"));
        let doc = alice.add_node("/doc", "nt:unstructured").unwrap();
        doc.add_mixin(MIX_VERSIONABLE).unwrap();
        doc.set_property("title", "draft").unwrap();
        alice.commit().unwrap();

        let vm = alice.version_manager();
        let v1 = vm.checkin("/doc").unwrap().unwrap();
        assert!(!vm.is_checked_out("/doc").unwrap());
        assert_eq!(vm.checkin("/doc").unwrap(), Some(v1.clone()));
        assert!(matches!(
            doc.set_property("title", "edit"),
            Err(RepositoryError::Version(_))
        ));

        let version = alice.node_by_identifier(&v1).unwrap();
        assert_eq!(version.name().unwrap(), "1.0");
        let frozen = version.node(FROZEN_NODE).unwrap();
        assert_eq!(frozen.property("title").unwrap().string().unwrap(), "draft");
        assert_eq!(frozen.property("jcr:frozenUuid").unwrap().string().unwrap(), doc.identifier());

        vm.checkout("/doc").unwrap();
        doc.set_property("title", "second").unwrap();
        alice.commit().unwrap();
        let v2 = vm.checkin("/doc").unwrap().unwrap();
        assert_eq!(alice.node_by_identifier(&v2).unwrap().name().unwrap(), "1.1");
    }

    #[test]
    fn test_reads_redirect_for_other_users() {
        let ws = Workspace::new();
        open_to_everyone(&ws);
        let alice = ws.login(Principal::user("alice"));
        let doc = alice.add_node("/doc", "nt:unstructured").unwrap();
        doc.add_mixin(MIX_VERSIONABLE).unwrap();
        doc.set_property("title", "published").unwrap();
        alice.commit().unwrap();
        alice.version_manager().checkin("/doc").unwrap();
        alice.version_manager().checkout("/doc").unwrap();
        doc.set_property("title", "work in progress").unwrap();
        doc.set_property("draftOnly", "x").unwrap();
        alice.commit().unwrap();

        let bob = ws.login(Principal::user("bob"));
        let seen = bob.node("/doc").unwrap();
        assert_eq!(seen.property("title").unwrap().string().unwrap(), "published");
        assert!(!seen.has_property("draftOnly").unwrap());
        assert!(!seen.has_property("jcr:frozenUuid").unwrap());
        assert!(seen.property(IS_CHECKED_OUT).unwrap().boolean().unwrap());
        assert!(matches!(
            seen.set_property("title", "hijack"),
            Err(RepositoryError::Version(_))
        ));
        assert!(matches!(
            bob.version_manager().checkout("/doc"),
            Err(RepositoryError::Version(_))
        ));

        assert_eq!(
            doc.property("title").unwrap().string().unwrap(),
            "work in progress"
        );
    }

    #[test]
    fn test_uncheckout_restores_base() {
        let ws = Workspace::new();
        let s = ws.login(Principal::system());
        let doc = s.add_node("/doc", "nt:unstructured").unwrap();
        doc.add_mixin(MIX_VERSIONABLE).unwrap();
        doc.set_property("title", "v1").unwrap();
        s.commit().unwrap();
        assert!(matches!(
            s.version_manager().uncheckout("/doc"),
            Err(RepositoryError::Version(_))
        ));

        s.version_manager().checkin("/doc").unwrap();
        s.version_manager().checkout("/doc").unwrap();
        doc.set_property("title", "scratch").unwrap();
        doc.set_property("extra", "x").unwrap();
        s.commit().unwrap();

        s.version_manager().uncheckout("/doc").unwrap();
        assert_eq!(doc.property("title").unwrap().string().unwrap(), "v1");
        assert!(!doc.has_property("extra").unwrap());
        assert!(!s.version_manager().is_checked_out("/doc").unwrap());
    }

    #[test]
    fn test_simple_versionable_has_no_history() {
        let ws = Workspace::new();
        let s = ws.login(Principal::system());
        let doc = s.add_node("/doc", "nt:unstructured").unwrap();
        doc.add_mixin(MIX_SIMPLE_VERSIONABLE).unwrap();
        s.commit().unwrap();
        assert_eq!(s.version_manager().checkin("/doc").unwrap(), None);
        assert!(!s.version_manager().is_checked_out("/doc").unwrap());
        assert_eq!(s.version_manager().base_version("/doc").unwrap(), None);
    }
}
