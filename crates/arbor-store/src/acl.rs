//! Privileges and access-control evaluation
//!
//! Entries are evaluated nearest node first. For each privilege the first
//! entry whose principal matches decides allow or deny; a privilege no entry
//! mentions anywhere up to the root is denied.

use crate::error::{RepositoryError, RepositoryResult};
use crate::journal::{EventType, JournalEvent};
use crate::principal::Principal;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use tracing::info;

/// Bit set over the built-in privileges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrivilegeSet(u32);

impl PrivilegeSet {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1 << 0);
    pub const MODIFY_PROPERTIES: Self = Self(1 << 1);
    pub const ADD_CHILD_NODES: Self = Self(1 << 2);
    pub const REMOVE_NODE: Self = Self(1 << 3);
    pub const REMOVE_CHILD_NODES: Self = Self(1 << 4);
    pub const READ_ACCESS_CONTROL: Self = Self(1 << 5);
    pub const MODIFY_ACCESS_CONTROL: Self = Self(1 << 6);
    pub const LOCK_MANAGEMENT: Self = Self(1 << 7);
    pub const VERSION_MANAGEMENT: Self = Self(1 << 8);
    pub const NODE_TYPE_MANAGEMENT: Self = Self(1 << 9);
    pub const RETENTION_MANAGEMENT: Self = Self(1 << 10);
    pub const LIFECYCLE_MANAGEMENT: Self = Self(1 << 11);
    pub const WRITE: Self = Self(
        Self::MODIFY_PROPERTIES.0
            | Self::ADD_CHILD_NODES.0
            | Self::REMOVE_NODE.0
            | Self::REMOVE_CHILD_NODES.0,
    );
    pub const ALL: Self = Self((1 << 12) - 1);

    const SIMPLE: [(&'static str, PrivilegeSet); 12] = [
        ("jcr:read", Self::READ),
        ("jcr:modifyProperties", Self::MODIFY_PROPERTIES),
        ("jcr:addChildNodes", Self::ADD_CHILD_NODES),
        ("jcr:removeNode", Self::REMOVE_NODE),
        ("jcr:removeChildNodes", Self::REMOVE_CHILD_NODES),
        ("jcr:readAccessControl", Self::READ_ACCESS_CONTROL),
        ("jcr:modifyAccessControl", Self::MODIFY_ACCESS_CONTROL),
        ("jcr:lockManagement", Self::LOCK_MANAGEMENT),
        ("jcr:versionManagement", Self::VERSION_MANAGEMENT),
        ("jcr:nodeTypeManagement", Self::NODE_TYPE_MANAGEMENT),
        ("jcr:retentionManagement", Self::RETENTION_MANAGEMENT),
        ("jcr:lifecycleManagement", Self::LIFECYCLE_MANAGEMENT),
    ];

    /// Look up a privilege or aggregate by name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "jcr:write" => Some(Self::WRITE),
            "jcr:all" => Some(Self::ALL),
            other => Self::SIMPLE
                .iter()
                .find(|(n, _)| *n == other)
                .map(|(_, p)| *p),
        }
    }

    /// Union of the named privileges; unknown names are an error
    pub fn from_names<I, S>(names: I) -> RepositoryResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::NONE;
        for name in names {
            let name = name.as_ref();
            set |= Self::from_name(name).ok_or_else(|| {
                RepositoryError::access_denied(format!("unknown privilege: {}", name))
            })?;
        }
        Ok(set)
    }

    /// Names of the non-aggregate privileges in the set
    pub fn names(&self) -> Vec<&'static str> {
        Self::SIMPLE
            .iter()
            .filter(|(_, p)| self.contains(*p))
            .map(|(n, _)| *n)
            .collect()
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    fn bits(&self) -> impl Iterator<Item = Self> + '_ {
        Self::SIMPLE
            .iter()
            .map(|(_, p)| *p)
            .filter(move |p| self.contains(*p))
    }
}

impl BitOr for PrivilegeSet {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PrivilegeSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PrivilegeSet {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for PrivilegeSet {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0 & Self::ALL.0)
    }
}

impl fmt::Display for PrivilegeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names().join(", "))
    }
}

/// One entry of a node's access-control list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlEntry {
    pub principal: String,
    pub is_group: bool,
    pub privileges: Vec<String>,
    pub allow: bool,
}

impl AccessControlEntry {
    pub fn allow(principal: &str, is_group: bool, privileges: &[&str]) -> Self {
        Self {
            principal: principal.to_string(),
            is_group,
            privileges: privileges.iter().map(|p| p.to_string()).collect(),
            allow: true,
        }
    }

    pub fn deny(principal: &str, is_group: bool, privileges: &[&str]) -> Self {
        Self {
            allow: false,
            ..Self::allow(principal, is_group, privileges)
        }
    }

    /// Privileges named by this entry, ignoring unknown names
    pub fn privilege_set(&self) -> PrivilegeSet {
        self.privileges
            .iter()
            .filter_map(|n| PrivilegeSet::from_name(n))
            .fold(PrivilegeSet::NONE, |acc, p| acc | p)
    }

    fn matches(&self, principal: &Principal) -> bool {
        principal
            .names()
            .iter()
            .any(|(name, is_group)| *name == self.principal && *is_group == self.is_group)
    }

    /// Reject unknown privilege names before storing
    pub fn validate(&self) -> RepositoryResult<()> {
        if self.principal.is_empty() {
            return Err(RepositoryError::access_denied("entry without principal"));
        }
        PrivilegeSet::from_names(&self.privileges).map(|_| ())
    }
}

/// Entries of one node, as collected for evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntries {
    pub path: String,
    pub entries: Vec<AccessControlEntry>,
}

/// Effective privileges of `principal` given entries ordered nearest first
pub fn evaluate(levels: &[NodeEntries], principal: &Principal) -> PrivilegeSet {
    let mut decided = PrivilegeSet::NONE;
    let mut granted = PrivilegeSet::NONE;
    for level in levels {
        for entry in &level.entries {
            if !entry.matches(principal) {
                continue;
            }
            for bit in entry.privilege_set().bits() {
                if decided.contains(bit) {
                    continue;
                }
                decided |= bit;
                if entry.allow {
                    granted |= bit;
                }
            }
            if decided == PrivilegeSet::ALL {
                return granted;
            }
        }
    }
    granted
}

/// Reads and edits access-control lists through a session
///
/// Policy changes join the session's pending unit of work and take effect
/// for other sessions at commit.
pub struct AccessControlManager<'s> {
    session: &'s Session,
}

impl<'s> AccessControlManager<'s> {
    pub(crate) fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Entries stored on the node itself
    pub fn get_policy(&self, node_path: &str) -> RepositoryResult<Vec<AccessControlEntry>> {
        let node = self.session.node_record(node_path)?;
        self.session
            .check_privileges_at(&node.path, PrivilegeSet::READ_ACCESS_CONTROL)?;
        self.session.query().aces().entries(&node.id)
    }

    /// Entries from the node up to the root, nearest first
    pub fn get_effective_entries(&self, node_path: &str) -> RepositoryResult<Vec<NodeEntries>> {
        let node = self.session.node_record(node_path)?;
        self.session
            .check_privileges_at(&node.path, PrivilegeSet::READ_ACCESS_CONTROL)?;
        self.session.query().aces().effective(&node.path)
    }

    /// Replace the node's entries
    pub fn set_policy(&self, node_path: &str, entries: &[AccessControlEntry]) -> RepositoryResult<()> {
        for entry in entries {
            entry.validate()?;
        }
        let node = self.session.node_record(node_path)?;
        self.session
            .check_privileges_at(&node.path, PrivilegeSet::MODIFY_ACCESS_CONTROL)?;
        self.session.check_writable(&node)?;
        self.session.query().atomic(|q| {
            q.aces().replace(&node.id, entries)?;
            let primary = q.primary_type(&node.id).ok();
            q.journal().write(
                JournalEvent::new(EventType::AccessControlPolicyChanged, &node.id, &node.path)
                    .primary_type(primary)
                    .info(serde_json::json!({ "entries": entries })),
            )
        })?;
        info!(path = %node.path, entries = entries.len(), "Access control policy set");
        Ok(())
    }

    /// Drop every entry stored on the node
    pub fn remove_policy(&self, node_path: &str) -> RepositoryResult<()> {
        let node = self.session.node_record(node_path)?;
        self.session
            .check_privileges_at(&node.path, PrivilegeSet::MODIFY_ACCESS_CONTROL)?;
        self.session.check_writable(&node)?;
        let removed = self.session.query().atomic(|q| {
            let removed = q.aces().delete(&node.id)?;
            if removed > 0 {
                let primary = q.primary_type(&node.id).ok();
                q.journal().write(
                    JournalEvent::new(EventType::AccessControlPolicyRemoved, &node.id, &node.path)
                        .primary_type(primary),
                )?;
            }
            Ok(removed)
        })?;
        if removed == 0 {
            return Err(RepositoryError::not_found(format!(
                "access control policy of {}",
                node.path
            )));
        }
        info!(path = %node.path, removed, "Access control policy removed");
        Ok(())
    }

    pub fn privileges(&self, node_path: &str) -> RepositoryResult<PrivilegeSet> {
        self.session.privileges(node_path)
    }

    /// Whether every named privilege is granted
    pub fn has_privileges(&self, node_path: &str, names: &[&str]) -> RepositoryResult<bool> {
        let wanted = PrivilegeSet::from_names(names)?;
        self.session.has_privileges(node_path, wanted)
    }
}
