//! Node locks
//!
//! A lock sits on one `mix:lockable` node and is either shallow (the node
//! only) or deep (the whole subtree). Writes under a lock need its token in
//! the writing session. Open-scoped tokens follow their owner into every new
//! session; session-scoped locks die with the session that took them.

use crate::acl::PrivilegeSet;
use crate::error::{RepositoryError, RepositoryResult};
use crate::journal::{EventType, JournalEvent};
use crate::node_type::MIX_LOCKABLE;
use crate::query::{LockRow, WorkspaceQuery};
use crate::session::Session;
use crate::value::{PropertyType, Value};
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

pub(crate) const LOCK_OWNER: &str = "jcr:lockOwner";
pub(crate) const LOCK_IS_DEEP: &str = "jcr:lockIsDeep";

/// A lock as seen by one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    /// Path of the locked node, which may be an ancestor of the node asked about
    pub path: String,
    pub node_id: String,
    /// Present only when the session holds the token
    pub token: Option<String>,
    pub owner: String,
    pub is_deep: bool,
    pub is_session_scoped: bool,
    pub created: DateTime<Utc>,
}

impl Lock {
    fn from_row(row: LockRow, held: bool) -> Self {
        Self {
            path: row.item_path,
            node_id: row.item_id,
            token: held.then_some(row.token),
            owner: row.principal,
            is_deep: row.is_deep,
            is_session_scoped: row.session_id.is_some(),
            created: row.created,
        }
    }

    pub fn is_lock_owner(&self) -> bool {
        self.token.is_some()
    }
}

pub struct LockManager<'s> {
    session: &'s Session,
}

impl<'s> LockManager<'s> {
    pub(crate) fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Tokens held by the session, sorted
    pub fn lock_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.session.lock_token_set().borrow().iter().cloned().collect();
        tokens.sort();
        tokens
    }

    /// Take over the token of an existing open-scoped lock
    pub fn add_lock_token(&self, token: &str) -> RepositoryResult<()> {
        let row = self
            .session
            .query()
            .locks()
            .by_token(token)?
            .ok_or_else(|| RepositoryError::lock(format!("unknown lock token: {}", token)))?;
        if let Some(owner) = &row.session_id {
            if owner != self.session.identifier() {
                return Err(RepositoryError::lock(format!(
                    "lock on {} is scoped to another session",
                    row.item_path
                )));
            }
        }
        self.session
            .lock_token_set()
            .borrow_mut()
            .insert(token.to_string());
        Ok(())
    }

    pub fn remove_lock_token(&self, token: &str) -> RepositoryResult<()> {
        if self.session.lock_token_set().borrow_mut().remove(token) {
            Ok(())
        } else {
            Err(RepositoryError::lock(format!("lock token not held: {}", token)))
        }
    }

    /// The lock governing `node_path`
    pub fn get_lock(&self, node_path: &str) -> RepositoryResult<Lock> {
        let node = self.session.node_record(node_path)?;
        let row = self
            .session
            .applicable_lock(&node.path)?
            .ok_or_else(|| RepositoryError::lock(format!("{} is not locked", node.path)))?;
        let held = self.session.holds_token(&row.token);
        Ok(Lock::from_row(row, held))
    }

    pub fn is_locked(&self, node_path: &str) -> RepositoryResult<bool> {
        let node = self.session.node_record(node_path)?;
        Ok(self.session.applicable_lock(&node.path)?.is_some())
    }

    /// Whether a lock sits on this very node
    pub fn holds_lock(&self, node_path: &str) -> RepositoryResult<bool> {
        let node = self.session.node_record(node_path)?;
        Ok(self.session.query().locks().get(&node.id)?.is_some())
    }

    /// Lock a node and commit at once
    pub fn lock(&self, node_path: &str, is_deep: bool, session_scoped: bool) -> RepositoryResult<Lock> {
        let session = self.session;
        let node = session.node_record(node_path)?;
        session.check_privileges_at(&node.path, PrivilegeSet::LOCK_MANAGEMENT)?;
        if !session.query().is_node_type(&node.id, MIX_LOCKABLE)? {
            return Err(RepositoryError::constraint(format!(
                "{} is not {}",
                node.path, MIX_LOCKABLE
            )));
        }
        if let Some(existing) = session.applicable_lock(&node.path)? {
            return Err(RepositoryError::lock(format!(
                "{} is already locked at {}",
                node.path, existing.item_path
            )));
        }
        if is_deep {
            for below in session.query().locks().below(&node.path)? {
                if !session.holds_token(&below.token) {
                    return Err(RepositoryError::lock(format!(
                        "{} holds a lock owned by {}",
                        below.item_path, below.principal
                    )));
                }
            }
        }

        let token = Uuid::new_v4().to_string();
        let scope = session_scoped.then(|| session.identifier().to_string());
        session.write_and_commit(|q| {
            q.locks()
                .insert(&node.id, &token, is_deep, scope.as_deref(), session.user_id())?;
            q.write_property(
                &node.id,
                LOCK_OWNER,
                PropertyType::String,
                Some(&[Value::String(session.user_id().to_string())]),
                false,
            )?;
            q.write_property(
                &node.id,
                LOCK_IS_DEEP,
                PropertyType::Boolean,
                Some(&[Value::Boolean(is_deep)]),
                false,
            )?;
            q.journal().write(
                JournalEvent::new(EventType::Locked, &node.id, &node.path).info(serde_json::json!({
                    "deep": is_deep,
                    "sessionScoped": session_scoped,
                })),
            )
        })?;
        session.lock_token_set().borrow_mut().insert(token.clone());
        info!(path = %node.path, deep = is_deep, session_scoped, "Node locked");

        let row = session
            .query()
            .locks()
            .get(&node.id)?
            .ok_or_else(|| RepositoryError::lock(format!("{} lost its lock", node.path)))?;
        Ok(Lock::from_row(row, true))
    }

    /// Release the lock on this very node; the token must be held
    ///
    /// Privileged principals may break a lock without its token.
    pub fn unlock(&self, node_path: &str) -> RepositoryResult<()> {
        let session = self.session;
        let node = session.node_record(node_path)?;
        session.check_privileges_at(&node.path, PrivilegeSet::LOCK_MANAGEMENT)?;
        let row = session
            .query()
            .locks()
            .get(&node.id)?
            .ok_or_else(|| RepositoryError::lock(format!("{} is not locked", node.path)))?;
        if !session.holds_token(&row.token) && !session.is_privileged() {
            return Err(RepositoryError::lock(format!(
                "lock token for {} is not held",
                node.path
            )));
        }
        session.write_and_commit(|q| clear_lock(q, &node.id, &node.path))?;
        session.lock_token_set().borrow_mut().remove(&row.token);
        info!(path = %node.path, "Node unlocked");
        Ok(())
    }

    /// Reset the creation time of a held lock
    pub fn refresh_lock(&self, node_path: &str) -> RepositoryResult<Lock> {
        let session = self.session;
        let node = session.node_record(node_path)?;
        session.check_privileges_at(&node.path, PrivilegeSet::LOCK_MANAGEMENT)?;
        let row = session
            .query()
            .locks()
            .get(&node.id)?
            .ok_or_else(|| RepositoryError::lock(format!("{} is not locked", node.path)))?;
        if !session.holds_token(&row.token) {
            return Err(RepositoryError::lock(format!(
                "lock token for {} is not held",
                node.path
            )));
        }
        session.write_and_commit(|q| {
            q.locks().touch(&node.id)?;
            q.journal()
                .write(JournalEvent::new(EventType::LockRefreshed, &node.id, &node.path))
        })?;
        let row = session
            .query()
            .locks()
            .get(&node.id)?
            .ok_or_else(|| RepositoryError::lock(format!("{} lost its lock", node.path)))?;
        Ok(Lock::from_row(row, true))
    }
}

/// Drop a node's lock row and lock properties
pub(crate) fn clear_lock(q: &WorkspaceQuery, item_id: &str, item_path: &str) -> RepositoryResult<()> {
    q.locks().delete(item_id)?;
    q.remove_property_inner(item_id, LOCK_OWNER)?;
    q.remove_property_inner(item_id, LOCK_IS_DEEP)?;
    q.journal()
        .write(JournalEvent::new(EventType::Unlocked, item_id, item_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::Principal;
    use crate::session::test_support::Workspace;

    fn lockable(ws: &Workspace, paths: &[&str]) {
        let s = ws.login(Principal::system());
        for p in paths {
            s.add_node(p, "nt:folder").unwrap().add_mixin(MIX_LOCKABLE).unwrap();
        }
        s.commit().unwrap();
    }

    #[test]
    fn test_at_most_one_lock() {
        let ws = Workspace::new();
        lockable(&ws, &["/a"]);
        let first = ws.login(Principal::admin("ann"));
        let second = ws.login(Principal::admin("bob"));

        let lock = first.lock_manager().lock("/a", false, false).unwrap();
        assert!(lock.is_lock_owner());
        assert_eq!(lock.owner, "ann");
        assert!(matches!(
            second.lock_manager().lock("/a", false, false),
            Err(RepositoryError::Lock(_))
        ));
        let seen = second.lock_manager().get_lock("/a").unwrap();
        assert!(seen.token.is_none());

        first.lock_manager().unlock("/a").unwrap();
        second.lock_manager().lock("/a", false, false).unwrap();
        assert!(second.lock_manager().holds_lock("/a").unwrap());
    }

    #[test]
    fn test_unlock_needs_token() {
        let ws = Workspace::new();
        lockable(&ws, &["/a"]);
        let owner = ws.login(Principal::system());
        owner.lock_manager().lock("/a", false, false).unwrap();

        let admin = ws.login(Principal::admin("root"));
        let mallory = ws.login(Principal::user("mallory"));
        admin
            .access_control_manager()
            .set_policy("/", &[crate::acl::AccessControlEntry::allow("everyone", true, &["jcr:all"])])
            .unwrap();
        admin.commit().unwrap();

        assert!(matches!(
            mallory.lock_manager().unlock("/a"),
            Err(RepositoryError::Lock(_))
        ));
        assert!(matches!(
            mallory.lock_manager().remove_lock_token("nope"),
            Err(RepositoryError::Lock(_))
        ));
    }

    #[test]
    fn test_deep_lock_guards_subtree() {
        let ws = Workspace::new();
        lockable(&ws, &["/a"]);
        let s = ws.login(Principal::system());
        s.add_node("/a/b", "nt:folder").unwrap();
        s.commit().unwrap();

        let owner = ws.login(Principal::admin("ann"));
        owner.lock_manager().lock("/a", true, false).unwrap();
        assert!(owner.lock_manager().is_locked("/a/b").unwrap());
        assert!(!owner.lock_manager().holds_lock("/a/b").unwrap());

        let other = ws.login(Principal::admin("bob"));
        assert!(matches!(
            other.add_node("/a/b/c", "nt:folder"),
            Err(RepositoryError::Lock(_))
        ));
        owner.add_node("/a/b/c", "nt:folder").unwrap();
        owner.commit().unwrap();
    }

    #[test]
    fn test_shallow_lock_leaves_grandchildren_writable() {
        let ws = Workspace::new();
        lockable(&ws, &["/a"]);
        let s = ws.login(Principal::system());
        s.add_node("/a/b", "nt:folder").unwrap();
        s.commit().unwrap();

        let owner = ws.login(Principal::admin("ann"));
        owner.lock_manager().lock("/a", false, false).unwrap();
        let other = ws.login(Principal::admin("bob"));
        assert!(other.add_node("/a/x", "nt:folder").is_err());
        other.add_node("/a/b/x", "nt:folder").unwrap();
        other.commit().unwrap();
    }

    #[test]
    fn test_open_scoped_tokens_follow_owner() {
        let ws = Workspace::new();
        lockable(&ws, &["/a"]);
        let token = {
            let s = ws.login(Principal::admin("ann"));
            s.lock_manager().lock("/a", true, false).unwrap().token.unwrap()
        };
        let again = ws.login(Principal::admin("ann"));
        assert_eq!(again.lock_manager().lock_tokens(), vec![token.clone()]);

        let bob = ws.login(Principal::admin("bob"));
        bob.lock_manager().add_lock_token(&token).unwrap();
        bob.add_node("/a/x", "nt:folder").unwrap();
        bob.commit().unwrap();
        bob.lock_manager().refresh_lock("/a").unwrap();
    }

    #[test]
    fn test_lock_requires_lockable_and_clean_session() {
        let ws = Workspace::new();
        let s = ws.login(Principal::system());
        s.add_node("/plain", "nt:folder").unwrap();
        s.commit().unwrap();
        assert!(matches!(
            s.lock_manager().lock("/plain", false, false),
            Err(RepositoryError::ConstraintViolation(_))
        ));

        s.node("/plain").unwrap().add_mixin(MIX_LOCKABLE).unwrap();
        assert!(matches!(
            s.lock_manager().lock("/plain", false, false),
            Err(RepositoryError::InvalidItemState(_))
        ));
        s.commit().unwrap();
        s.lock_manager().lock("/plain", false, false).unwrap();
        let node = s.node("/plain").unwrap();
        assert_eq!(node.property(LOCK_OWNER).unwrap().string().unwrap(), "system");
        assert!(!node.property(LOCK_IS_DEEP).unwrap().boolean().unwrap());
    }
}
