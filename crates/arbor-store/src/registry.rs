//! Workspace-wide namespace registry
//!
//! Registration changes persistent state shared by every session, so only
//! privileged principals may do it, and each change commits on its own.

use crate::error::{RepositoryError, RepositoryResult};
use crate::session::Session;

pub struct NamespaceRegistry<'s> {
    session: &'s Session,
}

impl<'s> NamespaceRegistry<'s> {
    pub(crate) fn new(session: &'s Session) -> Self {
        Self { session }
    }

    fn check_admin(&self, action: &str) -> RepositoryResult<()> {
        if self.session.is_privileged() {
            Ok(())
        } else {
            Err(RepositoryError::access_denied(format!(
                "{} may not {} namespaces",
                self.session.user_id(),
                action
            )))
        }
    }

    pub fn register(&self, prefix: &str, uri: &str) -> RepositoryResult<()> {
        self.check_admin("register")?;
        self.session
            .write_and_commit(|q| q.namespaces().register(prefix, uri))
    }

    pub fn unregister(&self, prefix: &str) -> RepositoryResult<()> {
        self.check_admin("unregister")?;
        self.session
            .write_and_commit(|q| q.namespaces().unregister(prefix))
    }

    pub fn uri(&self, prefix: &str) -> RepositoryResult<String> {
        self.session
            .query()
            .namespaces()
            .uri(prefix)?
            .ok_or_else(|| RepositoryError::namespace(format!("unknown namespace prefix: {}", prefix)))
    }

    pub fn prefix(&self, uri: &str) -> RepositoryResult<String> {
        self.session.namespace_prefix(uri)
    }

    pub fn prefixes(&self) -> RepositoryResult<Vec<String>> {
        self.session.namespace_prefixes()
    }

    pub fn uris(&self) -> RepositoryResult<Vec<String>> {
        Ok(self
            .session
            .query()
            .namespaces()
            .all()?
            .into_iter()
            .map(|(_, uri)| uri)
            .collect())
    }
}
