//! Principals and session identity

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Group every principal belongs to
pub const EVERYONE: &str = "everyone";

/// What kind of actor a session runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    System,
    Admin,
    Service,
    Guest,
    User,
}

impl PrincipalKind {
    fn namespace(&self) -> &'static str {
        match self {
            PrincipalKind::System => "system",
            PrincipalKind::Admin => "admin",
            PrincipalKind::Service => "service",
            PrincipalKind::Guest => "guest",
            PrincipalKind::User => "generic",
        }
    }

    /// Kinds that bypass access control entirely
    pub fn is_privileged(&self) -> bool {
        matches!(self, PrincipalKind::System | PrincipalKind::Admin | PrincipalKind::Service)
    }
}

/// The actor behind a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub kind: PrincipalKind,
    pub groups: Vec<String>,
}

impl Principal {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind: PrincipalKind::User,
            groups: Vec::new(),
        }
    }

    pub fn system() -> Self {
        Self {
            user_id: "system".to_string(),
            kind: PrincipalKind::System,
            groups: Vec::new(),
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind: PrincipalKind::Admin,
            groups: Vec::new(),
        }
    }

    pub fn service(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind: PrincipalKind::Service,
            groups: Vec::new(),
        }
    }

    pub fn guest() -> Self {
        Self {
            user_id: "guest".to_string(),
            kind: PrincipalKind::Guest,
            groups: Vec::new(),
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// `everyone`, then the groups, then the user itself
    pub fn names(&self) -> Vec<(&str, bool)> {
        let mut names = vec![(EVERYONE, true)];
        names.extend(self.groups.iter().map(|g| (g.as_str(), true)));
        names.push((self.user_id.as_str(), false));
        names
    }

    pub fn is_system(&self) -> bool {
        self.kind == PrincipalKind::System
    }
}

/// Stable id of one session and its current transaction
#[derive(Debug)]
pub struct SessionIdentifier {
    value: String,
    created_nanos: u128,
    transaction_seq: AtomicU64,
    journal_seq: AtomicU64,
}

impl SessionIdentifier {
    pub fn new(kind: PrincipalKind) -> Self {
        let created_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self {
            value: format!("{}:{}/{}", kind.namespace(), Uuid::new_v4(), created_nanos),
            created_nanos,
            transaction_seq: AtomicU64::new(1),
            journal_seq: AtomicU64::new(0),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn created_nanos(&self) -> u128 {
        self.created_nanos
    }

    pub fn transaction_id(&self) -> String {
        format!("{}-{}", self.value, self.transaction_seq.load(Ordering::SeqCst))
    }

    /// Advance after a successful commit, returning the new transaction id
    pub fn next_transaction(&self) -> String {
        let seq = self.transaction_seq.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", self.value, seq)
    }

    /// Sortable id for the next journal entry
    pub fn next_journal_id(&self) -> String {
        let seq = self.journal_seq.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{:024}-{:012}", self.created_nanos, seq)
    }
}

impl std::fmt::Display for SessionIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_sequence() {
        let id = SessionIdentifier::new(PrincipalKind::User);
        assert!(id.as_str().starts_with("generic:"));
        assert_eq!(id.transaction_id(), format!("{}-1", id));
        assert_eq!(id.next_transaction(), format!("{}-2", id));
        assert_eq!(id.transaction_id(), format!("{}-2", id));
    }

    #[test]
    fn test_journal_ids_sort_in_write_order() {
        let id = SessionIdentifier::new(PrincipalKind::System);
        let a = id.next_journal_id();
        let b = id.next_journal_id();
        assert!(a < b);
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn test_principal_names_order() {
        let p = Principal::user("alice").with_groups(["editors"]);
        assert_eq!(
            p.names(),
            vec![("everyone", true), ("editors", true), ("alice", false)]
        );
        assert!(!p.kind.is_privileged());
        assert!(Principal::system().kind.is_privileged());
    }
}
