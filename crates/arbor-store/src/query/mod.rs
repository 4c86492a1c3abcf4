//! Workspace query engine
//!
//! `WorkspaceQuery` is the only code that touches the relational schema. It
//! owns the session's pooled connection and translates node, property, lock,
//! access-control and namespace operations into statements against it. It
//! performs no privilege or lock checks; those live in [`crate::session`].
//!
//! ## Transactions
//!
//! The relational transaction is started lazily with `BEGIN IMMEDIATE` by the
//! first write. Every write runs inside [`WorkspaceQuery::atomic`], which wraps
//! it in a savepoint so a failed multi-step operation leaves nothing behind.
//! [`WorkspaceQuery::commit`] purges soft-deleted rows before committing.

mod aces;
mod files;
mod items;
mod journal;
mod locks;
mod namespaces;
mod properties;

pub use aces::AceQuery;
pub use files::FileQuery;
pub use items::{CopyResult, NodeDefinition, RemoveOptions};
pub use journal::JournalQuery;
pub use locks::{LockQuery, LockRow};
pub use namespaces::NamespaceQuery;

use crate::blob::BlobStore;
use crate::cache::{CommitClock, ItemCache};
use crate::error::{RepositoryError, RepositoryResult};
use crate::mime::MimeTypes;
use crate::namespace::{self, NamespaceCache, ParsedName};
use crate::node_type::NodeTypeOracle;
use crate::path;
use crate::principal::SessionIdentifier;
use crate::value::{PropertyType, Token};
use rusqlite::Connection;
use std::cell::{Cell, RefCell, RefMut};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::connection::PooledConnection;

/// A decoded `items` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: String,
    pub name: String,
    pub path: String,
    pub parent_id: Option<String>,
}

/// A decoded `properties` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRecord {
    /// `<owner id>/<name>`
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub property_type: PropertyType,
    pub tokens: Vec<Token>,
    pub multiple: bool,
}

impl PropertyRecord {
    pub fn row_id(owner_id: &str, name: &str) -> String {
        format!("{}/{}", owner_id, name)
    }

    /// First inline token, if any
    pub fn first_inline(&self) -> Option<&str> {
        self.tokens.iter().find_map(|t| match t {
            Token::Inline(s) => Some(s.as_str()),
            Token::Blob(_) => None,
        })
    }

    pub fn inline_values(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Inline(s) => Some(s.as_str()),
            Token::Blob(_) => None,
        })
    }
}

/// Properties of one node, by name
pub type PropertyMap = BTreeMap<String, PropertyRecord>;

/// What a query engine needs besides its connection
#[derive(Clone)]
pub struct QueryContext {
    pub workspace: String,
    pub blobs: BlobStore,
    pub types: Arc<dyn NodeTypeOracle>,
    pub mime: Arc<MimeTypes>,
    pub cache_size: usize,
    /// Shared by every session of the workspace
    pub commits: CommitClock,
}

pub struct WorkspaceQuery {
    conn: PooledConnection,
    context: QueryContext,
    session_id: SessionIdentifier,
    user_id: String,
    user_data: RefCell<Option<String>>,
    cache: RefCell<ItemCache>,
    // Commit count the cached rows were read at
    cache_epoch: Cell<u64>,
    namespaces: RefCell<NamespaceCache>,
}

impl WorkspaceQuery {
    pub fn new(
        conn: PooledConnection,
        context: QueryContext,
        session_id: SessionIdentifier,
        user_id: &str,
    ) -> Self {
        let cache = ItemCache::new(context.cache_size);
        let cache_epoch = Cell::new(context.commits.now());
        Self {
            conn,
            context,
            session_id,
            user_id: user_id.to_string(),
            user_data: RefCell::new(None),
            cache: RefCell::new(cache),
            cache_epoch,
            namespaces: RefCell::new(NamespaceCache::default()),
        }
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn workspace(&self) -> &str {
        &self.context.workspace
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.context.blobs
    }

    pub fn types(&self) -> &dyn NodeTypeOracle {
        self.context.types.as_ref()
    }

    pub fn mime(&self) -> &MimeTypes {
        &self.context.mime
    }

    pub fn session_id(&self) -> &SessionIdentifier {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn transaction_id(&self) -> String {
        self.session_id.transaction_id()
    }

    pub fn user_data(&self) -> Option<String> {
        self.user_data.borrow().clone()
    }

    pub fn set_user_data(&self, data: Option<String>) {
        *self.user_data.borrow_mut() = data;
    }

    /// The item cache, emptied first if any session committed since it was filled
    pub(crate) fn cache(&self) -> RefMut<'_, ItemCache> {
        let mut cache = self.cache.borrow_mut();
        let now = self.context.commits.now();
        if self.cache_epoch.get() != now {
            cache.clear();
            self.cache_epoch.set(now);
        }
        cache
    }

    pub(crate) fn namespace_cache(&self) -> RefMut<'_, NamespaceCache> {
        self.namespaces.borrow_mut()
    }

    pub fn files(&self) -> FileQuery<'_> {
        FileQuery::new(self)
    }

    pub fn journal(&self) -> JournalQuery<'_> {
        JournalQuery::new(self)
    }

    pub fn locks(&self) -> LockQuery<'_> {
        LockQuery::new(self)
    }

    pub fn aces(&self) -> AceQuery<'_> {
        AceQuery::new(self)
    }

    pub fn namespaces(&self) -> NamespaceQuery<'_> {
        NamespaceQuery::new(self)
    }

    /// Whether a relational transaction is open on this connection
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn begin(&self) -> RepositoryResult<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            debug!(transaction_id = %self.transaction_id(), "Transaction started");
        }
        Ok(())
    }

    /// Run one write unit to completion or not at all
    ///
    /// On failure the savepoint is rolled back and the item cache cleared;
    /// the enclosing transaction stays open for the caller to roll back.
    pub fn atomic<T>(&self, op: impl FnOnce(&Self) -> RepositoryResult<T>) -> RepositoryResult<T> {
        self.begin()?;
        self.conn.execute_batch("SAVEPOINT arbor_op")?;
        match op(self) {
            Ok(value) => {
                self.conn.execute_batch("RELEASE arbor_op")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self
                    .conn
                    .execute_batch("ROLLBACK TO arbor_op; RELEASE arbor_op")
                {
                    warn!(error = %rollback, "Failed to roll back savepoint");
                }
                self.cache.borrow_mut().clear();
                Err(e)
            }
        }
    }

    /// Purge soft-deleted rows and commit
    ///
    /// Returns the id of the committed transaction, or `None` when nothing
    /// was written since the last commit.
    pub fn commit(&self) -> RepositoryResult<Option<String>> {
        if self.conn.is_autocommit() {
            return Ok(None);
        }
        let transaction_id = self.transaction_id();
        self.conn.execute_batch(
            r#"
            DELETE FROM items WHERE is_deleted = 1;
            DELETE FROM properties WHERE is_deleted = 1;
            COMMIT;
            "#,
        )?;
        self.session_id.next_transaction();
        let epoch = self.context.commits.tick();
        self.cache.borrow_mut().clear();
        self.cache_epoch.set(epoch);
        debug!(transaction_id = %transaction_id, "Transaction committed");
        Ok(Some(transaction_id))
    }

    pub fn rollback(&self) -> RepositoryResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
            debug!(transaction_id = %self.transaction_id(), "Transaction rolled back");
        }
        self.cache.borrow_mut().clear();
        Ok(())
    }

    /// Normalize a name to the prefix registered for its namespace
    pub fn resolve_name(&self, name: &str) -> RepositoryResult<String> {
        match namespace::parse_name(name)? {
            ParsedName::Expanded { uri, local } => {
                let prefix = self.prefix_for_uri(uri)?;
                Ok(namespace::qualified(&prefix, local))
            }
            ParsedName::Prefixed { prefix, local } => {
                let aliased = self.namespaces.borrow().alias(prefix).map(str::to_string);
                match aliased {
                    Some(uri) => {
                        let registered = self.prefix_for_uri(&uri)?;
                        Ok(namespace::qualified(&registered, local))
                    }
                    None => {
                        self.uri_for_prefix(prefix)?;
                        Ok(namespace::qualified(prefix, local))
                    }
                }
            }
        }
    }

    /// Normalize an absolute path and each of its names
    pub fn resolve_path(&self, raw: &str) -> RepositoryResult<String> {
        let segments = split_segments(raw);
        if !raw.starts_with('/') {
            return Err(RepositoryError::value_format(format!(
                "not an absolute path: {}",
                raw
            )));
        }
        let mut resolved = String::new();
        for segment in segments {
            resolved.push('/');
            match segment {
                "" | "." | ".." => resolved.push_str(segment),
                name => resolved.push_str(&self.resolve_name(name)?),
            }
        }
        if resolved.is_empty() {
            resolved.push('/');
        }
        path::normalize(&resolved)
    }

    /// Resolve `relative` against an already normalized `base`
    pub fn resolve_relative(&self, base: &str, relative: &str) -> RepositoryResult<String> {
        if relative.starts_with('/') {
            return self.resolve_path(relative);
        }
        let joined = if path::is_root(base) {
            format!("/{}", relative)
        } else {
            format!("{}/{}", base, relative)
        };
        self.resolve_path(&joined)
    }

    fn prefix_for_uri(&self, uri: &str) -> RepositoryResult<String> {
        if let Some(prefix) = self.namespaces.borrow().prefix(uri) {
            return Ok(prefix.to_string());
        }
        let prefix = self
            .namespaces()
            .prefix(uri)?
            .ok_or_else(|| RepositoryError::namespace(format!("unknown namespace URI: {}", uri)))?;
        self.namespaces.borrow_mut().remember(&prefix, uri);
        Ok(prefix)
    }

    fn uri_for_prefix(&self, prefix: &str) -> RepositoryResult<String> {
        if let Some(uri) = self.namespaces.borrow().registered_uri(prefix) {
            return Ok(uri.to_string());
        }
        let uri = self
            .namespaces()
            .uri(prefix)?
            .ok_or_else(|| RepositoryError::namespace(format!("unknown namespace prefix: {}", prefix)))?;
        self.namespaces.borrow_mut().remember(prefix, &uri);
        Ok(uri)
    }
}

/// Split on `/` outside of `{uri}` groups
fn split_segments(raw: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                if i > start {
                    segments.push(&raw[start..i]);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < raw.len() {
        segments.push(&raw[start..]);
    }
    segments
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::connection::{ConnectionPool, PoolConfig};
    use crate::node_type::NodeTypeRegistry;
    use crate::principal::PrincipalKind;
    use tempfile::TempDir;

    pub struct Fixture {
        pub query: WorkspaceQuery,
        _dir: TempDir,
        _pool: ConnectionPool,
    }

    /// A query engine over a fresh database with namespaces and the root seeded
    pub fn fixture() -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let mut config = PoolConfig::new(dir.path().join("data/workspace.db"));
        config.min_idle = 1;
        config.max_connections = 4;
        let pool = ConnectionPool::new(config).expect("pool");
        let context = QueryContext {
            workspace: "default".to_string(),
            blobs: BlobStore::new(dir.path().join("bin")),
            types: Arc::new(NodeTypeRegistry::new()),
            mime: Arc::new(MimeTypes::default()),
            cache_size: 16,
            commits: CommitClock::default(),
        };
        let query = WorkspaceQuery::new(
            pool.get().expect("connection"),
            context,
            SessionIdentifier::new(PrincipalKind::System),
            "system",
        );
        query.namespaces().seed().expect("seed namespaces");
        query.create_root().expect("root");
        query.commit().expect("commit");
        Fixture {
            query,
            _dir: dir,
            _pool: pool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::fixture;
    use super::*;

    #[test]
    fn test_split_keeps_expanded_names() {
        assert_eq!(
            split_segments("/a/{http://www.jcp.org/jcr/1.0}content/b"),
            vec!["a", "{http://www.jcp.org/jcr/1.0}content", "b"]
        );
        assert_eq!(split_segments("/"), Vec::<&str>::new());
    }

    #[test]
    fn test_resolve_name_spellings() {
        let f = fixture();
        let q = &f.query;
        assert_eq!(q.resolve_name("jcr:content").unwrap(), "jcr:content");
        assert_eq!(
            q.resolve_name("{http://www.jcp.org/jcr/1.0}content").unwrap(),
            "jcr:content"
        );
        assert_eq!(q.resolve_name("plain").unwrap(), "plain");
        assert!(matches!(
            q.resolve_name("nope:x"),
            Err(RepositoryError::Namespace(_))
        ));
    }

    #[test]
    fn test_alias_rewrites_to_registered_prefix() {
        let f = fixture();
        let q = &f.query;
        q.atomic(|q| q.namespaces().register("app", "urn:app")).unwrap();
        q.namespace_cache().set_alias("a2", "urn:app").unwrap();
        assert_eq!(q.resolve_path("/a2:x/./app:y/..").unwrap(), "/app:x");
    }

    #[test]
    fn test_atomic_failure_leaves_nothing() {
        let f = fixture();
        let q = &f.query;
        let result: RepositoryResult<()> = q.atomic(|q| {
            q.create_node(&NodeDefinition::new("/a", "nt:folder"))?;
            Err(RepositoryError::constraint("boom"))
        });
        assert!(result.is_err());
        assert!(q.find_node_by_path("/a").unwrap().is_none());
        q.rollback().unwrap();
    }

    #[test]
    fn test_commit_advances_transaction() {
        let f = fixture();
        let q = &f.query;
        let before = q.transaction_id();
        assert_eq!(q.commit().unwrap(), None);
        assert_eq!(q.transaction_id(), before);

        q.atomic(|q| q.create_node(&NodeDefinition::new("/a", "nt:folder"))).unwrap();
        assert_eq!(q.commit().unwrap(), Some(before.clone()));
        assert_ne!(q.transaction_id(), before);
    }
}
