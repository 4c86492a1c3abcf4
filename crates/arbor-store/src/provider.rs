//! Workspace provider
//!
//! Owns everything shared by the sessions of one workspace: the connection
//! pool, node types, MIME table, session budget, observation manager and
//! the two blob sweepers.
//!
//! ## Layout
//!
//! ```text
//! <repository>/workspaces/<name>/
//!   data/workspace.db   SQLite database
//!   bin/                blob store
//!   etc/workspace.yml   optional overrides of the repository defaults
//!   etc/mime.types      optional MIME overrides
//!   index/              its absence triggers an index rebuild
//! ```
//!
//! ## Session budget
//!
//! At most `max_sessions` ordinary sessions are open at once. `login` waits
//! up to `login_timeout_ms` for a slot and then fails with
//! [`RepositoryError::LoginTimedOut`]. System sessions, and every session of
//! the `system` workspace, are exempt.

use crate::blob::BlobStore;
use crate::cache::CommitClock;
use crate::connection::{ConnectionPool, PoolConfig};
use crate::error::{RepositoryError, RepositoryResult};
use crate::index::IndexFeed;
use crate::mime::MimeTypes;
use crate::node_type::{NodeTypeOracle, NodeTypeRegistry, NT_FOLDER};
use crate::observation::ObservationManager;
use crate::principal::{Principal, SessionIdentifier};
use crate::query::{NodeDefinition, QueryContext, WorkspaceQuery};
use crate::session::{CommitHooks, Session, SYSTEM_PATH};
use crate::sweeper::{BlobCleaner, BlobGarbageCollector};
use crate::version::VERSION_STORAGE_PATH;
use arbor_config::{GarbageCollectionConfig, RepositoryConfig, SecurityConfig, WorkspaceConfig};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Workspace whose sessions never count against the budget
pub const SYSTEM_WORKSPACE: &str = "system";

/// A session's claim on the budget, released when the session closes
pub(crate) struct SessionLease {
    _permit: Option<OwnedSemaphorePermit>,
    active: Arc<AtomicUsize>,
}

impl SessionLease {
    fn new(permit: Option<OwnedSemaphorePermit>, active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            _permit: permit,
            active,
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Opens sessions against one workspace; shared with the sweepers
#[derive(Clone)]
pub(crate) struct SessionFactory {
    pool: ConnectionPool,
    context: QueryContext,
    security: Arc<SecurityConfig>,
    hooks: CommitHooks,
    active: Arc<AtomicUsize>,
}

impl SessionFactory {
    fn open(
        &self,
        principal: Principal,
        hooks: CommitHooks,
        permit: Option<OwnedSemaphorePermit>,
    ) -> RepositoryResult<Session> {
        let conn = self.pool.get()?;
        let lease = SessionLease::new(permit, self.active.clone());
        let query = WorkspaceQuery::new(
            conn,
            self.context.clone(),
            SessionIdentifier::new(principal.kind),
            &principal.user_id,
        );
        Session::open(query, principal, self.security.clone(), hooks, Some(lease))
    }

    pub(crate) fn system_session(&self) -> RepositoryResult<Session> {
        self.open(Principal::system(), self.hooks.clone(), None)
    }

    /// A system session whose commits notify nobody
    pub(crate) fn maintenance_session(&self) -> RepositoryResult<Session> {
        self.open(Principal::system(), CommitHooks::default(), None)
    }

    pub(crate) fn blobs(&self) -> &BlobStore {
        &self.context.blobs
    }

    pub(crate) fn workspace(&self) -> &str {
        &self.context.workspace
    }
}

/// Configures and opens a [`WorkspaceProvider`]
pub struct WorkspaceProviderBuilder {
    config: RepositoryConfig,
    name: String,
    node_types: Option<Arc<dyn NodeTypeOracle>>,
    index_feed: Option<Arc<dyn IndexFeed>>,
}

impl WorkspaceProviderBuilder {
    /// Replace the built-in node type registry
    pub fn node_types(mut self, types: Arc<dyn NodeTypeOracle>) -> Self {
        self.node_types = Some(types);
        self
    }

    pub fn index_feed(mut self, feed: Arc<dyn IndexFeed>) -> Self {
        self.index_feed = Some(feed);
        self
    }

    /// Open the database, bootstrap the workspace and start the sweepers
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn open(self) -> RepositoryResult<WorkspaceProvider> {
        let path = self.config.workspace_path(&self.name);
        let etc = path.join("etc");
        let workspace = self
            .config
            .workspace
            .clone()
            .validated()?
            .with_override_file(&etc.join("workspace.yml"))?;
        info!(
            workspace = %self.name,
            path = %path.display(),
            max_sessions = workspace.max_sessions,
            "Opening workspace"
        );

        let pool = ConnectionPool::new(PoolConfig::from_workspace(
            path.join("data").join("workspace.db"),
            &workspace,
        ))?;
        let types = self
            .node_types
            .unwrap_or_else(|| Arc::new(NodeTypeRegistry::new()));
        let events = ObservationManager::new(self.name.clone(), types.clone());
        let context = QueryContext {
            workspace: self.name.clone(),
            blobs: BlobStore::new(path.join("bin")),
            types,
            mime: Arc::new(MimeTypes::load(&etc.join("mime.types"))?),
            cache_size: workspace.node_cache_size,
            commits: CommitClock::default(),
        };
        let gc = self.config.gc.clone();
        let committed = gc.cleaner_enabled.then(|| Arc::new(Notify::new()));
        let factory = SessionFactory {
            pool,
            context,
            security: Arc::new(self.config.security.clone()),
            hooks: CommitHooks {
                committed: committed.clone(),
                index: self.index_feed.clone(),
                events: Some(events.clone()),
            },
            active: Arc::new(AtomicUsize::new(0)),
        };

        bootstrap(&factory, &workspace)?;
        rebuild_index_if_missing(&factory, &path, self.index_feed.as_deref())?;

        let provider = WorkspaceProvider {
            name: self.name,
            path,
            budget: Arc::new(Semaphore::new(workspace.max_sessions)),
            login_timeout: Duration::from_millis(workspace.login_timeout_ms),
            workspace,
            factory,
            events,
            cancel: CancellationToken::new(),
            sweepers: Mutex::new(Vec::new()),
            gc,
        };
        provider.start_sweepers(committed);
        Ok(provider)
    }
}

/// Create the namespaces, root, system folders and configured default nodes
fn bootstrap(factory: &SessionFactory, config: &WorkspaceConfig) -> RepositoryResult<()> {
    let session = factory.maintenance_session()?;
    let q = session.query();
    q.namespaces().seed()?;
    q.create_root()?;
    for system_path in [SYSTEM_PATH, VERSION_STORAGE_PATH] {
        if q.find_node_by_path(system_path)?.is_none() {
            q.create_node(&NodeDefinition::new(system_path, NT_FOLDER))?;
        }
    }
    for node in &config.default_nodes {
        let resolved = q.resolve_path(&node.path)?;
        if q.find_node_by_path(&resolved)?.is_some() {
            continue;
        }
        q.ensure_ancestors(&resolved)?;
        let mut def = NodeDefinition::new(&resolved, &node.primary_type);
        for mixin in &node.mixin_types {
            def = def.mixin(mixin);
        }
        session.create(def)?;
        debug!(path = %resolved, primary_type = %node.primary_type, "Default node created");
    }
    if let Some(transaction_id) = session.commit()? {
        info!(workspace = %factory.workspace(), transaction_id = %transaction_id, "Workspace bootstrapped");
    }
    Ok(())
}

fn rebuild_index_if_missing(
    factory: &SessionFactory,
    path: &Path,
    feed: Option<&dyn IndexFeed>,
) -> RepositoryResult<()> {
    let index_dir = path.join("index");
    if index_dir.exists() {
        return Ok(());
    }
    if let Some(feed) = feed {
        let session = factory.maintenance_session()?;
        info!(workspace = %factory.workspace(), "Index directory missing, rebuilding");
        if let Err(e) = feed.rebuild(factory.workspace(), &session) {
            warn!(workspace = %factory.workspace(), error = %e, "Index rebuild failed");
            return Ok(());
        }
    }
    std::fs::create_dir_all(&index_dir)?;
    Ok(())
}

/// One open workspace
pub struct WorkspaceProvider {
    name: String,
    path: PathBuf,
    workspace: WorkspaceConfig,
    gc: GarbageCollectionConfig,
    factory: SessionFactory,
    events: ObservationManager,
    budget: Arc<Semaphore>,
    login_timeout: Duration,
    cancel: CancellationToken,
    sweepers: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl WorkspaceProvider {
    pub fn builder(config: RepositoryConfig, name: impl Into<String>) -> WorkspaceProviderBuilder {
        WorkspaceProviderBuilder {
            config,
            name: name.into(),
            node_types: None,
            index_feed: None,
        }
    }

    /// Open with the built-in node types and no index feed
    pub async fn open(config: RepositoryConfig, name: impl Into<String>) -> RepositoryResult<Self> {
        Self::builder(config, name).open().await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Effective configuration after the workspace override file
    pub fn config(&self) -> &WorkspaceConfig {
        &self.workspace
    }

    /// Listener registry fed by every committing session of this workspace
    pub fn observation_manager(&self) -> &ObservationManager {
        &self.events
    }

    fn start_sweepers(&self, committed: Option<Arc<Notify>>) {
        let mut sweepers = self.sweepers.lock();
        if let Some(committed) = committed {
            sweepers.push(("blob cleaner", self.blob_cleaner().spawn(committed)));
        }
        if self.gc.enabled {
            sweepers.push(("blob garbage collector", self.garbage_collector().spawn()));
        }
        debug!(workspace = %self.name, sweepers = sweepers.len(), "Sweepers started");
    }

    /// The commit-driven cleaner, for running a pass on demand
    pub fn blob_cleaner(&self) -> BlobCleaner {
        BlobCleaner::new(self.factory.clone(), self.cancel.clone())
    }

    /// The periodic collector of untracked blobs
    pub fn garbage_collector(&self) -> BlobGarbageCollector {
        BlobGarbageCollector::new(
            self.factory.clone(),
            self.cancel.clone(),
            Duration::from_secs(self.gc.interval_secs),
            Duration::from_secs(self.gc.min_age_secs),
        )
    }

    /// Open a session, waiting for a budget slot if needed
    pub async fn login(&self, principal: Principal) -> RepositoryResult<Session> {
        if self.cancel.is_cancelled() {
            return Err(RepositoryError::InvalidItemState(format!(
                "workspace {} is shut down",
                self.name
            )));
        }
        if principal.is_system() || self.name == SYSTEM_WORKSPACE {
            return self.open_session(principal, None).await;
        }
        let permit = match tokio::time::timeout(self.login_timeout, self.budget.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(RepositoryError::InvalidItemState(format!(
                    "workspace {} is shut down",
                    self.name
                )))
            }
            Err(_) => {
                warn!(
                    workspace = %self.name,
                    user_id = %principal.user_id,
                    timeout_ms = self.login_timeout.as_millis() as u64,
                    "Session budget exhausted"
                );
                return Err(RepositoryError::LoginTimedOut(format!(
                    "no session available in {} after {} ms",
                    self.name,
                    self.login_timeout.as_millis()
                )));
            }
        };
        self.open_session(principal, Some(permit)).await
    }

    /// Check out a connection on a blocking thread; the pool wait is synchronous
    async fn open_session(
        &self,
        principal: Principal,
        permit: Option<OwnedSemaphorePermit>,
    ) -> RepositoryResult<Session> {
        let factory = self.factory.clone();
        let hooks = factory.hooks.clone();
        match tokio::task::spawn_blocking(move || factory.open(principal, hooks, permit)).await {
            Ok(result) => result,
            Err(e) => Err(RepositoryError::Pool(format!("session open task failed: {}", e))),
        }
    }

    /// A session for the system principal, outside the budget
    pub fn system_session(&self) -> RepositoryResult<Session> {
        self.factory.system_session()
    }

    /// Sessions currently open, system sessions included
    pub fn active_sessions(&self) -> usize {
        self.factory.active.load(Ordering::SeqCst)
    }

    /// Stop the sweepers, refuse new logins and close idle connections
    pub async fn shutdown(&self) {
        info!(workspace = %self.name, "Shutting down workspace");
        self.cancel.cancel();
        self.budget.close();

        let sweepers = std::mem::take(&mut *self.sweepers.lock());
        let timeout = Duration::from_millis(self.gc.shutdown_timeout_ms);
        for (name, mut handle) in sweepers {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => debug!(sweeper = name, "Sweeper stopped"),
                Ok(Err(e)) => warn!(sweeper = name, error = %e, "Sweeper panicked"),
                Err(_) => {
                    warn!(sweeper = name, "Sweeper did not complete within timeout, aborting");
                    handle.abort();
                }
            }
        }
        self.factory.pool.close();
        info!(workspace = %self.name, "Workspace shut down");
    }
}

impl Drop for WorkspaceProvider {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_support::RecordingFeed;
    use arbor_config::DefaultNodeConfig;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> RepositoryConfig {
        let mut config = RepositoryConfig::with_root(dir.path());
        config.workspace.login_timeout_ms = 100;
        config.gc.interval_secs = 3_600;
        config
    }

    #[tokio::test]
    async fn test_bootstrap_layout_and_default_nodes() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.workspace.default_nodes = vec![DefaultNodeConfig {
            path: "/content/site".to_string(),
            primary_type: "nt:unstructured".to_string(),
            mixin_types: vec!["mix:lockable".to_string()],
        }];
        let feed = Arc::new(RecordingFeed::default());
        let provider = WorkspaceProvider::builder(config.clone(), "default")
            .index_feed(feed.clone())
            .open()
            .await
            .unwrap();

        let ws = dir.path().join("workspaces/default");
        assert!(ws.join("data/workspace.db").exists());
        assert!(ws.join("index").is_dir());
        assert_eq!(feed.rebuilt.lock().as_slice(), ["default".to_string()]);

        let s = provider.system_session().unwrap();
        assert_eq!(s.node("/content").unwrap().primary_type().unwrap(), NT_FOLDER);
        assert!(s.node("/content/site").unwrap().is_node_type("mix:lockable").unwrap());
        assert!(s.node_exists(VERSION_STORAGE_PATH).unwrap());
        drop(s);
        provider.shutdown().await;

        // Reopening neither duplicates nodes nor rebuilds the index again
        let provider = WorkspaceProvider::builder(config, "default")
            .index_feed(feed.clone())
            .open()
            .await
            .unwrap();
        assert_eq!(feed.rebuilt.lock().len(), 1);
        let s = provider.system_session().unwrap();
        assert_eq!(s.root_node().unwrap().nodes(Some("content")).unwrap().len(), 1);
        drop(s);
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_commits_reach_index_feed() {
        let dir = TempDir::new().unwrap();
        let feed = Arc::new(RecordingFeed::default());
        let provider = WorkspaceProvider::builder(config(&dir), "default")
            .index_feed(feed.clone())
            .open()
            .await
            .unwrap();
        let s = provider.login(Principal::admin("root")).await.unwrap();
        s.add_node("/a", "nt:folder").unwrap();
        let tx = s.commit().unwrap().unwrap();
        assert!(s.commit().unwrap().is_none());

        let committed = feed.committed.lock().clone();
        let last = committed.last().unwrap();
        assert_eq!(last.0, "default");
        assert_eq!(last.1, tx);
        assert!(last.2 > 0);
        drop(s);
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_budget_and_exemptions() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.workspace.max_sessions = 1;
        let provider = WorkspaceProvider::open(config, "default").await.unwrap();
        assert_eq!(provider.config().max_sessions, 8);

        let mut held = Vec::new();
        for i in 0..8 {
            held.push(provider.login(Principal::user(format!("u{}", i))).await.unwrap());
        }
        assert_eq!(provider.active_sessions(), 8);
        assert!(matches!(
            provider.login(Principal::user("late")).await,
            Err(RepositoryError::LoginTimedOut(_))
        ));
        let system = provider.login(Principal::system()).await.unwrap();
        assert_eq!(provider.active_sessions(), 9);

        held.pop();
        assert!(provider.login(Principal::user("late")).await.is_ok());
        drop(system);
        drop(held);
        assert_eq!(provider.active_sessions(), 0);

        provider.shutdown().await;
        assert!(matches!(
            provider.login(Principal::user("after")).await,
            Err(RepositoryError::InvalidItemState(_))
        ));
    }

    #[tokio::test]
    async fn test_login_waiting_for_a_connection_yields_to_other_tasks() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.workspace.system_connections = 0;
        config.workspace.connection_wait_ms = 2_000;
        config.gc.enabled = false;
        config.gc.cleaner_enabled = false;
        let provider = WorkspaceProvider::open(config, "default").await.unwrap();

        // Every connection is checked out
        let held: Vec<Session> = (0..8).map(|_| provider.system_session().unwrap()).collect();
        assert!(matches!(provider.system_session(), Err(RepositoryError::Pool(_))));

        // The test runtime has one thread, so the release only runs if login yields
        let release = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(held);
        };
        let (waiting, ()) = tokio::join!(provider.login(Principal::system()), release);
        let s = waiting.unwrap();
        assert!(s.root_node().is_ok());

        let (a, b) = tokio::join!(
            provider.login(Principal::user("a")),
            provider.login(Principal::user("b"))
        );
        assert!(a.is_ok() && b.is_ok());
        drop(s);
        drop((a, b));
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_workspace_override_file() {
        let dir = TempDir::new().unwrap();
        let etc = dir.path().join("workspaces/tuned/etc");
        std::fs::create_dir_all(&etc).unwrap();
        std::fs::write(etc.join("workspace.yml"), "max_sessions: 12\nnode_cache_size: 128\n").unwrap();
        std::fs::write(etc.join("mime.types"), "text/x-arbor arb\n").unwrap();

        let provider = WorkspaceProvider::open(config(&dir), "tuned").await.unwrap();
        assert_eq!(provider.config().max_sessions, 12);
        assert_eq!(provider.config().node_cache_size, 128);

        let s = provider.system_session().unwrap();
        s.add_node("/notes.arb", "nt:file").unwrap();
        let content = s.add_node("/notes.arb/jcr:content", "nt:resource").unwrap();
        assert_eq!(content.property("jcr:mimeType").unwrap().string().unwrap(), "text/x-arbor");
        drop(s);
        provider.shutdown().await;
    }
}
