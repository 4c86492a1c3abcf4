//! Arbor content repository engine
//!
//! A hierarchical, versioned, access-controlled content store on SQLite.
//! Each workspace is one database plus a fan-out blob directory.
//!
//! ## Features
//!
//! - **Sessions**: one principal, one connection, one lazily started
//!   transaction per unit of work
//! - **Access control**: inherited allow/deny entries evaluated nearest first
//! - **Locks**: shallow or deep, session- or open-scoped
//! - **Versioning**: checkin/checkout with frozen snapshots and a read
//!   redirect for other users while a node is checked out
//! - **Observation**: committed journal entries broadcast to filtered
//!   listeners, plus a queryable event journal
//! - **Blobs**: values over 3072 characters and all binaries live in `bin/`,
//!   reclaimed by two background sweepers
//!
//! ## Usage
//!
//! ```rust,no_run
//! use arbor_config::RepositoryConfig;
//! use arbor_store::{Principal, WorkspaceProvider};
//!
//! # async fn run() -> arbor_store::RepositoryResult<()> {
//! let provider = WorkspaceProvider::open(RepositoryConfig::with_root("./repo"), "default").await?;
//! let session = provider.login(Principal::admin("admin")).await?;
//! let page = session.add_node("/page", "nt:unstructured")?;
//! page.set_property("title", "Hello")?;
//! session.commit()?;
//! # drop(session);
//! provider.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod acl;
pub mod blob;
pub mod cache;
pub mod connection;
pub mod error;
pub mod index;
pub mod journal;
pub mod lock;
pub mod mime;
pub mod namespace;
pub mod node;
pub mod node_type;
pub mod observation;
pub mod path;
pub mod pattern;
pub mod principal;
pub mod provider;
pub mod query;
pub mod registry;
pub mod schema;
pub mod session;
pub mod sweeper;
pub mod value;
pub mod version;

// Re-exports
pub use acl::{AccessControlEntry, AccessControlManager, PrivilegeSet};
pub use error::{RepositoryError, RepositoryResult};
pub use index::IndexFeed;
pub use journal::{EventType, JournalEntry};
pub use lock::{Lock, LockManager};
pub use node::{Node, Property};
pub use node_type::{NodeTypeDef, NodeTypeOracle, NodeTypeRegistry, PropertyDefinition};
pub use observation::{EventBundle, EventFilter, EventListener, ObservationManager};
pub use principal::{Principal, PrincipalKind};
pub use provider::{WorkspaceProvider, WorkspaceProviderBuilder, SYSTEM_WORKSPACE};
pub use query::NodeDefinition;
pub use registry::NamespaceRegistry;
pub use session::Session;
pub use sweeper::{BlobCleaner, BlobGarbageCollector};
pub use value::{Binary, Decimal, PropertyType, Value};
pub use version::VersionManager;
