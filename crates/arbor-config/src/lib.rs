//! # Arbor Configuration Library
//!
//! Typed configuration for the Arbor repository engine. A repository has one
//! top-level [`RepositoryConfig`]; each workspace may override its
//! [`WorkspaceConfig`] through an `etc/workspace.yml` file of its own.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use arbor_config::RepositoryConfig;
//!
//! let config = RepositoryConfig::load("repository.yml")?;
//! assert!(config.workspace.max_sessions >= 8);
//! # Ok::<(), arbor_config::ConfigError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod components;
mod error;
mod loader;

pub use components::*;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigFormat;
