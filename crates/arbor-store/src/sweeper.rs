//! Background reclamation of blob files
//!
//! Two sweepers keep `bin/` in step with the `files` table:
//!
//! - [`BlobCleaner`] wakes after commits and deletes the files of released
//!   rows, then the rows themselves.
//! - [`BlobGarbageCollector`] runs on an interval and deletes old files no
//!   row tracks at all (left behind by rolled-back writes or crashes).
//!
//! Each pass runs on a blocking thread with its own system session and
//! checks the cancellation token between items.

use crate::error::RepositoryResult;
use crate::provider::SessionFactory;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Deletes blobs whose `files` rows were released
#[derive(Clone)]
pub struct BlobCleaner {
    factory: SessionFactory,
    cancel: CancellationToken,
}

impl BlobCleaner {
    pub(crate) fn new(factory: SessionFactory, cancel: CancellationToken) -> Self {
        Self { factory, cancel }
    }

    /// One pass; returns the number of blobs reclaimed
    pub fn run_once(&self) -> RepositoryResult<usize> {
        let session = self.factory.maintenance_session()?;
        let q = session.query();
        let released = q.files().deleted()?;
        let mut reclaimed = 0;
        for id in &released {
            if self.cancel.is_cancelled() {
                debug!(remaining = released.len() - reclaimed, "Blob cleaner cancelled");
                break;
            }
            let result = q
                .blobs()
                .delete(id)
                .and_then(|_| q.atomic(|q| q.files().purge(id)));
            match result {
                Ok(_) => reclaimed += 1,
                Err(e) => warn!(blob_id = %id, error = %e, "Failed to reclaim blob"),
            }
        }
        session.commit()?;
        if reclaimed > 0 {
            info!(workspace = %self.factory.workspace(), reclaimed, "Released blobs reclaimed");
        }
        Ok(reclaimed)
    }

    /// Run a pass after every commit notification until cancelled
    pub(crate) fn spawn(self, committed: Arc<Notify>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = committed.notified() => {}
                }
                let cleaner = self.clone();
                match tokio::task::spawn_blocking(move || cleaner.run_once()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "Blob cleaner pass failed"),
                    Err(e) => warn!(error = %e, "Blob cleaner pass panicked"),
                }
            }
            debug!("Blob cleaner stopped");
        })
    }
}

/// Deletes old blob files that no `files` row tracks
#[derive(Clone)]
pub struct BlobGarbageCollector {
    factory: SessionFactory,
    cancel: CancellationToken,
    interval: Duration,
    min_age: Duration,
}

impl BlobGarbageCollector {
    pub(crate) fn new(
        factory: SessionFactory,
        cancel: CancellationToken,
        interval: Duration,
        min_age: Duration,
    ) -> Self {
        Self {
            factory,
            cancel,
            interval,
            min_age,
        }
    }

    /// Only consider files at least this old
    pub fn with_min_age(mut self, min_age: Duration) -> Self {
        self.min_age = min_age;
        self
    }

    /// One pass; returns the number of files deleted
    pub fn run_once(&self) -> RepositoryResult<usize> {
        let root = self.factory.blobs().root().to_path_buf();
        if !root.is_dir() {
            return Ok(0);
        }
        let session = self.factory.maintenance_session()?;
        let files = session.query().files();
        let now = SystemTime::now();
        let mut deleted = 0;

        for entry in WalkDir::new(&root).min_depth(1) {
            if self.cancel.is_cancelled() {
                debug!(deleted, "Blob garbage collector cancelled");
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Failed to read blob directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let age = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok());
            match age {
                Some(age) if age >= self.min_age => {}
                _ => continue,
            }
            let id = entry.file_name().to_string_lossy();
            if files.is_tracked(&id)? {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!(blob_id = %id, "Untracked blob deleted");
                    deleted += 1;
                }
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to delete blob"),
            }
        }

        prune_empty_dirs(&root);
        if deleted > 0 {
            info!(workspace = %self.factory.workspace(), deleted, "Untracked blobs collected");
        }
        Ok(deleted)
    }

    /// Run a pass every interval until cancelled
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
                let collector = self.clone();
                match tokio::task::spawn_blocking(move || collector.run_once()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "Blob garbage collection failed"),
                    Err(e) => warn!(error = %e, "Blob garbage collection panicked"),
                }
            }
            debug!("Blob garbage collector stopped");
        })
    }
}

/// Remove emptied fan-out directories below `root`, deepest first
fn prune_empty_dirs(root: &Path) {
    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
    {
        let empty = match std::fs::read_dir(entry.path()) {
            Ok(mut dir) => dir.next().is_none(),
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "Failed to read directory");
                false
            }
        };
        if empty {
            if let Err(e) = std::fs::remove_dir(entry.path()) {
                debug!(path = %entry.path().display(), error = %e, "Failed to prune directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::principal::Principal;
    use crate::provider::WorkspaceProvider;
    use arbor_config::RepositoryConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn provider(dir: &TempDir) -> WorkspaceProvider {
        let mut config = RepositoryConfig::with_root(dir.path());
        // Passes are driven by hand
        config.gc.enabled = false;
        config.gc.cleaner_enabled = false;
        WorkspaceProvider::open(config, "default").await.unwrap()
    }

    fn blob_files(root: &std::path::Path) -> usize {
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .count()
    }

    #[test]
    fn test_prune_keeps_occupied_directories() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("bin");
        std::fs::create_dir_all(root.join("ab/cd/ef/01")).unwrap();
        std::fs::create_dir_all(root.join("ab/cd/99/02")).unwrap();
        std::fs::write(root.join("ab/cd/99/02/abcd9902"), b"x").unwrap();

        super::prune_empty_dirs(&root);
        assert!(!root.join("ab/cd/ef").exists());
        assert!(root.join("ab/cd/99/02/abcd9902").is_file());
        assert!(root.is_dir());

        // A vanished root is not an error
        super::prune_empty_dirs(&dir.path().join("missing"));
    }

    #[tokio::test]
    async fn test_cleaner_reclaims_released_blobs() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir).await;
        let bin = provider.path().join("bin");

        let s = provider.system_session().unwrap();
        let n = s.add_node("/n", "nt:unstructured").unwrap();
        n.set_property("data", vec![1u8; 64]).unwrap();
        s.commit().unwrap();
        assert_eq!(blob_files(&bin), 1);

        n.set_property("data", vec![2u8; 64]).unwrap();
        s.commit().unwrap();
        assert_eq!(blob_files(&bin), 2);
        assert_eq!(s.query().files().deleted().unwrap().len(), 1);

        assert_eq!(provider.blob_cleaner().run_once().unwrap(), 1);
        assert_eq!(blob_files(&bin), 1);
        assert!(s.query().files().deleted().unwrap().is_empty());
        assert_eq!(n.property("data").unwrap().binary().unwrap().to_vec().unwrap(), vec![2u8; 64]);
        assert_eq!(provider.blob_cleaner().run_once().unwrap(), 0);
        drop(s);
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_collector_removes_untracked_files() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir).await;
        let bin = provider.path().join("bin");

        let s = provider.system_session().unwrap();
        let n = s.add_node("/n", "nt:unstructured").unwrap();
        n.set_property("kept", vec![1u8; 16]).unwrap();
        s.commit().unwrap();
        n.set_property("lost", vec![2u8; 16]).unwrap();
        s.rollback().unwrap();
        assert_eq!(blob_files(&bin), 2);

        let young = provider.garbage_collector().with_min_age(Duration::from_secs(3_600));
        assert_eq!(young.run_once().unwrap(), 0);

        let collector = provider.garbage_collector().with_min_age(Duration::ZERO);
        assert_eq!(collector.run_once().unwrap(), 1);
        assert_eq!(blob_files(&bin), 1);
        assert_eq!(n.property("kept").unwrap().length().unwrap(), 16);
        drop(s);
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_cleaner_runs_after_commit() {
        let dir = TempDir::new().unwrap();
        let mut config = RepositoryConfig::with_root(dir.path());
        config.gc.enabled = false;
        let provider = WorkspaceProvider::open(config, "default").await.unwrap();

        let s = provider.login(Principal::system()).await.unwrap();
        let n = s.add_node("/n", "nt:unstructured").unwrap();
        n.set_property("data", vec![1u8; 8]).unwrap();
        s.commit().unwrap();
        n.remove_property("data").unwrap();
        s.commit().unwrap();

        let mut reclaimed = false;
        for _ in 0..50 {
            if s.query().files().deleted().unwrap().is_empty() {
                reclaimed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(reclaimed);
        drop(s);
        provider.shutdown().await;
    }
}
