//! Filesystem blob store
//!
//! Blobs live at `<root>/<id[0:2]>/<id[2:4]>/<id[4:6]>/<id[6:8]>/<id>`. Ids are
//! random and every blob is written exactly once; writing over an existing
//! file is an error. Sizes and soft-delete state are tracked in the `files`
//! table, not here.

use crate::error::{RepositoryError, RepositoryResult};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Handle to one stored blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub id: String,
    pub size: u64,
    path: PathBuf,
}

impl BlobRef {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> RepositoryResult<File> {
        File::open(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RepositoryError::not_found(format!("blob {}", self.id)),
            _ => e.into(),
        })
    }

    pub fn read(&self) -> RepositoryResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size as usize);
        self.open()?.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Fan-out directory tree of immutable blobs
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: Arc<PathBuf>,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn generate_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Location of a blob, validating the id shape
    pub fn path_for(&self, id: &str) -> RepositoryResult<PathBuf> {
        if id.len() < 8 || !id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(RepositoryError::value_format(format!("invalid blob id: {}", id)));
        }
        Ok(self
            .root
            .join(&id[0..2])
            .join(&id[2..4])
            .join(&id[4..6])
            .join(&id[6..8])
            .join(id))
    }

    /// Store `bytes` under a fresh id
    pub fn write_new(&self, bytes: &[u8]) -> RepositoryResult<BlobRef> {
        self.write(&Self::generate_id(), bytes)
    }

    /// Store `bytes` under `id`; fails if that blob already exists
    pub fn write(&self, id: &str, bytes: &[u8]) -> RepositoryResult<BlobRef> {
        let path = self.path_for(id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => RepositoryError::exists(format!("blob {}", id)),
                _ => e.into(),
            })?;
        file.write_all(bytes)?;
        file.sync_data()?;
        debug!(blob_id = %id, size = bytes.len(), "Blob written");
        Ok(BlobRef {
            id: id.to_string(),
            size: bytes.len() as u64,
            path,
        })
    }

    /// Handle for an existing blob whose size is already known
    pub fn reference(&self, id: &str, size: u64) -> RepositoryResult<BlobRef> {
        Ok(BlobRef {
            id: id.to_string(),
            size,
            path: self.path_for(id)?,
        })
    }

    pub fn exists(&self, id: &str) -> bool {
        self.path_for(id).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Remove the file; a blob that is already gone counts as removed
    pub fn delete(&self, id: &str) -> RepositoryResult<bool> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(blob_id = %id, "Blob deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fan_out_layout() {
        let store = BlobStore::new("/bin");
        let path = store.path_for("0123456789abcdef").unwrap();
        assert_eq!(path, PathBuf::from("/bin/01/23/45/67/0123456789abcdef"));
        assert!(store.path_for("abc").is_err());
        assert!(store.path_for("../../etc/passwd").is_err());
    }

    #[test]
    fn test_write_read_delete() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());

        let blob = store.write_new(b"payload").expect("write");
        assert_eq!(blob.size, 7);
        assert!(store.exists(&blob.id));
        assert_eq!(blob.read().unwrap(), b"payload");

        let again = store.reference(&blob.id, blob.size).unwrap();
        assert_eq!(again, blob);

        assert!(store.delete(&blob.id).unwrap());
        assert!(!store.delete(&blob.id).unwrap());
        assert!(matches!(blob.read(), Err(RepositoryError::NotFound(_))));
    }

    #[test]
    fn test_blob_written_once() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());
        store.write("deadbeef00", b"a").unwrap();
        assert!(matches!(
            store.write("deadbeef00", b"b"),
            Err(RepositoryError::ItemExists(_))
        ));
    }
}
