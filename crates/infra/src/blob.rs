//! Raw upload storage.
//!
//! `put` hashes while it stores and returns the lowercase hex SHA-256 digest
//! used for intake dedup. The returned `path` is opaque to callers and is the
//! only way to read the bytes back.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("blob i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl BlobError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == ErrorKind::NotFound {
            return BlobError::NotFound(path.display().to_string());
        }
        BlobError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, file_name: &str, bytes: &[u8]) -> Result<StoredBlob, BlobError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError>;

    async fn delete(&self, path: &str) -> Result<(), BlobError>;
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Keep only the final path component, replacing anything unusual.
fn safe_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload.bin".to_string()
    } else {
        cleaned
    }
}

/// Files under a root directory, named `<uuid>_<file name>`.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStore for LocalFileStorage {
    async fn put(&self, file_name: &str, bytes: &[u8]) -> Result<StoredBlob, BlobError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| BlobError::io(&self.root, e))?;

        let path = self
            .root
            .join(format!("{}_{}", Uuid::new_v4().simple(), safe_file_name(file_name)));

        let mut hasher = Sha256::new();
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| BlobError::io(&path, e))?;
        for chunk in bytes.chunks(64 * 1024) {
            file.write_all(chunk)
                .await
                .map_err(|e| BlobError::io(&path, e))?;
            hasher.update(chunk);
        }
        file.flush().await.map_err(|e| BlobError::io(&path, e))?;

        let stored = StoredBlob {
            path: path.display().to_string(),
            sha256: format!("{:x}", hasher.finalize()),
            size_bytes: bytes.len() as u64,
        };
        debug!(path = %stored.path, size_bytes = stored.size_bytes, "blob stored");
        Ok(stored)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        tokio::fs::read(path)
            .await
            .map_err(|e| BlobError::io(Path::new(path), e))
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| BlobError::io(Path::new(path), e))
    }
}

/// Blobs kept in a map, keyed by a synthetic `mem://` path.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned(path: &str) -> BlobError {
        BlobError::Io {
            path: path.to_string(),
            source: std::io::Error::other("lock poisoned"),
        }
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, file_name: &str, bytes: &[u8]) -> Result<StoredBlob, BlobError> {
        let path = format!("mem://{}_{}", Uuid::new_v4().simple(), safe_file_name(file_name));
        self.blobs
            .write()
            .map_err(|_| Self::poisoned(&path))?
            .insert(path.clone(), bytes.to_vec());
        Ok(StoredBlob {
            path,
            sha256: sha256_hex(bytes),
            size_bytes: bytes.len() as u64,
        })
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .read()
            .map_err(|_| Self::poisoned(path))?
            .get(path)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        self.blobs
            .write()
            .map_err(|_| Self::poisoned(path))?
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("hello world")
    const HELLO: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn file_names_are_flattened() {
        assert_eq!(safe_file_name("../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name("C:\\docs\\Invoice 7.pdf"), "Invoice_7.pdf");
        assert_eq!(safe_file_name(".."), "upload.bin");
        assert_eq!(safe_file_name(""), "upload.bin");
    }

    #[tokio::test]
    async fn local_storage_hashes_while_writing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path().join("blobs"));

        let stored = storage.put("hello.txt", b"hello world").await.unwrap();
        assert_eq!(stored.sha256, HELLO);
        assert_eq!(stored.size_bytes, 11);
        assert!(stored.path.ends_with("_hello.txt"));
        assert!(Path::new(&stored.path).starts_with(dir.path()));

        assert_eq!(storage.get(&stored.path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn same_name_never_collides() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        let a = storage.put("a.txt", b"one").await.unwrap();
        let b = storage.put("a.txt", b"two").await.unwrap();
        assert_ne!(a.path, b.path);
        assert_eq!(storage.get(&a.path).await.unwrap(), b"one");
    }

    #[tokio::test]
    async fn deleted_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        let stored = storage.put("gone.txt", b"bye").await.unwrap();

        storage.delete(&stored.path).await.unwrap();
        assert!(matches!(
            storage.get(&stored.path).await.unwrap_err(),
            BlobError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn in_memory_store_matches_local_hashing() {
        let store = InMemoryBlobStore::new();
        let stored = store.put("hello.txt", b"hello world").await.unwrap();
        assert_eq!(stored.sha256, HELLO);
        assert_eq!(store.get(&stored.path).await.unwrap(), b"hello world");

        store.delete(&stored.path).await.unwrap();
        assert!(store.is_empty());
    }
}
