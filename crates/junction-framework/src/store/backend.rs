use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::error::StoreResult;

/// Key/value storage for serialized groups.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Loads the document stored under `key`.
    async fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Stores `document` under `key`, replacing any previous document.
    async fn save(&self, key: &str, document: Vec<u8>) -> StoreResult<()>;

    /// Deletes the document under `key`, if any.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Loads every stored document, in no particular order.
    ///
    /// Documents carry their own key; backends are free to store them under
    /// names that cannot be mapped back to it.
    async fn documents(&self) -> StoreResult<Vec<Vec<u8>>>;

    /// Returns the number of stored documents.
    async fn len(&self) -> StoreResult<usize> {
        Ok(self.documents().await?.len())
    }
}

/// Backend holding documents in memory.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    documents: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for InMemoryBackend {
    async fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.documents.lock().get(key).cloned())
    }

    async fn save(&self, key: &str, document: Vec<u8>) -> StoreResult<()> {
        self.documents.lock().insert(key.to_string(), document);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.documents.lock().remove(key);
        Ok(())
    }

    async fn documents(&self) -> StoreResult<Vec<Vec<u8>>> {
        Ok(self.documents.lock().values().cloned().collect())
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.documents.lock().len())
    }
}

/// Backend writing one JSON file per group into a directory.
///
/// Each file is named by the hex SHA-256 digest of its key, so keys of any
/// length or content map to short, valid names. Writes go to a temporary
/// file that is then renamed into place.
#[derive(Debug, Clone)]
pub struct FileBackend {
    directory: PathBuf,
}

const EXTENSION: &str = "json";

impl FileBackend {
    /// Uses `directory`, creating it if missing.
    pub async fn open(directory: impl Into<PathBuf>) -> StoreResult<Self> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await?;
        Ok(Self { directory })
    }

    /// Returns the storage directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.directory
            .join(hex::encode(digest))
            .with_extension(EXTENSION)
    }

    async fn document_paths(&self) -> StoreResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl StoreBackend for FileBackend {
    async fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, document: Vec<u8>) -> StoreResult<()> {
        let path = self.path_for(key);
        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, document).await?;
        tokio::fs::rename(&staging, &path).await?;
        trace!(path = %path.display(), "Saved group document");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn documents(&self) -> StoreResult<Vec<Vec<u8>>> {
        let mut documents = Vec::new();
        for path in self.document_paths().await? {
            match tokio::fs::read(&path).await {
                Ok(bytes) => documents.push(bytes),
                // removed between listing and reading
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(documents)
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.document_paths().await?.len())
    }
}
