use async_trait::async_trait;
use axum::body::Bytes;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::StorageError;
use crate::models::extension_of;

/// One accepted file on its way to a backend.
#[derive(Debug, Clone)]
pub struct SaveInput {
    pub data: Bytes,
    pub mime: Option<String>,
    pub filename: Option<String>,
    /// Extension to keep when `filename` has none.
    pub extension: Option<String>,
    pub key_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub key: String,
    pub url: Option<String>,
    pub mime: Option<String>,
    pub size: u64,
}

/// Named backend receiving uploaded files.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn save(&self, input: SaveInput) -> Result<StoredFile, StorageError>;

    async fn delete(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("delete"))
    }

    fn url(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Fresh key: optional prefix, a v4 uuid and the original extension.
fn generate_key(input: &SaveInput) -> String {
    let extension = input
        .filename
        .as_deref()
        .and_then(extension_of)
        .or_else(|| input.extension.clone());
    let prefix = input
        .key_prefix
        .as_deref()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| format!("{p}/"))
        .unwrap_or_default();
    match extension {
        Some(ext) => format!("{prefix}{}.{ext}", Uuid::new_v4()),
        None => format!("{prefix}{}", Uuid::new_v4()),
    }
}

/// Keys are relative paths without `..`, root or drive components.
fn checked_relative(key: &str) -> Result<&Path, StorageError> {
    let path = Path::new(key);
    let valid = !key.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(path)
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Files written under a root directory, optionally served from a public base URL.
#[derive(Debug, Clone)]
pub struct LocalDiskStorage {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalDiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
        }
    }

    #[must_use]
    pub fn public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = Some(base.into());
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a stored key.
    pub fn path_of(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(checked_relative(key)?))
    }
}

#[async_trait]
impl FileStorage for LocalDiskStorage {
    async fn save(&self, input: SaveInput) -> Result<StoredFile, StorageError> {
        let key = generate_key(&input);
        let path = self.path_of(&key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &input.data).await?;
        tracing::debug!(key = %key, size = input.data.len(), "Stored upload on disk");

        Ok(StoredFile {
            url: self.url(&key),
            key,
            mime: input.mime,
            size: input.data.len() as u64,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_of(key)?).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn url(&self, key: &str) -> Option<String> {
        self.public_base_url
            .as_deref()
            .map(|base| format!("{}/{key}", base.trim_end_matches('/')))
    }
}

/// Files kept in process memory. Keys double as URLs under `memory://`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<String, (Bytes, Option<String>)>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<(Bytes, Option<String>)> {
        self.files.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait]
impl FileStorage for MemoryStorage {
    async fn save(&self, input: SaveInput) -> Result<StoredFile, StorageError> {
        let key = generate_key(&input);
        let size = input.data.len() as u64;
        self.files
            .write()
            .await
            .insert(key.clone(), (input.data, input.mime.clone()));
        Ok(StoredFile {
            url: self.url(&key),
            key,
            mime: input.mime,
            size,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.files.write().await.remove(key);
        Ok(())
    }

    fn url(&self, key: &str) -> Option<String> {
        Some(format!("memory://{key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(filename: Option<&str>, prefix: Option<&str>) -> SaveInput {
        SaveInput {
            data: Bytes::from_static(b"hello"),
            mime: Some("text/plain".to_string()),
            filename: filename.map(str::to_string),
            extension: None,
            key_prefix: prefix.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_local_disk_save_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path()).public_base_url("https://cdn.example.com/");

        let stored = storage.save(input(Some("notes.TXT"), Some("/docs/"))).await.unwrap();
        assert!(stored.key.starts_with("docs/"));
        assert!(stored.key.ends_with(".txt"));
        assert_eq!(stored.size, 5);
        assert_eq!(stored.url, Some(format!("https://cdn.example.com/{}", stored.key)));

        let path = storage.path_of(&stored.key).unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello");

        storage.delete(&stored.key).await.unwrap();
        assert!(!path.exists());
        // deleting twice is fine
        storage.delete(&stored.key).await.unwrap();
    }

    #[test]
    fn test_keys_cannot_escape_root() {
        let storage = LocalDiskStorage::new("/srv/uploads");
        assert!(storage.path_of("../etc/passwd").is_err());
        assert!(storage.path_of("/etc/passwd").is_err());
        assert!(storage.path_of("").is_err());
        assert!(storage.path_of("a/b.png").is_ok());
    }

    #[tokio::test]
    async fn test_memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        let stored = storage.save(input(None, None)).await.unwrap();
        assert!(!stored.key.contains('.'));
        assert_eq!(stored.url, Some(format!("memory://{}", stored.key)));
        let (data, mime) = storage.get(&stored.key).await.unwrap();
        assert_eq!(&data[..], b"hello");
        assert_eq!(mime.as_deref(), Some("text/plain"));
        storage.delete(&stored.key).await.unwrap();
        assert!(storage.is_empty().await);
    }
}
