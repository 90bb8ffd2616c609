use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use super::{normalize_uri, ContentStore, ContentStoreError};

/// Filesystem-backed content store. The directory tree mirrors the URI tree.
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn content_path(&self, uri: &str) -> Result<(String, PathBuf), ContentStoreError> {
        let uri = normalize_uri(uri)?;
        let path = self.base_path.join(uri.trim_start_matches('/'));
        Ok((uri, path))
    }
}

#[async_trait]
impl ContentStore for LocalStore {
    async fn put(&self, uri: &str, data: Bytes) -> Result<(), ContentStoreError> {
        let (_, path) = self.content_path(uri)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        Ok(())
    }

    async fn get(&self, uri: &str) -> Result<Bytes, ContentStoreError> {
        let (uri, path) = self.content_path(uri)?;
        if !path.is_file() {
            return Err(ContentStoreError::NotFound(uri));
        }
        let data = tokio::fs::read(&path).await?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, uri: &str) -> Result<(), ContentStoreError> {
        let (_, path) = self.content_path(uri)?;
        if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn exists(&self, uri: &str) -> Result<bool, ContentStoreError> {
        let (_, path) = self.content_path(uri)?;
        Ok(path.is_file())
    }

    async fn list(&self, uri: &str) -> Result<Vec<String>, ContentStoreError> {
        let (uri, path) = self.content_path(uri)?;
        if path.is_file() {
            return Ok(vec![uri]);
        }
        if !path.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        let mut pending = vec![(uri, path)];
        while let Some((dir_uri, dir_path)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir_path).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                let child_uri = format!("{dir_uri}/{name}");
                if entry.file_type().await?.is_dir() {
                    pending.push((child_uri, entry.path()));
                } else {
                    found.push(child_uri);
                }
            }
        }

        found.sort();
        Ok(found)
    }
}
