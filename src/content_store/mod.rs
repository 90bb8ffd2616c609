mod local;

pub use local::LocalStore;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Content not found: {0}")]
    NotFound(String),
    #[error("Invalid URI: {0}")]
    InvalidUri(String),
}

/// The published (public) content tree, addressed by URI.
///
/// URIs passed in are normalized with [`normalize_uri`] by the implementation;
/// URIs returned from [`ContentStore::list`] are already in normalized form.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(&self, uri: &str, data: Bytes) -> Result<(), ContentStoreError>;
    async fn get(&self, uri: &str) -> Result<Bytes, ContentStoreError>;
    /// Remove an item, or a whole directory when `uri` names one.
    async fn delete(&self, uri: &str) -> Result<(), ContentStoreError>;
    /// True when `uri` is a stored item (directories do not count).
    async fn exists(&self, uri: &str) -> Result<bool, ContentStoreError>;
    /// Every item at or below `uri`, sorted.
    async fn list(&self, uri: &str) -> Result<Vec<String>, ContentStoreError>;
}

/// Canonical form of a content URI: leading `/`, no empty, `.` or `..` segments.
pub fn normalize_uri(uri: &str) -> Result<String, ContentStoreError> {
    let trimmed = uri.trim();
    if trimmed.contains('\\') || trimmed.contains('\0') {
        return Err(ContentStoreError::InvalidUri(uri.to_string()));
    }

    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" => continue,
            "." | ".." => return Err(ContentStoreError::InvalidUri(uri.to_string())),
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(ContentStoreError::InvalidUri(uri.to_string()));
    }
    Ok(format!("/{}", segments.join("/")))
}

/// True when `uri` lies strictly below the directory `dir`.
pub fn is_below(uri: &str, dir: &str) -> bool {
    uri.len() > dir.len() + 1 && uri.starts_with(dir) && uri.as_bytes()[dir.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_slashes() {
        assert_eq!(normalize_uri("a/b.json").unwrap(), "/a/b.json");
        assert_eq!(normalize_uri("//a///b.json/").unwrap(), "/a/b.json");
        assert_eq!(normalize_uri(" /economy/data.json ").unwrap(), "/economy/data.json");
    }

    #[test]
    fn rejects_traversal_and_empty() {
        assert!(normalize_uri("/a/../b").is_err());
        assert!(normalize_uri("./a").is_err());
        assert!(normalize_uri("/").is_err());
        assert!(normalize_uri("").is_err());
        assert!(normalize_uri("a\\b").is_err());
    }

    #[test]
    fn below_requires_segment_boundary() {
        assert!(is_below("/a/b/c.json", "/a/b"));
        assert!(!is_below("/a/bc/d.json", "/a/b"));
        assert!(!is_below("/a/b", "/a/b"));
    }
}
