use std::path::{Path, PathBuf};

use super::collection::{Collection, DESCRIPTION_FILE};
use super::description::{ApprovalStatus, CollectionDescription, EventType, Stage};
use crate::error::{ReleaseError, Result};
use crate::locks::KeyedLocks;

/// Actor recorded on events the service raises itself.
pub const SYSTEM_ACTOR: &str = "system";

/// Directory-backed set of collections: `<root>/<id>/collection.json`.
pub struct CollectionRegistry {
    root: PathBuf,
    locks: KeyedLocks,
}

impl CollectionRegistry {
    pub fn new<P: AsRef<Path>>(root: P) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: KeyedLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn load(&self, path: PathBuf) -> Result<Collection> {
        let json = tokio::fs::read(path.join(DESCRIPTION_FILE)).await?;
        let description: CollectionDescription = serde_json::from_slice(&json)?;
        let lock = self.locks.handle(&description.id);
        Ok(Collection::from_parts(path, description, lock))
    }

    /// Every readable collection, ordered by name. Unreadable folders are skipped.
    pub async fn list(&self) -> Result<Vec<Collection>> {
        let mut collections = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            match self.load(path.clone()).await {
                Ok(collection) => collections.push(collection),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping malformed collection folder");
                }
            }
        }
        collections.sort_by(|a, b| a.description.name.cmp(&b.description.name));
        Ok(collections)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Collection>> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Ok(None);
        }
        let path = self.root.join(id);
        if !path.join(DESCRIPTION_FILE).is_file() {
            return Ok(None);
        }
        self.load(path).await.map(Some)
    }

    /// Names compare case-insensitively, ignoring surrounding whitespace.
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Collection>> {
        let name = name.trim();
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|c| c.description.name.eq_ignore_ascii_case(name)))
    }

    pub async fn require(&self, id: &str) -> Result<Collection> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| ReleaseError::NotFound(format!("collection {id}")))
    }

    /// Rebind `description` to its folder without reading it from disk.
    /// `None` when the folder no longer exists.
    pub(crate) fn reopen(&self, description: CollectionDescription) -> Option<Collection> {
        let path = self.root.join(&description.id);
        if !path.is_dir() {
            return None;
        }
        let lock = self.locks.handle(&description.id);
        Some(Collection::from_parts(path, description, lock))
    }

    /// Move every collection stuck `IN_PROGRESS` to `ERROR` so it can be
    /// resubmitted. Only valid before the approval worker takes jobs.
    pub async fn fail_interrupted_approvals(&self) -> Result<Vec<String>> {
        let mut failed = Vec::new();
        for mut collection in self.list().await? {
            if collection.description.approval_status != ApprovalStatus::InProgress {
                continue;
            }
            collection.description.approval_status = ApprovalStatus::Error;
            collection.description.add_event(
                EventType::ApprovalFailed,
                SYSTEM_ACTOR,
                Some("approval interrupted by a restart".to_string()),
            );
            collection.save().await?;
            tracing::warn!(
                collection_id = %collection.id(),
                name = %collection.description.name,
                "Interrupted approval marked as failed"
            );
            failed.push(collection.id().to_string());
        }
        Ok(failed)
    }

    pub async fn create_collection(&self, description: CollectionDescription) -> Result<Collection> {
        if description.name.trim().is_empty() {
            return Err(ReleaseError::BadRequest("collection name is required".to_string()));
        }
        if self.get_by_name(&description.name).await?.is_some() {
            return Err(ReleaseError::Conflict(format!(
                "a collection named {} already exists",
                description.name
            )));
        }

        let path = self.root.join(&description.id);
        if path.exists() {
            return Err(ReleaseError::Conflict(format!("collection {} already exists", description.id)));
        }
        for stage in Stage::ALL {
            tokio::fs::create_dir_all(path.join(stage.dir_name())).await?;
        }

        let lock = self.locks.handle(&description.id);
        let collection = Collection::from_parts(path, description, lock);
        collection.save().await?;

        tracing::info!(
            collection_id = %collection.id(),
            name = %collection.description.name,
            "Collection created"
        );
        Ok(collection)
    }

    /// Remove an empty collection's folder.
    pub async fn delete_collection(&self, collection: &Collection) -> Result<()> {
        if !collection.is_empty() {
            return Err(ReleaseError::Conflict(format!(
                "collection {} is not empty",
                collection.description.name
            )));
        }
        if !collection.description.pending_deletes.is_empty() {
            return Err(ReleaseError::Conflict(format!(
                "collection {} has pending deletes",
                collection.description.name
            )));
        }

        self.remove_folder(collection).await
    }

    pub(crate) async fn remove_folder(&self, collection: &Collection) -> Result<()> {
        tokio::fs::remove_dir_all(collection.path()).await?;
        self.locks.forget(collection.id());
        tracing::info!(collection_id = %collection.id(), "Collection folder deleted");
        Ok(())
    }

    /// Number of collections whose working sets hold `uri`.
    ///
    /// Advisory only: nothing stops another request acting between this check
    /// and a subsequent mutation.
    pub async fn is_being_edited(&self, uri: &str) -> Result<usize> {
        Ok(self
            .list()
            .await?
            .iter()
            .filter(|c| c.is_in_collection(uri))
            .count())
    }

    /// The first of `uris` held by a collection other than `except_id`.
    pub async fn first_edited_elsewhere(&self, uris: &[String], except_id: &str) -> Result<Option<String>> {
        let others: Vec<Collection> = self
            .list()
            .await?
            .into_iter()
            .filter(|c| c.id() != except_id)
            .collect();

        Ok(uris
            .iter()
            .find(|uri| others.iter().any(|c| c.description.is_in_collection(uri)))
            .cloned())
    }
}
