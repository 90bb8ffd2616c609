use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;

use super::description::{ApprovalStatus, CollectionDescription, EventType, PendingDelete, Stage};
use super::registry::CollectionRegistry;
use crate::collaborators::DataProcessor;
use crate::content_store::{is_below, normalize_uri, ContentStore};
use crate::crypto::CollectionKey;
use crate::error::{ReleaseError, Result};
use crate::permissions::PermissionService;

pub const DESCRIPTION_FILE: &str = "collection.json";

/// Everything a collection operation needs beyond the collection itself.
pub struct CollectionContext<'a> {
    pub email: &'a str,
    pub registry: &'a CollectionRegistry,
    pub store: &'a dyn ContentStore,
    pub permissions: &'a dyn PermissionService,
    /// Required for reading or writing content of an encrypted collection
    pub key: Option<&'a CollectionKey>,
}

/// One release's working tree on disk plus its description.
pub struct Collection {
    path: PathBuf,
    pub description: CollectionDescription,
    lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("path", &self.path)
            .field("id", &self.description.id)
            .field("name", &self.description.name)
            .finish()
    }
}

impl Collection {
    pub(crate) fn from_parts(path: PathBuf, description: CollectionDescription, lock: Arc<Mutex<()>>) -> Self {
        Self {
            path,
            description,
            lock,
        }
    }

    pub fn id(&self) -> &str {
        &self.description.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_in_collection(&self, uri: &str) -> bool {
        match normalize_uri(uri) {
            Ok(uri) => self.description.is_in_collection(&uri),
            Err(_) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.description.is_empty()
    }

    /// Persist the description: write a temp file, then rename over the old one.
    pub async fn save(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        let json = serde_json::to_vec_pretty(&self.description)?;
        let tmp = self.path.join(format!("{DESCRIPTION_FILE}.tmp"));
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, self.path.join(DESCRIPTION_FILE)).await?;
        tracing::debug!(collection_id = %self.description.id, "Collection saved");
        Ok(())
    }

    // ========================================================================
    // Editing
    // ========================================================================

    pub async fn create(&mut self, ctx: &CollectionContext<'_>, uri: &str, content: Bytes) -> Result<()> {
        self.check_writable(ctx)?;
        let uri = normalize_uri(uri)?;

        if self.description.is_in_collection(&uri) || self.clashes_with_item(&uri) {
            return Err(ReleaseError::Conflict(format!("{uri} is already in this collection")));
        }
        if ctx.store.exists(&uri).await? {
            return Err(ReleaseError::Conflict(format!("{uri} already exists")));
        }
        if let Some(uri) = ctx
            .registry
            .first_edited_elsewhere(std::slice::from_ref(&uri), &self.description.id)
            .await?
        {
            return Err(ReleaseError::Conflict(format!("{uri} is being edited in another collection")));
        }

        self.write_content(Stage::InProgress, &uri, &content, ctx.key).await?;
        self.description.in_progress.insert(uri.clone());
        self.description.add_event(EventType::Created, ctx.email, Some(uri));
        self.save().await
    }

    /// Bring `uri` (or, with `recursive`, the published subtree under it) into
    /// the in-progress stage. Without `content` the published version is copied.
    pub async fn edit(
        &mut self,
        ctx: &CollectionContext<'_>,
        uri: &str,
        recursive: bool,
        content: Option<Bytes>,
    ) -> Result<()> {
        self.check_writable(ctx)?;
        let uri = normalize_uri(uri)?;

        let targets = if recursive {
            if content.is_some() {
                return Err(ReleaseError::BadRequest(
                    "content cannot be supplied for a recursive edit".to_string(),
                ));
            }
            let mut targets = ctx.store.list(&uri).await?;
            for stage in Stage::ALL {
                targets.extend(self.description.items_below(stage, &uri));
            }
            if self.description.stage_of(&uri).is_some() {
                targets.push(uri.clone());
            }
            targets.sort();
            targets.dedup();
            if targets.is_empty() {
                return Err(ReleaseError::NotFound(uri));
            }
            targets
        } else {
            vec![uri.clone()]
        };

        // Every target is checked before anything is copied
        if let Some(conflict) = ctx
            .registry
            .first_edited_elsewhere(&targets, &self.description.id)
            .await?
        {
            return Err(ReleaseError::Conflict(format!(
                "{conflict} is being edited in another collection"
            )));
        }
        if targets
            .iter()
            .any(|t| self.description.stage_of(t).is_none() && self.clashes_with_item(t))
        {
            return Err(ReleaseError::Conflict(format!("{uri} overlaps an item in this collection")));
        }
        self.require_key(ctx.key)?;

        // Published copies are fetched before the working tree is touched
        let mut published = HashMap::new();
        if content.is_none() {
            for target in targets.iter().filter(|t| self.description.stage_of(t).is_none()) {
                if !ctx.store.exists(target).await? {
                    return Err(ReleaseError::NotFound(target.clone()));
                }
                published.insert(target.clone(), ctx.store.get(target).await?);
            }
        }

        let before = self.description.clone();
        let mut staged: Vec<(&String, Option<Stage>)> = Vec::with_capacity(targets.len());
        for target in &targets {
            let origin = self.description.stage_of(target);
            staged.push((target, origin));
            let data = content.as_ref().or_else(|| published.get(target));
            if let Err(e) = self.stage_for_edit(target, origin, data, ctx.key).await {
                self.undo_edit(&staged).await;
                self.description = before;
                return Err(e);
            }
        }

        self.description.add_event(EventType::Edited, ctx.email, Some(uri));
        self.save().await
    }

    /// Bring one item into in-progress, writing `data` over it when given.
    async fn stage_for_edit(
        &mut self,
        target: &str,
        origin: Option<Stage>,
        data: Option<&Bytes>,
        key: Option<&CollectionKey>,
    ) -> Result<()> {
        if let Some(stage) = origin.filter(|s| *s != Stage::InProgress) {
            self.relocate(stage, target, Stage::InProgress, target).await?;
            self.description.set_mut(stage).remove(target);
            self.description.in_progress.insert(target.to_string());
        }
        if let Some(data) = data {
            self.write_content(Stage::InProgress, target, data, key).await?;
            self.description.in_progress.insert(target.to_string());
        }
        Ok(())
    }

    /// Put the files of a failed edit back where they were.
    async fn undo_edit(&self, staged: &[(&String, Option<Stage>)]) {
        for (target, origin) in staged.iter().rev() {
            let undone = match origin {
                None => self.remove_content(Stage::InProgress, target).await,
                Some(Stage::InProgress) => Ok(()),
                Some(stage) => self.relocate(Stage::InProgress, target, *stage, target).await,
            };
            if let Err(e) = undone {
                tracing::warn!(
                    collection_id = %self.description.id,
                    uri = %target,
                    error = %e,
                    "Failed edit not fully undone"
                );
            }
        }
    }

    pub async fn complete(&mut self, ctx: &CollectionContext<'_>, uri: &str, recursive: bool) -> Result<()> {
        self.advance(ctx, uri, recursive, Stage::InProgress, Stage::Complete, EventType::Completed)
            .await
    }

    pub async fn review(&mut self, ctx: &CollectionContext<'_>, uri: &str, recursive: bool) -> Result<()> {
        self.advance(ctx, uri, recursive, Stage::Complete, Stage::Reviewed, EventType::Reviewed)
            .await
    }

    async fn advance(
        &mut self,
        ctx: &CollectionContext<'_>,
        uri: &str,
        recursive: bool,
        from: Stage,
        to: Stage,
        event: EventType,
    ) -> Result<()> {
        self.check_writable(ctx)?;
        let uri = normalize_uri(uri)?;

        let items = if self.description.set(from).contains(&uri) {
            vec![uri.clone()]
        } else {
            let below = self.description.items_below(from, &uri);
            if below.is_empty() {
                return Err(ReleaseError::NotFound(format!(
                    "{uri} is not in the {} stage",
                    from.dir_name()
                )));
            }
            if !recursive {
                return Err(ReleaseError::BadRequest(format!("{uri} is a directory")));
            }
            below
        };

        for item in &items {
            self.relocate(from, item, to, item).await?;
            self.description.set_mut(from).remove(item);
            self.description.set_mut(to).insert(item.clone());
        }

        tracing::debug!(
            collection_id = %self.description.id,
            uri = %uri,
            items = items.len(),
            stage = to.dir_name(),
            "Content advanced"
        );
        self.description.add_event(event, ctx.email, Some(uri));
        self.save().await
    }

    // ========================================================================
    // Moving
    // ========================================================================

    /// Relocate a single item within its stage.
    pub async fn move_content(&mut self, ctx: &CollectionContext<'_>, from: &str, to: &str) -> Result<()> {
        self.check_writable(ctx)?;
        let from = normalize_uri(from)?;
        let to = normalize_uri(to)?;

        let stage = self
            .description
            .stage_of(&from)
            .ok_or_else(|| ReleaseError::NotFound(from.clone()))?;
        self.check_destinations(ctx, std::slice::from_ref(&to)).await?;

        self.relocate(stage, &from, stage, &to).await?;
        self.description.set_mut(stage).remove(&from);
        self.description.set_mut(stage).insert(to.clone());

        self.description
            .add_event(EventType::Moved, ctx.email, Some(format!("{from} -> {to}")));
        self.save().await
    }

    /// Relocate an item or a whole directory; every item keeps its stage.
    pub async fn rename_content(&mut self, ctx: &CollectionContext<'_>, from: &str, to: &str) -> Result<()> {
        self.check_writable(ctx)?;
        let from = normalize_uri(from)?;
        let to = normalize_uri(to)?;

        if self.description.stage_of(&from).is_some() {
            return self.move_content(ctx, &from, &to).await;
        }
        if is_below(&to, &from) {
            return Err(ReleaseError::BadRequest(format!("cannot move {from} below itself")));
        }

        let mut moves: Vec<(Stage, String, String)> = Vec::new();
        for stage in Stage::ALL {
            for item in self.description.items_below(stage, &from) {
                let dest = format!("{to}{}", &item[from.len()..]);
                moves.push((stage, item, dest));
            }
        }
        if moves.is_empty() {
            return Err(ReleaseError::NotFound(from));
        }

        let destinations: Vec<String> = moves.iter().map(|(_, _, dest)| dest.clone()).collect();
        self.check_destinations(ctx, &destinations).await?;

        for (stage, item, dest) in &moves {
            self.relocate(*stage, item, *stage, dest).await?;
            self.description.set_mut(*stage).remove(item);
            self.description.set_mut(*stage).insert(dest.clone());
        }

        self.description
            .add_event(EventType::Moved, ctx.email, Some(format!("{from} -> {to}")));
        self.save().await
    }

    async fn check_destinations(&self, ctx: &CollectionContext<'_>, destinations: &[String]) -> Result<()> {
        for dest in destinations {
            if self.description.is_in_collection(dest) || self.clashes_with_item(dest) {
                return Err(ReleaseError::Conflict(format!("{dest} is already in this collection")));
            }
            if ctx.store.exists(dest).await? {
                return Err(ReleaseError::Conflict(format!("{dest} already exists")));
            }
        }
        if let Some(dest) = ctx
            .registry
            .first_edited_elsewhere(destinations, &self.description.id)
            .await?
        {
            return Err(ReleaseError::Conflict(format!("{dest} is being edited in another collection")));
        }
        Ok(())
    }

    // ========================================================================
    // Deleting
    // ========================================================================

    /// Drop an item from whichever stage holds it.
    pub async fn delete(&mut self, ctx: &CollectionContext<'_>, uri: &str) -> Result<()> {
        self.check_writable(ctx)?;
        let uri = normalize_uri(uri)?;

        let stage = self
            .description
            .stage_of(&uri)
            .ok_or_else(|| ReleaseError::NotFound(uri.clone()))?;
        self.remove_content(stage, &uri).await?;
        self.description.set_mut(stage).remove(&uri);

        self.description.add_event(EventType::Deleted, ctx.email, Some(uri));
        self.save().await
    }

    /// Drop an item, or every item under a directory, across all stages.
    /// Used for data-visualisation bundles, which are edited as a unit.
    pub async fn delete_tree(&mut self, ctx: &CollectionContext<'_>, uri: &str) -> Result<()> {
        self.check_writable(ctx)?;
        let uri = normalize_uri(uri)?;

        let mut removed = 0;
        for stage in Stage::ALL {
            let mut items = self.description.items_below(stage, &uri);
            if self.description.set(stage).contains(&uri) {
                items.push(uri.clone());
            }
            for item in items {
                self.remove_content(stage, &item).await?;
                self.description.set_mut(stage).remove(&item);
                removed += 1;
            }
        }
        if removed == 0 {
            return Err(ReleaseError::NotFound(uri));
        }

        self.description.add_event(EventType::Deleted, ctx.email, Some(uri));
        self.save().await
    }

    /// Schedule published content (an item or a subtree) for removal on publish.
    pub async fn mark_for_deletion(&mut self, ctx: &CollectionContext<'_>, uri: &str) -> Result<()> {
        self.check_writable(ctx)?;
        let uri = normalize_uri(uri)?;

        let uris = ctx.store.list(&uri).await?;
        if uris.is_empty() {
            return Err(ReleaseError::NotFound(format!("{uri} is not published")));
        }
        if let Some(item) = uris.iter().find(|u| self.description.is_in_collection(u)) {
            return Err(ReleaseError::Conflict(format!("{item} is being edited in this collection")));
        }
        if let Some(item) = ctx
            .registry
            .first_edited_elsewhere(&uris, &self.description.id)
            .await?
        {
            return Err(ReleaseError::Conflict(format!("{item} is being edited in another collection")));
        }

        self.description.pending_deletes.retain(|pending| pending.uri != uri);
        self.description.pending_deletes.push(PendingDelete {
            uri: uri.clone(),
            requested_by: ctx.email.to_string(),
            uris,
        });
        self.description
            .add_event(EventType::MarkedForDeletion, ctx.email, Some(uri));
        self.save().await
    }

    pub async fn cancel_deletion(&mut self, ctx: &CollectionContext<'_>, uri: &str) -> Result<()> {
        self.check_writable(ctx)?;
        let uri = normalize_uri(uri)?;

        let before = self.description.pending_deletes.len();
        self.description.pending_deletes.retain(|pending| pending.uri != uri);
        if self.description.pending_deletes.len() == before {
            return Err(ReleaseError::NotFound(format!("no pending deletion for {uri}")));
        }

        self.description
            .add_event(EventType::DeletionCancelled, ctx.email, Some(uri));
        self.save().await
    }

    // ========================================================================
    // Approval state
    // ========================================================================

    /// Return an approved collection to editing, discarding approval artifacts.
    /// Any other status is left alone.
    pub async fn unlock(&mut self, ctx: &CollectionContext<'_>, processor: &dyn DataProcessor) -> Result<bool> {
        if !ctx.permissions.can_edit(ctx.email) {
            return Err(ReleaseError::Unauthorized(format!(
                "{} cannot unlock collections",
                ctx.email
            )));
        }
        if self.description.approval_status != ApprovalStatus::Complete {
            return Ok(true);
        }

        self.discard_approval_artifacts().await?;
        processor.clean(&self.description).await?;

        self.description.approval_status = ApprovalStatus::NotStarted;
        self.description.add_event(EventType::Unlocked, ctx.email, None);
        self.save().await?;

        tracing::info!(collection_id = %self.description.id, email = ctx.email, "Collection unlocked");
        Ok(true)
    }

    // ========================================================================
    // Content files
    // ========================================================================

    pub fn reader<'a>(&'a self, key: Option<&'a CollectionKey>) -> Result<ContentReader<'a>> {
        let key = self.require_key(key)?;
        Ok(ContentReader {
            collection: self,
            key,
        })
    }

    pub(crate) fn stage_root(&self, stage: Stage) -> PathBuf {
        self.path.join(stage.dir_name())
    }

    fn file_path(&self, stage: Stage, uri: &str) -> PathBuf {
        self.stage_root(stage).join(uri.trim_start_matches('/'))
    }

    pub(crate) fn require_key<'k>(&self, key: Option<&'k CollectionKey>) -> Result<Option<&'k CollectionKey>> {
        if !self.description.encrypted {
            return Ok(None);
        }
        key.map(Some).ok_or_else(|| {
            ReleaseError::Unauthorized(format!(
                "key for collection {} is not available",
                self.description.id
            ))
        })
    }

    /// Read a stage file, decrypting it when the collection is encrypted.
    pub async fn read_content(&self, stage: Stage, uri: &str, key: Option<&CollectionKey>) -> Result<Bytes> {
        let key = self.require_key(key)?;
        let raw = self.read_raw(stage, uri).await?;
        match key {
            Some(key) => Ok(Bytes::from(key.decrypt(&raw)?)),
            None => Ok(raw),
        }
    }

    pub(crate) async fn write_content(
        &self,
        stage: Stage,
        uri: &str,
        data: &[u8],
        key: Option<&CollectionKey>,
    ) -> Result<()> {
        match self.require_key(key)? {
            Some(key) => self.write_raw(stage, uri, &key.encrypt(data)?).await,
            None => self.write_raw(stage, uri, data).await,
        }
    }

    /// Stage file bytes as stored (ciphertext for encrypted collections).
    pub(crate) async fn read_raw(&self, stage: Stage, uri: &str) -> Result<Bytes> {
        let path = self.file_path(stage, uri);
        if !path.is_file() {
            return Err(ReleaseError::NotFound(uri.to_string()));
        }
        Ok(Bytes::from(tokio::fs::read(&path).await?))
    }

    pub(crate) async fn write_raw(&self, stage: Stage, uri: &str, data: &[u8]) -> Result<()> {
        let path = self.file_path(stage, uri);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn relocate(&self, from_stage: Stage, from: &str, to_stage: Stage, to: &str) -> Result<()> {
        let source = self.file_path(from_stage, from);
        let dest = self.file_path(to_stage, to);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&source, &dest).await?;
        self.prune_empty_parents(from_stage, from).await;
        Ok(())
    }

    pub(crate) async fn remove_content(&self, stage: Stage, uri: &str) -> Result<()> {
        match tokio::fs::remove_file(self.file_path(stage, uri)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.prune_empty_parents(stage, uri).await;
        Ok(())
    }

    /// Remove directories left empty by a move or delete, up to the stage root.
    async fn prune_empty_parents(&self, stage: Stage, uri: &str) {
        let root = self.stage_root(stage);
        let mut dir = self.file_path(stage, uri).parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == root || !current.starts_with(&root) {
                break;
            }
            if tokio::fs::remove_dir(&current).await.is_err() {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }
    }

    fn check_writable(&self, ctx: &CollectionContext<'_>) -> Result<()> {
        if !ctx.permissions.can_edit(ctx.email) {
            return Err(ReleaseError::Unauthorized(format!(
                "{} cannot edit collections",
                ctx.email
            )));
        }
        if self.description.is_locked() {
            return Err(ReleaseError::Conflict(format!(
                "collection {} is {:?}; unlock it first",
                self.description.name, self.description.approval_status
            )));
        }
        Ok(())
    }

    /// True when `uri` would shadow an existing item as a file or a directory.
    fn clashes_with_item(&self, uri: &str) -> bool {
        Stage::ALL.into_iter().any(|stage| {
            self.description
                .set(stage)
                .iter()
                .any(|item| is_below(item, uri) || is_below(uri, item))
        })
    }
}

/// Read access to a collection's reviewed content, decrypted.
pub struct ContentReader<'a> {
    collection: &'a Collection,
    key: Option<&'a CollectionKey>,
}

impl ContentReader<'_> {
    pub fn description(&self) -> &CollectionDescription {
        &self.collection.description
    }

    pub fn uris(&self) -> impl Iterator<Item = &String> {
        self.collection.description.reviewed.iter()
    }

    pub async fn read(&self, uri: &str) -> Result<Bytes> {
        let uri = normalize_uri(uri)?;
        self.collection.read_content(Stage::Reviewed, &uri, self.key).await
    }
}
