//! Files the approval pipeline adds to the reviewed stage, and their removal.

use std::collections::BTreeSet;

use bytes::Bytes;

use super::collection::Collection;
use super::description::{ArchiveRecord, Stage};
use crate::archive::{self, ArchiveEntry};
use crate::content_store::normalize_uri;
use crate::crypto::CollectionKey;
use crate::error::{ReleaseError, Result};

pub const ARCHIVE_SUFFIX: &str = "-to-publish.zip";

impl Collection {
    /// Write approval output into the reviewed stage and remember it as generated.
    pub(crate) async fn add_generated(&mut self, uri: &str, data: &[u8], key: Option<&CollectionKey>) -> Result<()> {
        let uri = normalize_uri(uri)?;
        if self.description.is_in_collection(&uri) && !self.description.generated.contains(&uri) {
            return Err(ReleaseError::Conflict(format!(
                "generated content would overwrite {uri}"
            )));
        }

        self.write_content(Stage::Reviewed, &uri, data, key).await?;
        self.description.reviewed.insert(uri.clone());
        self.description.generated.insert(uri);
        Ok(())
    }

    /// Outermost reviewed directories whose name is one of `names`.
    pub fn archive_roots(&self, names: &[String]) -> Vec<String> {
        let mut roots = BTreeSet::new();
        for uri in &self.description.reviewed {
            if uri.ends_with(ARCHIVE_SUFFIX) {
                continue;
            }
            let segments: Vec<&str> = uri.trim_start_matches('/').split('/').collect();
            // The last segment is the item itself, never a directory
            let dirs = &segments[..segments.len().saturating_sub(1)];
            if let Some(pos) = dirs.iter().position(|s| names.iter().any(|n| n == s)) {
                roots.insert(format!("/{}", dirs[..=pos].join("/")));
            }
        }
        roots.into_iter().collect()
    }

    /// Replace the reviewed items under `root` by a verified zip of them.
    ///
    /// Returns `Ok(false)` when the archive does not verify; the loose files are
    /// then kept.
    pub(crate) async fn archive_subtree(&mut self, root: &str) -> Result<bool> {
        let items = self.description.items_below(Stage::Reviewed, root);
        if items.is_empty() {
            return Ok(true);
        }

        let archive_uri = format!("{root}{ARCHIVE_SUFFIX}");
        if self.description.is_in_collection(&archive_uri) {
            return Err(ReleaseError::Conflict(format!("{archive_uri} is already in this collection")));
        }

        let mut entries = Vec::with_capacity(items.len());
        for item in &items {
            entries.push(ArchiveEntry {
                name: item[root.len() + 1..].to_string(),
                data: self.read_raw(Stage::Reviewed, item).await?,
            });
        }

        let (zip, verified) = tokio::task::spawn_blocking(move || {
            let zip = archive::build(&entries)?;
            let verified = archive::verify(&zip, &entries)?;
            Ok::<_, zip::result::ZipError>((zip, verified))
        })
        .await??;
        if !verified {
            return Ok(false);
        }

        self.write_raw(Stage::Reviewed, &archive_uri, &zip).await?;
        for item in &items {
            self.remove_content(Stage::Reviewed, item).await?;
            self.description.reviewed.remove(item);
        }
        self.description.reviewed.insert(archive_uri.clone());
        self.description.archives.push(ArchiveRecord {
            uri: archive_uri,
            root: root.to_string(),
            entries: items,
        });

        tracing::info!(
            collection_id = %self.description.id,
            root,
            entries = self.description.archives.last().map_or(0, |a| a.entries.len()),
            "Reviewed subtree archived"
        );
        Ok(true)
    }

    /// Undo approval: expand archives back into loose files, then remove
    /// everything approval generated.
    pub(crate) async fn discard_approval_artifacts(&mut self) -> Result<()> {
        for record in std::mem::take(&mut self.description.archives) {
            for (uri, data) in self.expand_archive(&record).await? {
                self.write_raw(Stage::Reviewed, &uri, &data).await?;
                self.description.reviewed.insert(uri);
            }
            self.remove_content(Stage::Reviewed, &record.uri).await?;
            self.description.reviewed.remove(&record.uri);
        }

        for uri in std::mem::take(&mut self.description.generated) {
            self.remove_content(Stage::Reviewed, &uri).await?;
            self.description.reviewed.remove(&uri);
        }

        tracing::debug!(collection_id = %self.description.id, "Approval artifacts discarded");
        Ok(())
    }

    async fn expand_archive(&self, record: &ArchiveRecord) -> Result<Vec<(String, Bytes)>> {
        let data = self.read_raw(Stage::Reviewed, &record.uri).await?;
        let entries = tokio::task::spawn_blocking(move || archive::extract(&data)).await??;
        Ok(entries
            .into_iter()
            .map(|entry| (format!("{}/{}", record.root, entry.name), entry.data))
            .collect())
    }

    /// Every file publish writes, archives expanded, as stored on disk.
    pub(crate) async fn files_to_publish(&self) -> Result<Vec<(String, Bytes)>> {
        let mut files = Vec::new();
        for uri in &self.description.reviewed {
            match self.description.archives.iter().find(|a| &a.uri == uri) {
                Some(record) => files.extend(self.expand_archive(record).await?),
                None => files.push((uri.clone(), self.read_raw(Stage::Reviewed, uri).await?)),
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }
}
