use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::ApprovalJob;
use crate::collaborators::{Alerter, CollaboratorError, DataProcessor, Renderer};
use crate::collections::{
    ApprovalStatus, Collection, CollectionRegistry, CollectionType, EventType, Stage,
};
use crate::crypto::CollectionKey;
use crate::error::{ReleaseError, Result};
use crate::notifications::{NotificationKind, Notifier, PublishNotification};
use crate::scheduler::SchedulerKeyCache;

/// Page types that get a rendered PDF at approval.
pub const RENDERABLE_TYPES: &[&str] = &["article", "bulletin", "compendium_chapter"];

const PAGE_DATA: &str = "/data.json";

/// The work done for one approval job.
pub struct ApprovalTask {
    pub registry: Arc<CollectionRegistry>,
    pub processor: Arc<dyn DataProcessor>,
    pub renderer: Option<Arc<dyn Renderer>>,
    pub notifier: Arc<Notifier>,
    pub alerter: Arc<dyn Alerter>,
    pub scheduler_keys: Arc<SchedulerKeyCache>,
    /// Directory names whose reviewed subtrees are zipped
    pub archive_dirs: Vec<String>,
    pub step_timeout: Duration,
}

impl ApprovalTask {
    pub(crate) async fn run(&self, job: &ApprovalJob) -> bool {
        let mut collection = match self.registry.require(&job.collection_id).await {
            Ok(collection) => collection,
            Err(e) => {
                tracing::error!(collection_id = %job.collection_id, error = %e, "Approval job for unreadable collection");
                match self.registry.reopen(job.submitted.clone()) {
                    Some(mut collection) => self.fail(&mut collection, job, &e).await,
                    None => {
                        tracing::warn!(collection_id = %job.collection_id, "Collection folder gone; nothing to mark");
                    }
                }
                return false;
            }
        };

        let started = std::time::Instant::now();
        match self.approve(&mut collection, job).await {
            Ok(()) => {
                tracing::info!(
                    collection_id = %collection.id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Collection approved"
                );
                true
            }
            Err(e) => {
                self.fail(&mut collection, job, &e).await;
                false
            }
        }
    }

    async fn approve(&self, collection: &mut Collection, job: &ApprovalJob) -> Result<()> {
        let key = job.key.as_ref();

        if let Err(e) = self.populate_release_page(collection, key).await {
            tracing::warn!(collection_id = %collection.id(), error = %e, "Release page not populated");
        }

        let generated = {
            let reader = collection.reader(key)?;
            self.bounded(self.processor.generate(&collection.description, &reader))
                .await?
        };
        for content in generated {
            collection.add_generated(&content.uri, &content.data, key).await?;
        }

        self.render_pages(collection, job, key).await?;

        let notification = PublishNotification::new(
            NotificationKind::Approved,
            &collection.description,
            collection.description.uris_to_publish(),
            collection.description.uris_to_delete(),
        );

        for root in collection.archive_roots(&self.archive_dirs) {
            if !collection.archive_subtree(&root).await? {
                tracing::warn!(collection_id = %collection.id(), root = %root, "Archive failed verification");
                self.alerter.alert(
                    &collection.description,
                    &format!("archive of {root} failed verification; loose files kept"),
                );
            }
        }

        collection.description.approval_status = ApprovalStatus::Complete;
        collection
            .description
            .add_event(EventType::Approved, &job.session.email, None);
        collection.save().await?;

        if collection.description.collection_type == CollectionType::Scheduled {
            if let Some(key) = &job.key {
                self.scheduler_keys.insert(collection.id(), key.clone());
            }
        }

        self.notifier.notify(&notification).await;
        Ok(())
    }

    async fn fail(&self, collection: &mut Collection, job: &ApprovalJob, error: &ReleaseError) {
        tracing::error!(collection_id = %collection.id(), error = %error, "Approval failed");

        if let Err(e) = collection.discard_approval_artifacts().await {
            tracing::warn!(collection_id = %collection.id(), error = %e, "Approval artifacts not discarded");
        }
        if let Err(e) = self.bounded(self.processor.clean(&collection.description)).await {
            tracing::warn!(collection_id = %collection.id(), error = %e, "Processor clean failed");
        }

        collection.description.approval_status = ApprovalStatus::Error;
        collection.description.add_event(
            EventType::ApprovalFailed,
            &job.session.email,
            Some(error.to_string()),
        );
        if let Err(e) = collection.save().await {
            tracing::error!(collection_id = %collection.id(), error = %e, "Failed approval state not saved");
        }

        self.alerter
            .alert(&collection.description, &format!("approval failed: {error}"));
    }

    /// Bound a collaborator call by the step timeout.
    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, CollaboratorError>>,
    {
        match tokio::time::timeout(self.step_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CollaboratorError::Timeout(self.step_timeout).into()),
        }
    }

    /// List the reviewed pages on the linked release page as `relatedDocuments`.
    async fn populate_release_page(&self, collection: &mut Collection, key: Option<&CollectionKey>) -> Result<()> {
        let Some(release_uri) = collection.description.release_uri.clone() else {
            return Ok(());
        };
        let data_uri = format!("{release_uri}{PAGE_DATA}");
        if !collection.description.reviewed.contains(&data_uri) {
            return Ok(());
        }

        let data = collection.read_content(Stage::Reviewed, &data_uri, key).await?;
        let mut page: serde_json::Value = serde_json::from_slice(&data)?;
        let related: Vec<String> = collection
            .description
            .reviewed
            .iter()
            .filter(|uri| **uri != data_uri)
            .filter_map(|uri| uri.strip_suffix(PAGE_DATA))
            .map(str::to_string)
            .collect();

        let object = page
            .as_object_mut()
            .ok_or_else(|| ReleaseError::BadRequest(format!("{data_uri} is not a JSON object")))?;
        object.insert("relatedDocuments".to_string(), serde_json::json!(related));

        let updated = serde_json::to_vec_pretty(&page)?;
        collection
            .write_content(Stage::Reviewed, &data_uri, &updated, key)
            .await?;
        tracing::debug!(collection_id = %collection.id(), release = %release_uri, pages = related.len(), "Release page populated");
        Ok(())
    }

    /// Render reviewed pages of renderable types. A page that fails is logged
    /// and skipped.
    async fn render_pages(&self, collection: &mut Collection, job: &ApprovalJob, key: Option<&CollectionKey>) -> Result<()> {
        let Some(renderer) = &self.renderer else {
            return Ok(());
        };

        let pages: Vec<String> = collection
            .description
            .reviewed
            .iter()
            .filter(|uri| !collection.description.generated.contains(*uri))
            .filter_map(|uri| uri.strip_suffix(PAGE_DATA))
            .map(str::to_string)
            .collect();

        for page in pages {
            let data = collection
                .read_content(Stage::Reviewed, &format!("{page}{PAGE_DATA}"), key)
                .await?;
            let page_type = serde_json::from_slice::<serde_json::Value>(&data)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string));
            if !page_type.is_some_and(|t| RENDERABLE_TYPES.contains(&t.as_str())) {
                continue;
            }

            let rendered = match self.bounded(renderer.render(&page, &job.session)).await {
                Ok(rendered) => rendered,
                Err(e) => {
                    tracing::warn!(collection_id = %collection.id(), page = %page, error = %e, "Render failed");
                    continue;
                }
            };
            let pdf_uri = format!("{page}/page.pdf");
            if let Err(e) = collection.add_generated(&pdf_uri, &rendered, key).await {
                tracing::warn!(collection_id = %collection.id(), uri = %pdf_uri, error = %e, "Rendered page not stored");
            }
        }
        Ok(())
    }
}
