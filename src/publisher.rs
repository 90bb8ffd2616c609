use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::collaborators::Alerter;
use crate::collections::{ApprovalStatus, Collection, CollectionRegistry};
use crate::content_store::ContentStore;
use crate::crypto::{sha256, CollectionKey};
use crate::error::{ReleaseError, Result};
use crate::keys::{KeyManager, KeyringCache};
use crate::notifications::{NotificationKind, Notifier, PublishNotification};
use crate::permissions::PermissionService;
use crate::scheduler::SchedulerKeyCache;
use crate::sessions::Session;

/// Moves approved collections into the content store, one at a time.
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn ContentStore>,
    registry: Arc<CollectionRegistry>,
    permissions: Arc<dyn PermissionService>,
    keyrings: Arc<KeyringCache>,
    keys: Arc<KeyManager>,
    scheduler_keys: Arc<SchedulerKeyCache>,
    notifier: Arc<Notifier>,
    alerter: Arc<dyn Alerter>,
    publish_lock: Arc<Mutex<()>>,
}

impl Publisher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ContentStore>,
        registry: Arc<CollectionRegistry>,
        permissions: Arc<dyn PermissionService>,
        keyrings: Arc<KeyringCache>,
        keys: Arc<KeyManager>,
        scheduler_keys: Arc<SchedulerKeyCache>,
        notifier: Arc<Notifier>,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        Self {
            store,
            registry,
            permissions,
            keyrings,
            keys,
            scheduler_keys,
            notifier,
            alerter,
            publish_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Publish an approved collection.
    ///
    /// `Ok(false)` means the transfer failed part-way: files already written
    /// stay in the store and the collection stays approved, so publish can be
    /// retried. With `break_before_transfer` nothing is moved.
    pub async fn publish(
        &self,
        collection: &Collection,
        session: &Session,
        break_before_transfer: bool,
        skip_verification: bool,
    ) -> Result<bool> {
        if !self.permissions.can_edit(&session.email) {
            return Err(ReleaseError::Unauthorized(format!(
                "{} cannot publish collections",
                session.email
            )));
        }
        check_approved(collection)?;
        if break_before_transfer {
            return Ok(true);
        }

        let key = match collection.description.encrypted {
            true => Some(self.keyrings.get_key(&session.id, collection.id()).ok_or_else(|| {
                ReleaseError::Unauthorized(format!(
                    "{} does not hold the key for collection {}",
                    session.email, collection.id()
                ))
            })?),
            false => None,
        };

        self.publish_with_key(collection.id(), &session.email, key, skip_verification)
            .await
    }

    /// Publish by id with an already resolved key. Used by the scheduler.
    pub async fn publish_with_key(
        &self,
        collection_id: &str,
        email: &str,
        key: Option<CollectionKey>,
        skip_verification: bool,
    ) -> Result<bool> {
        let guard = Arc::clone(&self.publish_lock).lock_owned().await;

        // Re-read under the lock: a concurrent publish may have consumed it
        let collection = self.registry.require(collection_id).await?;
        check_approved(&collection)?;
        if collection.description.encrypted && key.is_none() {
            return Err(ReleaseError::Unauthorized(format!(
                "key for collection {collection_id} is not available"
            )));
        }

        // Once the transfer starts it runs to completion even if the caller goes away
        let this = self.clone();
        let email = email.to_string();
        let transfer = tokio::spawn(async move {
            let _guard = guard;
            this.transfer(collection, &email, key, skip_verification).await
        });
        transfer.await?
    }

    async fn transfer(
        &self,
        collection: Collection,
        email: &str,
        key: Option<CollectionKey>,
        skip_verification: bool,
    ) -> Result<bool> {
        let id = collection.id().to_string();
        let started = std::time::Instant::now();

        let written = match self.copy_content(&collection, key.as_ref()).await {
            Ok(written) => written,
            Err(e) => {
                tracing::error!(collection_id = %id, error = %e, "Publish transfer failed");
                self.alerter
                    .alert(&collection.description, &format!("publish failed part-way: {e}"));
                return Ok(false);
            }
        };

        let notification = PublishNotification::new(
            NotificationKind::Published,
            &collection.description,
            written.iter().map(|(uri, _)| uri.clone()).collect(),
            collection.description.uris_to_delete(),
        );

        if let Err(e) = self.registry.remove_folder(&collection).await {
            tracing::error!(collection_id = %id, error = %e, "Published collection not cleaned up");
            self.alerter
                .alert(&collection.description, &format!("cleanup after publish failed: {e}"));
        }
        if let Err(e) = self.keys.revoke_collection_key(&id) {
            tracing::warn!(collection_id = %id, error = %e, "Collection key not revoked");
        }
        self.scheduler_keys.remove(&id);

        tracing::info!(
            collection_id = %id,
            email,
            files = written.len(),
            deletes = notification.uris_to_delete().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collection published"
        );
        self.notifier.notify(&notification).await;

        if !skip_verification {
            self.verify(&collection, &written).await;
        }
        Ok(true)
    }

    /// Apply pending deletes, then write every reviewed file to the store.
    /// Returns each written URI with the digest of what was written.
    async fn copy_content(
        &self,
        collection: &Collection,
        key: Option<&CollectionKey>,
    ) -> Result<Vec<(String, [u8; 32])>> {
        let files = collection.files_to_publish().await?;
        let mut written = Vec::with_capacity(files.len());

        for uri in collection.description.uris_to_delete() {
            self.store.delete(&uri).await?;
        }

        for (uri, raw) in files {
            let data = match key {
                Some(key) => Bytes::from(key.decrypt(&raw)?),
                None => raw,
            };
            let digest = sha256(&data);
            self.store.put(&uri, data).await?;
            written.push((uri, digest));
        }
        Ok(written)
    }

    /// Compare what the store holds with what was written. Mismatches alert only.
    async fn verify(&self, collection: &Collection, written: &[(String, [u8; 32])]) {
        let mut mismatched = Vec::new();
        for (uri, expected) in written {
            match self.store.get(uri).await {
                Ok(data) if sha256(&data) == *expected => {}
                Ok(_) => mismatched.push(uri.clone()),
                Err(e) => {
                    tracing::warn!(uri = %uri, error = %e, "Published file unreadable");
                    mismatched.push(uri.clone());
                }
            }
        }

        if mismatched.is_empty() {
            tracing::debug!(collection_id = %collection.id(), files = written.len(), "Publish verified");
            return;
        }
        self.alerter.alert(
            &collection.description,
            &format!(
                "post-publish verification failed for {} file(s): {}",
                mismatched.len(),
                mismatched.join(", ")
            ),
        );
    }
}

fn check_approved(collection: &Collection) -> Result<()> {
    if collection.description.approval_status != ApprovalStatus::Complete {
        return Err(ReleaseError::Conflict(format!(
            "collection {} is not approved",
            collection.description.name
        )));
    }
    Ok(())
}
