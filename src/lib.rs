//! content-release - staging, approval and publication of editorial content
//!
//! Editors collect changes to the public content tree in named collections,
//! move each item through in-progress, complete and reviewed, submit the
//! collection for approval and finally publish it:
//! - Filesystem-backed content store and collection working trees
//! - Cross-collection edit lock on content URIs
//! - Single-worker approval queue with pluggable collaborators
//! - Per-collection AES-256-GCM keys distributed to user and session keyrings
//! - redb embedded database for users, keyrings and permissions

pub mod api;
pub mod approval;
pub mod archive;
pub mod collaborators;
pub mod collections;
pub mod config;
pub mod content_store;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod locks;
pub mod notifications;
pub mod permissions;
pub mod publisher;
pub mod scheduler;
pub mod sessions;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use approval::{ApprovalQueue, ApprovalTask};
use collaborators::{Alerter, DataProcessor, LogAlerter, NoopProcessor, Renderer};
use collections::{Collection, CollectionContext, CollectionDescription, CollectionRegistry};
use config::{AdminConfig, Config};
use content_store::ContentStore;
use crypto::CollectionKey;
use error::{ReleaseError, Result};
use keys::{KeyManager, KeyringCache};
use notifications::{NotificationSink, Notifier};
use permissions::PermissionService;
use publisher::Publisher;
use scheduler::{Scheduler, SchedulerKeyCache};
use sessions::{Session, Sessions};
use storage::models::{PermissionRecord, UserRecord};
use storage::Database;

/// External systems the release pipeline calls out to.
pub struct Collaborators {
    pub processor: Arc<dyn DataProcessor>,
    pub renderer: Option<Arc<dyn Renderer>>,
    pub sinks: Vec<Arc<dyn NotificationSink>>,
    pub alerter: Arc<dyn Alerter>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            processor: Arc::new(NoopProcessor),
            renderer: None,
            sinks: Vec::new(),
            alerter: Arc::new(LogAlerter),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub content: Arc<dyn ContentStore>,
    pub collections: Arc<CollectionRegistry>,
    pub sessions: Arc<Sessions>,
    pub keyrings: Arc<KeyringCache>,
    pub keys: Arc<KeyManager>,
    pub permissions: Arc<dyn PermissionService>,
    pub processor: Arc<dyn DataProcessor>,
    pub approvals: ApprovalQueue,
    pub publisher: Publisher,
    pub scheduler_keys: Arc<SchedulerKeyCache>,
}

impl AppState {
    /// Wire every component and start the approval worker. Must run inside a
    /// tokio runtime.
    pub fn build(
        config: Config,
        content: Arc<dyn ContentStore>,
        collaborators: Collaborators,
    ) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let db = Database::open(&config.storage.data_dir)?;
        let collections = Arc::new(CollectionRegistry::new(&config.storage.collections_path)?);
        let sessions = Arc::new(Sessions::new(chrono::Duration::minutes(
            config.session_timeout_minutes,
        )));
        let keyrings = Arc::new(KeyringCache::new());
        let permissions: Arc<dyn PermissionService> = Arc::new(db.clone());
        let keys = Arc::new(KeyManager::new(
            db.clone(),
            Arc::clone(&permissions),
            Arc::clone(&sessions),
            Arc::clone(&keyrings),
        ));
        let notifier = Arc::new(Notifier::new(collaborators.sinks));
        let scheduler_keys = Arc::new(SchedulerKeyCache::new());

        let task = ApprovalTask {
            registry: Arc::clone(&collections),
            processor: Arc::clone(&collaborators.processor),
            renderer: collaborators.renderer,
            notifier: Arc::clone(&notifier),
            alerter: Arc::clone(&collaborators.alerter),
            scheduler_keys: Arc::clone(&scheduler_keys),
            archive_dirs: config.approval.archive_dirs.clone(),
            step_timeout: config.step_timeout(),
        };
        let (approvals, worker) = ApprovalQueue::start(
            task,
            config.approval.queue_capacity,
            Arc::clone(&keyrings),
            Arc::clone(&permissions),
        );

        let publisher = Publisher::new(
            Arc::clone(&content),
            Arc::clone(&collections),
            Arc::clone(&permissions),
            Arc::clone(&keyrings),
            Arc::clone(&keys),
            Arc::clone(&scheduler_keys),
            notifier,
            collaborators.alerter,
        );

        let state = Arc::new(AppState {
            config,
            db,
            content,
            collections,
            sessions,
            keyrings,
            keys,
            permissions,
            processor: collaborators.processor,
            approvals,
            publisher,
            scheduler_keys,
        });
        Ok((state, worker))
    }

    /// Fail approvals left running by a previous process. Call once at
    /// startup, before any collection is submitted.
    pub async fn recover_interrupted_approvals(&self) -> Result<usize> {
        let failed = self.collections.fail_interrupted_approvals().await?;
        Ok(failed.len())
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.collections),
            self.publisher.clone(),
            Arc::clone(&self.scheduler_keys),
            Duration::from_secs(self.config.scheduler_interval_secs),
        )
    }

    /// Context for collection operations performed by `email`.
    pub fn context<'a>(&'a self, email: &'a str, key: Option<&'a CollectionKey>) -> CollectionContext<'a> {
        CollectionContext {
            email,
            registry: &self.collections,
            store: self.content.as_ref(),
            permissions: self.permissions.as_ref(),
            key,
        }
    }

    /// The collection key held by `session`, if any.
    pub fn collection_key(&self, session: &Session, collection: &Collection) -> Option<CollectionKey> {
        self.keyrings.get_key(&session.id, collection.id())
    }

    // ========================================================================
    // Users and sessions
    // ========================================================================

    pub fn register_user(
        &self,
        email: &str,
        name: &str,
        password: &str,
        permissions: &PermissionRecord,
    ) -> Result<UserRecord> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ReleaseError::BadRequest("email and password are required".to_string()));
        }
        if self.db.get_user(email)?.is_some() {
            return Err(ReleaseError::Conflict(format!("user {email} already exists")));
        }

        let user = UserRecord::new(email, name, password, self.config.kdf_iterations)?;
        self.db.put_user(&user)?;
        self.db.put_permissions(&user.email, permissions)?;
        tracing::info!(email = %user.email, "User registered");
        Ok(user)
    }

    /// Create the configured administrator unless it already exists.
    pub fn bootstrap_admin(&self, admin: &AdminConfig) -> Result<()> {
        if self.db.get_user(&admin.email)?.is_some() {
            return Ok(());
        }
        self.register_user(&admin.email, "Administrator", &admin.password, &PermissionRecord::administrator())?;
        Ok(())
    }

    /// Authenticate and open a session with the user's keyring unlocked.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.keys.start_session(email, password).await?;
        tracing::info!(email = %session.email, "Session started");
        Ok(session)
    }

    pub fn logout(&self, session: &Session) {
        self.keys.end_session(&session.id);
        tracing::info!(email = %session.email, "Session ended");
    }

    // ========================================================================
    // Collection lifecycle
    // ========================================================================

    /// Create a collection and give its new key to everyone entitled to it.
    pub async fn create_collection(&self, session: &Session, description: CollectionDescription) -> Result<Collection> {
        if !self.permissions.can_edit(&session.email) {
            return Err(ReleaseError::Unauthorized(format!(
                "{} cannot create collections",
                session.email
            )));
        }
        let collection = self.collections.create_collection(description).await?;
        self.keys
            .assign_new_key(session, &collection.description)
            .await?;
        Ok(collection)
    }

    /// Share a collection with `teams` and redistribute its key to match.
    /// Refused while the collection is being approved or is approved.
    pub async fn update_teams(
        &self,
        session: &Session,
        collection: &mut Collection,
        teams: BTreeSet<String>,
    ) -> Result<()> {
        if !self.permissions.can_edit(&session.email) {
            return Err(ReleaseError::Unauthorized(format!(
                "{} cannot change collection teams",
                session.email
            )));
        }
        if collection.description.is_locked() {
            return Err(ReleaseError::Conflict(format!(
                "collection {} is {:?}; unlock it first",
                collection.description.name, collection.description.approval_status
            )));
        }

        collection.description.teams = teams;
        collection.save().await?;
        self.keys
            .distribute_collection_key(session, &collection.description)
            .await
    }

    pub async fn delete_collection(&self, session: &Session, collection: &Collection) -> Result<()> {
        if !self.permissions.can_edit(&session.email) {
            return Err(ReleaseError::Unauthorized(format!(
                "{} cannot delete collections",
                session.email
            )));
        }
        self.collections.delete_collection(collection).await?;
        self.keys.revoke_collection_key(collection.id())?;
        self.scheduler_keys.remove(collection.id());
        Ok(())
    }
}
