#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use content_release::collaborators::{
    Alerter, CollaboratorError, DataProcessor, GeneratedContent, Renderer,
};
use content_release::collections::{Collection, CollectionDescription, CollectionType, ContentReader};
use content_release::config::{Config, StorageConfig};
use content_release::content_store::{ContentStore, ContentStoreError, LocalStore};
use content_release::notifications::{
    NotificationError, NotificationKind, NotificationSink, PublishNotification,
};
use content_release::sessions::Session;
use content_release::storage::models::PermissionRecord;
use content_release::{AppState, Collaborators};

pub const PASSWORD: &str = "correct horse";

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<PublishNotification>>,
}

impl RecordingSink {
    pub fn of_kind(&self, kind: NotificationKind) -> Vec<PublishNotification> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.kind() == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, notification: &PublishNotification) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAlerter {
    alerts: Mutex<Vec<String>>,
}

impl RecordingAlerter {
    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap().clone()
    }
}

impl Alerter for RecordingAlerter {
    fn alert(&self, collection: &CollectionDescription, message: &str) {
        self.alerts
            .lock()
            .unwrap()
            .push(format!("{}: {message}", collection.name));
    }
}

/// Data processor whose behaviour is set per test.
#[derive(Default)]
pub struct ScriptedProcessor {
    pub outputs: Vec<GeneratedContent>,
    pub delay: Option<Duration>,
    pub fail: bool,
    seen: Mutex<Vec<String>>,
    /// Reviewed content as the processor read it, `(uri, data)`
    read: Mutex<Vec<(String, Bytes)>>,
    cleaned: AtomicUsize,
}

impl ScriptedProcessor {
    pub fn generating(outputs: Vec<(&str, &str)>) -> Self {
        Self {
            outputs: outputs
                .into_iter()
                .map(|(uri, data)| GeneratedContent {
                    uri: uri.to_string(),
                    data: Bytes::from(data.to_string()),
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// Names of the collections processed, in order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn read(&self) -> Vec<(String, Bytes)> {
        self.read.lock().unwrap().clone()
    }

    pub fn cleaned(&self) -> usize {
        self.cleaned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataProcessor for ScriptedProcessor {
    async fn generate(
        &self,
        collection: &CollectionDescription,
        reader: &ContentReader<'_>,
    ) -> Result<Vec<GeneratedContent>, CollaboratorError> {
        self.seen.lock().unwrap().push(collection.name.clone());

        let uris: Vec<String> = reader.uris().cloned().collect();
        for uri in uris {
            let data = reader
                .read(&uri)
                .await
                .map_err(|e| CollaboratorError::Failed(e.to_string()))?;
            self.read.lock().unwrap().push((uri, data));
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(CollaboratorError::Failed("dataset generation failed".to_string()));
        }
        Ok(self.outputs.clone())
    }

    async fn clean(&self, _collection: &CollectionDescription) -> Result<(), CollaboratorError> {
        self.cleaned.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Renders every page to a fixed PDF body, except pages listed in `failing`.
#[derive(Default)]
pub struct FakeRenderer {
    pub failing: Vec<String>,
    rendered: Mutex<Vec<String>>,
}

impl FakeRenderer {
    pub fn failing_on(pages: &[&str]) -> Self {
        Self {
            failing: pages.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(&self, page_uri: &str, _session: &Session) -> Result<Bytes, CollaboratorError> {
        if self.failing.iter().any(|p| p == page_uri) {
            return Err(CollaboratorError::Failed(format!("cannot render {page_uri}")));
        }
        self.rendered.lock().unwrap().push(page_uri.to_string());
        Ok(Bytes::from_static(b"%PDF-1.7 fake"))
    }
}

/// Local store that refuses writes to URIs containing `poison`.
pub struct FlakyStore {
    inner: LocalStore,
    poison: String,
}

impl FlakyStore {
    pub fn new(inner: LocalStore, poison: &str) -> Self {
        Self {
            inner,
            poison: poison.to_string(),
        }
    }
}

#[async_trait]
impl ContentStore for FlakyStore {
    async fn put(&self, uri: &str, data: Bytes) -> Result<(), ContentStoreError> {
        if uri.contains(&self.poison) {
            return Err(ContentStoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.put(uri, data).await
    }

    async fn get(&self, uri: &str) -> Result<Bytes, ContentStoreError> {
        self.inner.get(uri).await
    }

    async fn delete(&self, uri: &str) -> Result<(), ContentStoreError> {
        self.inner.delete(uri).await
    }

    async fn exists(&self, uri: &str) -> Result<bool, ContentStoreError> {
        self.inner.exists(uri).await
    }

    async fn list(&self, uri: &str) -> Result<Vec<String>, ContentStoreError> {
        self.inner.list(uri).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Options {
    pub processor: Arc<ScriptedProcessor>,
    pub renderer: Option<Arc<FakeRenderer>>,
    /// Poison substring for a [`FlakyStore`]; a plain local store when `None`
    pub flaky: Option<String>,
    pub queue_capacity: usize,
    pub step_timeout_secs: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            processor: Arc::new(ScriptedProcessor::default()),
            renderer: None,
            flaky: None,
            queue_capacity: 16,
            step_timeout_secs: 30,
        }
    }
}

pub struct Harness {
    _temp: tempfile::TempDir,
    pub state: Arc<AppState>,
    pub processor: Arc<ScriptedProcessor>,
    pub renderer: Option<Arc<FakeRenderer>>,
    pub notifications: Arc<RecordingSink>,
    pub alerts: Arc<RecordingAlerter>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Options::default())
    }

    pub fn build(options: Options) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config {
            storage: StorageConfig {
                data_dir: temp.path().join("data").to_string_lossy().to_string(),
                collections_path: temp.path().join("collections").to_string_lossy().to_string(),
                content_path: temp.path().join("content").to_string_lossy().to_string(),
            },
            kdf_iterations: 1_000,
            ..Config::default()
        };
        config.approval.queue_capacity = options.queue_capacity;
        config.approval.step_timeout_secs = options.step_timeout_secs;

        let local = LocalStore::new(&config.storage.content_path).unwrap();
        let content: Arc<dyn ContentStore> = match &options.flaky {
            Some(poison) => Arc::new(FlakyStore::new(local, poison)),
            None => Arc::new(local),
        };

        let notifications = Arc::new(RecordingSink::default());
        let alerts = Arc::new(RecordingAlerter::default());
        let collaborators = Collaborators {
            processor: options.processor.clone(),
            renderer: options
                .renderer
                .clone()
                .map(|r| r as Arc<dyn Renderer>),
            sinks: vec![notifications.clone() as Arc<dyn NotificationSink>],
            alerter: alerts.clone(),
        };

        let (state, _worker) = AppState::build(config, content, collaborators).unwrap();
        Self {
            _temp: temp,
            state,
            processor: options.processor,
            renderer: options.renderer,
            notifications,
            alerts,
        }
    }

    /// Register a user with `permissions` and log them in.
    pub async fn user(&self, email: &str, permissions: PermissionRecord) -> Session {
        self.state
            .register_user(email, email, PASSWORD, &permissions)
            .unwrap();
        self.state.login(email, PASSWORD).await.unwrap()
    }

    pub async fn editor(&self, email: &str) -> Session {
        self.user(email, PermissionRecord::editor()).await
    }

    pub async fn collection(&self, session: &Session, name: &str) -> Collection {
        self.collection_with(session, CollectionDescription::new(name, CollectionType::Manual))
            .await
    }

    pub async fn collection_with(&self, session: &Session, description: CollectionDescription) -> Collection {
        self.state
            .create_collection(session, description)
            .await
            .unwrap()
    }

    pub async fn reload(&self, collection: &Collection) -> Collection {
        self.state.collections.require(collection.id()).await.unwrap()
    }

    /// Put `data` at `uri` in the published content store.
    pub async fn publish_file(&self, uri: &str, data: &str) {
        self.state
            .content
            .put(uri, Bytes::from(data.to_string()))
            .await
            .unwrap();
    }

    pub async fn published(&self, uri: &str) -> Option<String> {
        match self.state.content.get(uri).await {
            Ok(data) => Some(String::from_utf8(data.to_vec()).unwrap()),
            Err(ContentStoreError::NotFound(_)) => None,
            Err(e) => panic!("unexpected store error: {e}"),
        }
    }

    /// Create `uri` and take it through complete and review.
    pub async fn add_reviewed(&self, session: &Session, collection: &mut Collection, uri: &str, data: &str) {
        let key = self.state.collection_key(session, collection);
        let ctx = self.state.context(&session.email, key.as_ref());
        collection
            .create(&ctx, uri, Bytes::from(data.to_string()))
            .await
            .unwrap();
        collection.complete(&ctx, uri, false).await.unwrap();
        collection.review(&ctx, uri, false).await.unwrap();
    }
}
