//! Interfaces to the systems the release pipeline depends on but does not own.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use thiserror::Error;

use crate::collections::{CollectionDescription, ContentReader};
use crate::sessions::Session;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{0}")]
    Failed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Content produced by the data-processing collaborator, destined for the
/// reviewed stage.
#[derive(Debug, Clone)]
pub struct GeneratedContent {
    pub uri: String,
    pub data: Bytes,
}

/// Materializes derived content (datasets, downloads) for a collection.
#[async_trait]
pub trait DataProcessor: Send + Sync {
    async fn generate(
        &self,
        collection: &CollectionDescription,
        reader: &ContentReader<'_>,
    ) -> Result<Vec<GeneratedContent>, CollaboratorError>;

    /// Release anything held for `collection` after its approval artifacts are discarded.
    async fn clean(&self, collection: &CollectionDescription) -> Result<(), CollaboratorError>;
}

/// Used when no data-processing service is deployed.
pub struct NoopProcessor;

#[async_trait]
impl DataProcessor for NoopProcessor {
    async fn generate(
        &self,
        _collection: &CollectionDescription,
        _reader: &ContentReader<'_>,
    ) -> Result<Vec<GeneratedContent>, CollaboratorError> {
        Ok(Vec::new())
    }

    async fn clean(&self, _collection: &CollectionDescription) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Renders a page to a derivative artifact (PDF).
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, page_uri: &str, session: &Session) -> Result<Bytes, CollaboratorError>;
}

/// Renderer backed by an HTTP rendering service: `GET {base_url}{page_uri}/pdf`.
pub struct HttpRenderer {
    base_url: String,
    client: Client,
}

impl HttpRenderer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, page_uri: &str, session: &Session) -> Result<Bytes, CollaboratorError> {
        let resp = self
            .client
            .get(format!("{}{}/pdf", self.base_url, page_uri))
            .header("X-Session-Token", &session.id)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::Failed(format!(
                "render of {page_uri} failed ({status}): {body}"
            )));
        }

        Ok(resp.bytes().await?)
    }
}

/// Operator alerts for failures that need a human.
pub trait Alerter: Send + Sync {
    fn alert(&self, collection: &CollectionDescription, message: &str);
}

pub struct LogAlerter;

impl Alerter for LogAlerter {
    fn alert(&self, collection: &CollectionDescription, message: &str) {
        tracing::error!(
            collection_id = %collection.id,
            collection = %collection.name,
            alert = message,
            "Operator alert"
        );
    }
}
