use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collections::CollectionDescription;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Delivery to {url} failed with status {status}")]
    Rejected { url: String, status: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Approved,
    Published,
}

/// Snapshot of the URIs a release touches, for cache and search invalidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishNotification {
    kind: NotificationKind,
    collection_id: String,
    collection_name: String,
    publish_date: Option<DateTime<Utc>>,
    uris_to_update: Vec<String>,
    uris_to_delete: Vec<String>,
    created_at: DateTime<Utc>,
}

impl PublishNotification {
    pub fn new(
        kind: NotificationKind,
        collection: &CollectionDescription,
        uris_to_update: Vec<String>,
        uris_to_delete: Vec<String>,
    ) -> Self {
        Self {
            kind,
            collection_id: collection.id.clone(),
            collection_name: collection.name.clone(),
            publish_date: collection.publish_date,
            uris_to_update,
            uris_to_delete,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn publish_date(&self) -> Option<DateTime<Utc>> {
        self.publish_date
    }

    pub fn uris_to_update(&self) -> &[String] {
        &self.uris_to_update
    }

    pub fn uris_to_delete(&self) -> &[String] {
        &self.uris_to_delete
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &PublishNotification) -> Result<(), NotificationError>;
}

/// POSTs the notification as JSON to each configured URL.
pub struct WebhookSink {
    client: Client,
    urls: Vec<String>,
}

impl WebhookSink {
    pub fn new(urls: Vec<String>) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { client, urls })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, notification: &PublishNotification) -> Result<(), NotificationError> {
        let mut first_error = None;
        for url in &self.urls {
            let result = self.client.post(url).json(notification).send().await;
            let error = match result {
                Ok(resp) if resp.status().is_success() => continue,
                Ok(resp) => NotificationError::Rejected {
                    url: url.clone(),
                    status: resp.status().as_u16(),
                },
                Err(e) => NotificationError::Http(e),
            };
            tracing::warn!(url = %url, error = %error, "Webhook delivery failed");
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Best-effort fan-out to every sink. Delivery failures are logged only.
#[derive(Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    pub async fn notify(&self, notification: &PublishNotification) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(notification).await {
                tracing::warn!(
                    collection_id = %notification.collection_id,
                    kind = ?notification.kind,
                    error = %e,
                    "Publish notification not delivered"
                );
            }
        }
        tracing::info!(
            collection_id = %notification.collection_id,
            kind = ?notification.kind,
            uris = notification.uris_to_update.len(),
            deletes = notification.uris_to_delete.len(),
            "Publish notification raised"
        );
    }
}
