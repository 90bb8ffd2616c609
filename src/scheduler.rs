//! Publishes approved scheduled collections once their publish date passes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::collections::{ApprovalStatus, CollectionRegistry, CollectionType};
use crate::crypto::CollectionKey;
use crate::error::Result;
use crate::publisher::Publisher;

pub const SCHEDULER_EMAIL: &str = "scheduler";

/// Keys of approved scheduled collections, captured at approval so they can be
/// published without a user session.
#[derive(Default)]
pub struct SchedulerKeyCache {
    keys: RwLock<HashMap<String, CollectionKey>>,
}

impl SchedulerKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection_id: &str, key: CollectionKey) {
        self.keys.write().insert(collection_id.to_string(), key);
    }

    pub fn get(&self, collection_id: &str) -> Option<CollectionKey> {
        self.keys.read().get(collection_id).cloned()
    }

    pub fn remove(&self, collection_id: &str) -> Option<CollectionKey> {
        self.keys.write().remove(collection_id)
    }
}

pub struct Scheduler {
    registry: Arc<CollectionRegistry>,
    publisher: Publisher,
    keys: Arc<SchedulerKeyCache>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        registry: Arc<CollectionRegistry>,
        publisher: Publisher,
        keys: Arc<SchedulerKeyCache>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            publisher,
            keys,
            interval,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_due(Utc::now()).await {
                    tracing::warn!(error = %e, "Scheduled publish pass failed");
                }
            }
        })
    }

    /// Publish every approved scheduled collection due at `now`. Returns the
    /// ids that were published.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut published = Vec::new();

        for collection in self.registry.list().await? {
            let description = &collection.description;
            let due = description.collection_type == CollectionType::Scheduled
                && description.approval_status == ApprovalStatus::Complete
                && description.publish_date.is_some_and(|date| date <= now);
            if !due {
                continue;
            }

            let key = self.keys.get(&description.id);
            if description.encrypted && key.is_none() {
                tracing::warn!(
                    collection_id = %description.id,
                    "Scheduled collection is due but its key is not cached; publish it manually"
                );
                continue;
            }

            match self
                .publisher
                .publish_with_key(&description.id, SCHEDULER_EMAIL, key, false)
                .await
            {
                Ok(true) => published.push(description.id.clone()),
                Ok(false) => {
                    tracing::warn!(collection_id = %description.id, "Scheduled publish did not complete")
                }
                Err(e) => {
                    tracing::warn!(collection_id = %description.id, error = %e, "Scheduled publish refused")
                }
            }
        }

        if !published.is_empty() {
            tracing::info!(count = published.len(), "Scheduled collections published");
        }
        Ok(published)
    }
}
