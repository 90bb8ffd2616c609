use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content_store::is_below;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    #[default]
    NotStarted,
    InProgress,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    #[default]
    Manual,
    Scheduled,
}

/// The three working stages. Directory names are part of the on-disk layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    InProgress,
    Complete,
    Reviewed,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::InProgress, Stage::Complete, Stage::Reviewed];

    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::InProgress => "inprogress",
            Stage::Complete => "complete",
            Stage::Reviewed => "reviewed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    Edited,
    Completed,
    Reviewed,
    Moved,
    Deleted,
    MarkedForDeletion,
    DeletionCancelled,
    ApprovalSubmitted,
    Approved,
    ApprovalFailed,
    Unlocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub email: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Published content scheduled for removal when the collection publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelete {
    pub uri: String,
    pub requested_by: String,
    /// Published items covered by `uri` when the deletion was requested
    pub uris: Vec<String>,
}

/// A reviewed subtree compressed during approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// URI of the archive file in the reviewed stage
    pub uri: String,
    /// Directory the entries are relative to
    pub root: String,
    /// Full URIs of the archived items
    pub entries: Vec<String>,
}

impl ArchiveRecord {
    pub fn contains(&self, uri: &str) -> bool {
        self.entries.iter().any(|entry| entry == uri)
    }
}

/// Persisted state of a collection (`collection.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDescription {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub collection_type: CollectionType,
    #[serde(default)]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approval_status: ApprovalStatus,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub teams: BTreeSet<String>,
    #[serde(default)]
    pub events: Vec<Event>,

    #[serde(default)]
    pub in_progress: BTreeSet<String>,
    #[serde(default)]
    pub complete: BTreeSet<String>,
    #[serde(default)]
    pub reviewed: BTreeSet<String>,

    #[serde(default)]
    pub pending_deletes: Vec<PendingDelete>,
    #[serde(default)]
    pub timeseries_import_files: Vec<String>,
    #[serde(default)]
    pub release_uri: Option<String>,

    /// Reviewed URIs materialized during approval
    #[serde(default)]
    pub generated: BTreeSet<String>,
    #[serde(default)]
    pub archives: Vec<ArchiveRecord>,
}

impl CollectionDescription {
    pub fn new(name: &str, collection_type: CollectionType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.trim().to_string(),
            collection_type,
            publish_date: None,
            approval_status: ApprovalStatus::NotStarted,
            encrypted: false,
            teams: BTreeSet::new(),
            events: Vec::new(),
            in_progress: BTreeSet::new(),
            complete: BTreeSet::new(),
            reviewed: BTreeSet::new(),
            pending_deletes: Vec::new(),
            timeseries_import_files: Vec::new(),
            release_uri: None,
            generated: BTreeSet::new(),
            archives: Vec::new(),
        }
    }

    pub fn add_event(&mut self, event_type: EventType, email: &str, detail: Option<String>) {
        self.events.push(Event {
            date: Utc::now(),
            event_type,
            email: email.to_string(),
            detail,
        });
    }

    pub fn set(&self, stage: Stage) -> &BTreeSet<String> {
        match stage {
            Stage::InProgress => &self.in_progress,
            Stage::Complete => &self.complete,
            Stage::Reviewed => &self.reviewed,
        }
    }

    pub fn set_mut(&mut self, stage: Stage) -> &mut BTreeSet<String> {
        match stage {
            Stage::InProgress => &mut self.in_progress,
            Stage::Complete => &mut self.complete,
            Stage::Reviewed => &mut self.reviewed,
        }
    }

    /// The stage currently holding `uri` as an item.
    pub fn stage_of(&self, uri: &str) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|stage| self.set(*stage).contains(uri))
    }

    /// Items in `stage` strictly below the directory `dir`.
    pub fn items_below(&self, stage: Stage, dir: &str) -> Vec<String> {
        self.set(stage)
            .iter()
            .filter(|uri| is_below(uri, dir))
            .cloned()
            .collect()
    }

    /// True when `uri` is an item of any working set or of an approval archive.
    pub fn is_in_collection(&self, uri: &str) -> bool {
        self.stage_of(uri).is_some() || self.archives.iter().any(|a| a.contains(uri))
    }

    pub fn is_empty(&self) -> bool {
        self.in_progress.is_empty()
            && self.complete.is_empty()
            && self.reviewed.is_empty()
            && self.archives.is_empty()
    }

    /// Every URI has reached the reviewed stage.
    pub fn is_ready_for_approval(&self) -> bool {
        self.in_progress.is_empty() && self.complete.is_empty()
    }

    /// Working-set mutations are refused while approval runs or holds.
    pub fn is_locked(&self) -> bool {
        matches!(
            self.approval_status,
            ApprovalStatus::InProgress | ApprovalStatus::Complete
        )
    }

    /// URIs that will be written to the content store on publish.
    pub fn uris_to_publish(&self) -> Vec<String> {
        let mut uris: BTreeSet<String> = self
            .reviewed
            .iter()
            .filter(|uri| !self.archives.iter().any(|a| &a.uri == *uri))
            .cloned()
            .collect();
        for archive in &self.archives {
            uris.extend(archive.entries.iter().cloned());
        }
        uris.into_iter().collect()
    }

    pub fn uris_to_delete(&self) -> Vec<String> {
        let uris: BTreeSet<String> = self
            .pending_deletes
            .iter()
            .flat_map(|pending| pending.uris.iter().cloned())
            .collect();
        uris.into_iter().collect()
    }
}
