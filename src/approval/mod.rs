//! Single-worker approval queue.
//!
//! Submissions are gated synchronously; accepted jobs run one at a time, in
//! submission order, on a dedicated task. Each submitter gets a
//! [`PendingResult`] that resolves once its job has run.

mod task;

pub use task::{ApprovalTask, RENDERABLE_TYPES};

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::collections::{ApprovalStatus, Collection, CollectionDescription, EventType};
use crate::crypto::CollectionKey;
use crate::error::{ReleaseError, Result};
use crate::keys::KeyringCache;
use crate::permissions::PermissionService;
use crate::sessions::Session;

pub(crate) struct ApprovalJob {
    pub collection_id: String,
    /// The description as saved at submission
    pub submitted: CollectionDescription,
    pub session: Session,
    pub key: Option<CollectionKey>,
    reply: oneshot::Sender<bool>,
}

/// Resolves to `true` when the collection was approved.
#[derive(Debug)]
pub struct PendingResult {
    rx: oneshot::Receiver<bool>,
}

impl PendingResult {
    /// Wait for the job. A worker that went away counts as failure.
    pub async fn wait(self) -> bool {
        self.rx.await.unwrap_or(false)
    }

    /// The result, if the job has finished.
    pub fn try_result(&mut self) -> Option<bool> {
        match self.rx.try_recv() {
            Ok(approved) => Some(approved),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(false),
        }
    }
}

#[derive(Clone)]
pub struct ApprovalQueue {
    tx: mpsc::Sender<ApprovalJob>,
    keyrings: Arc<KeyringCache>,
    permissions: Arc<dyn PermissionService>,
}

impl ApprovalQueue {
    /// Spawn the worker. It stops once every queue handle is dropped.
    pub fn start(
        task: ApprovalTask,
        capacity: usize,
        keyrings: Arc<KeyringCache>,
        permissions: Arc<dyn PermissionService>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(task, rx));
        (
            Self {
                tx,
                keyrings,
                permissions,
            },
            handle,
        )
    }

    /// Gate and enqueue an approval. On refusal the collection is untouched.
    pub async fn submit(&self, collection: &mut Collection, session: &Session) -> Result<PendingResult> {
        if !self.permissions.can_edit(&session.email) {
            return Err(ReleaseError::Unauthorized(format!(
                "{} cannot approve collections",
                session.email
            )));
        }
        let description = &collection.description;
        if description.is_locked() {
            return Err(ReleaseError::Conflict(format!(
                "collection {} is already {:?}",
                description.name, description.approval_status
            )));
        }
        if !description.is_ready_for_approval() {
            return Err(ReleaseError::Conflict(format!(
                "collection {} has content that is not reviewed",
                description.name
            )));
        }

        let key = match description.encrypted {
            true => Some(self.keyrings.get_key(&session.id, &description.id).ok_or_else(|| {
                ReleaseError::Unauthorized(format!(
                    "{} does not hold the key for collection {}",
                    session.email, description.id
                ))
            })?),
            false => None,
        };

        let permit = self.tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => {
                ReleaseError::Unavailable("approval queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(()) => {
                ReleaseError::Unavailable("approval worker is not running".to_string())
            }
        })?;

        let previous = collection.description.approval_status;
        collection.description.approval_status = ApprovalStatus::InProgress;
        collection
            .description
            .add_event(EventType::ApprovalSubmitted, &session.email, None);
        if let Err(e) = collection.save().await {
            collection.description.approval_status = previous;
            collection.description.events.pop();
            return Err(e);
        }

        let (reply, rx) = oneshot::channel();
        permit.send(ApprovalJob {
            collection_id: collection.id().to_string(),
            submitted: collection.description.clone(),
            session: session.clone(),
            key,
            reply,
        });

        tracing::info!(
            collection_id = %collection.id(),
            email = %session.email,
            "Collection submitted for approval"
        );
        Ok(PendingResult { rx })
    }
}

async fn run_worker(task: ApprovalTask, mut rx: mpsc::Receiver<ApprovalJob>) {
    while let Some(job) = rx.recv().await {
        let approved = task.run(&job).await;
        // The submitter may have stopped waiting
        let _ = job.reply.send(approved);
    }
    tracing::info!("Approval worker stopped");
}
