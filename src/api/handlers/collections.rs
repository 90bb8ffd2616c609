use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::response::{ApiError, AppJson, AppQuery, JSend, JSendPaginated, Pagination};
use crate::api::CurrentSession;
use crate::collections::{
    ApprovalStatus, Collection, CollectionDescription, CollectionType, EventType,
};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CollectionSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub collection_type: CollectionType,
    pub publish_date: Option<DateTime<Utc>>,
    pub approval_status: ApprovalStatus,
    pub encrypted: bool,
    pub in_progress: usize,
    pub complete: usize,
    pub reviewed: usize,
}

impl From<&CollectionDescription> for CollectionSummary {
    fn from(d: &CollectionDescription) -> Self {
        Self {
            id: d.id.clone(),
            name: d.name.clone(),
            collection_type: d.collection_type,
            publish_date: d.publish_date,
            approval_status: d.approval_status,
            encrypted: d.encrypted,
            in_progress: d.in_progress.len(),
            complete: d.complete.len(),
            reviewed: d.reviewed.len(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListCollectionsParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct CreateCollectionRequest {
    pub name: String,
    #[serde(rename = "type", default)]
    pub collection_type: CollectionType,
    #[serde(default)]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub teams: BTreeSet<String>,
    #[serde(default)]
    pub release_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTeamsRequest {
    pub teams: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
pub struct PublishParams {
    #[serde(default)]
    pub break_before_transfer: bool,
    #[serde(default)]
    pub skip_verification: bool,
}

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    pub id: String,
    pub approval_status: ApprovalStatus,
}

#[derive(Debug, Serialize)]
pub struct OutcomeResponse {
    pub id: String,
    pub success: bool,
}

// ============================================================================
// Helpers
// ============================================================================

/// Resolve a collection the caller may see.
async fn visible_collection(state: &AppState, email: &str, id: &str) -> Result<Collection, ApiError> {
    let collection = state.collections.require(id).await?;
    if !state.permissions.can_view(email, &collection.description) {
        // Indistinguishable from a missing collection
        return Err(ApiError::not_found(format!("Not found: collection {id}")));
    }
    Ok(collection)
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_collections(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    AppQuery(params): AppQuery<ListCollectionsParams>,
) -> Result<Json<JSendPaginated<CollectionSummary>>, ApiError> {
    let limit = params.limit.min(100);
    let visible: Vec<CollectionSummary> = state
        .collections
        .list()
        .await?
        .iter()
        .filter(|c| state.permissions.can_view(&session.email, &c.description))
        .map(|c| CollectionSummary::from(&c.description))
        .collect();

    let total = visible.len() as u64;
    let items = visible
        .into_iter()
        .skip(params.offset as usize)
        .take(limit as usize)
        .collect();

    Ok(JSendPaginated::success(
        items,
        Pagination {
            limit,
            offset: params.offset,
            total,
        },
    ))
}

pub async fn get_collection(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> Result<Json<JSend<CollectionDescription>>, ApiError> {
    let collection = visible_collection(&state, &session.email, &id).await?;
    Ok(JSend::success(collection.description))
}

pub async fn create_collection(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    AppJson(body): AppJson<CreateCollectionRequest>,
) -> Result<(StatusCode, Json<JSend<CollectionDescription>>), ApiError> {
    let mut description = CollectionDescription::new(&body.name, body.collection_type);
    description.publish_date = body.publish_date;
    description.encrypted = body.encrypted;
    description.teams = body.teams;
    description.release_uri = body
        .release_uri
        .as_deref()
        .map(crate::content_store::normalize_uri)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    description.add_event(EventType::Created, &session.email, None);

    let collection = state.create_collection(&session, description).await?;
    Ok((StatusCode::CREATED, JSend::success(collection.description)))
}

pub async fn delete_collection(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let collection = visible_collection(&state, &session.email, &id).await?;
    state.delete_collection(&session, &collection).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Share a collection with a different set of teams and redistribute its key.
pub async fn update_teams(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateTeamsRequest>,
) -> Result<Json<JSend<CollectionDescription>>, ApiError> {
    let mut collection = visible_collection(&state, &session.email, &id).await?;
    state.update_teams(&session, &mut collection, body.teams).await?;
    Ok(JSend::success(collection.description))
}

/// Queue the collection for approval and return at once.
pub async fn approve(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JSend<ApprovalResponse>>), ApiError> {
    let mut collection = visible_collection(&state, &session.email, &id).await?;
    let pending = state.approvals.submit(&mut collection, &session).await?;

    let collection_id = collection.id().to_string();
    tokio::spawn(async move {
        let approved = pending.wait().await;
        tracing::info!(collection_id = %collection_id, approved, "Approval finished");
    });

    Ok((
        StatusCode::ACCEPTED,
        JSend::success(ApprovalResponse {
            id: collection.description.id.clone(),
            approval_status: collection.description.approval_status,
        }),
    ))
}

pub async fn unlock(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> Result<Json<JSend<OutcomeResponse>>, ApiError> {
    let mut collection = visible_collection(&state, &session.email, &id).await?;
    let ctx = state.context(&session.email, None);
    let success = collection.unlock(&ctx, state.processor.as_ref()).await?;
    Ok(JSend::success(OutcomeResponse { id, success }))
}

pub async fn publish(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
    AppQuery(params): AppQuery<PublishParams>,
) -> Result<Json<JSend<OutcomeResponse>>, ApiError> {
    let collection = visible_collection(&state, &session.email, &id).await?;
    let success = state
        .publisher
        .publish(
            &collection,
            &session,
            params.break_before_transfer,
            params.skip_verification,
        )
        .await?;
    Ok(JSend::success(OutcomeResponse { id, success }))
}
