use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::api::CurrentSession;
use crate::collections::{Collection, Stage};
use crate::sessions::Session;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RecursiveParams {
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    /// Remove a whole data-visualisation tree rather than one item
    #[serde(default)]
    pub tree: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReadParams {
    pub stage: Option<Stage>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub from: String,
    pub to: String,
    /// Move a directory rather than a single item
    #[serde(default)]
    pub rename: bool,
}

#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub collection_id: String,
    pub uri: String,
}

// ============================================================================
// Helpers
// ============================================================================

async fn load(state: &AppState, session: &Session, id: &str) -> Result<Collection, ApiError> {
    let collection = state.collections.require(id).await?;
    if !state.permissions.can_view(&session.email, &collection.description) {
        return Err(ApiError::not_found(format!("Not found: collection {id}")));
    }
    Ok(collection)
}

fn check_size(state: &AppState, body: &Bytes) -> Result<(), ApiError> {
    if body.len() as u64 > state.config.max_upload_size {
        return Err(ApiError::payload_too_large(format!(
            "Content exceeds maximum upload size of {} bytes",
            state.config.max_upload_size
        )));
    }
    Ok(())
}

fn done(collection: &Collection, uri: String) -> Json<JSend<ContentResponse>> {
    JSend::success(ContentResponse {
        collection_id: collection.id().to_string(),
        uri,
    })
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_content(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path((id, uri)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<JSend<ContentResponse>>), ApiError> {
    check_size(&state, &body)?;
    let mut collection = load(&state, &session, &id).await?;
    let key = state.collection_key(&session, &collection);
    let ctx = state.context(&session.email, key.as_ref());

    collection.create(&ctx, &uri, body).await?;
    Ok((StatusCode::CREATED, done(&collection, uri)))
}

/// Bring content into the collection. An empty body copies the published version.
pub async fn edit_content(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path((id, uri)): Path<(String, String)>,
    AppQuery(params): AppQuery<RecursiveParams>,
    body: Bytes,
) -> Result<Json<JSend<ContentResponse>>, ApiError> {
    check_size(&state, &body)?;
    let mut collection = load(&state, &session, &id).await?;
    let key = state.collection_key(&session, &collection);
    let ctx = state.context(&session.email, key.as_ref());

    let content = (!body.is_empty()).then_some(body);
    collection.edit(&ctx, &uri, params.recursive, content).await?;
    Ok(done(&collection, uri))
}

pub async fn read_content(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path((id, uri)): Path<(String, String)>,
    AppQuery(params): AppQuery<ReadParams>,
) -> Result<Response, ApiError> {
    let collection = load(&state, &session, &id).await?;
    let uri = crate::content_store::normalize_uri(&uri).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let stage = params
        .stage
        .or_else(|| collection.description.stage_of(&uri))
        .ok_or_else(|| ApiError::not_found(format!("{uri} is not in this collection")))?;
    let key = state.collection_key(&session, &collection);

    let data = collection.read_content(stage, &uri, key.as_ref()).await?;
    let mime = mime_guess::from_path(&uri).first_or_octet_stream();
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, mime.essence_str().to_string())],
        data,
    )
        .into_response())
}

pub async fn complete_content(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path((id, uri)): Path<(String, String)>,
    AppQuery(params): AppQuery<RecursiveParams>,
) -> Result<Json<JSend<ContentResponse>>, ApiError> {
    let mut collection = load(&state, &session, &id).await?;
    let ctx = state.context(&session.email, None);
    collection.complete(&ctx, &uri, params.recursive).await?;
    Ok(done(&collection, uri))
}

pub async fn review_content(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path((id, uri)): Path<(String, String)>,
    AppQuery(params): AppQuery<RecursiveParams>,
) -> Result<Json<JSend<ContentResponse>>, ApiError> {
    let mut collection = load(&state, &session, &id).await?;
    let ctx = state.context(&session.email, None);
    collection.review(&ctx, &uri, params.recursive).await?;
    Ok(done(&collection, uri))
}

pub async fn delete_content(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path((id, uri)): Path<(String, String)>,
    AppQuery(params): AppQuery<DeleteParams>,
) -> Result<StatusCode, ApiError> {
    let mut collection = load(&state, &session, &id).await?;
    let ctx = state.context(&session.email, None);
    if params.tree {
        collection.delete_tree(&ctx, &uri).await?;
    } else {
        collection.delete(&ctx, &uri).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn move_content(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
    AppJson(body): AppJson<MoveRequest>,
) -> Result<Json<JSend<ContentResponse>>, ApiError> {
    let mut collection = load(&state, &session, &id).await?;
    let ctx = state.context(&session.email, None);
    if body.rename {
        collection.rename_content(&ctx, &body.from, &body.to).await?;
    } else {
        collection.move_content(&ctx, &body.from, &body.to).await?;
    }
    Ok(done(&collection, body.to))
}

pub async fn mark_for_deletion(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path((id, uri)): Path<(String, String)>,
) -> Result<Json<JSend<ContentResponse>>, ApiError> {
    let mut collection = load(&state, &session, &id).await?;
    let ctx = state.context(&session.email, None);
    collection.mark_for_deletion(&ctx, &uri).await?;
    Ok(done(&collection, uri))
}

pub async fn cancel_deletion(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path((id, uri)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let mut collection = load(&state, &session, &id).await?;
    let ctx = state.context(&session.email, None);
    collection.cancel_deletion(&ctx, &uri).await?;
    Ok(StatusCode::NO_CONTENT)
}
