use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, JSend};
use crate::api::CurrentSession;
use crate::storage::models::PermissionRecord;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub permissions: PermissionRecord,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePermissionsRequest {
    #[serde(default)]
    pub administrator: bool,
    #[serde(default)]
    pub editor: bool,
    #[serde(default)]
    pub teams: BTreeSet<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub email: String,
    pub name: String,
    pub created_at: String,
}

fn require_admin(state: &AppState, email: &str) -> Result<(), ApiError> {
    if !state.permissions.is_administrator(email) {
        return Err(ApiError::unauthorized("Administrator permission required"));
    }
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    AppJson(body): AppJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<JSend<UserResponse>>), ApiError> {
    require_admin(&state, &session.email)?;
    let user = state.register_user(&body.email, &body.name, &body.password, &body.permissions)?;
    Ok((
        StatusCode::CREATED,
        JSend::success(UserResponse {
            email: user.email,
            name: user.name,
            created_at: user.created_at.to_rfc3339(),
        }),
    ))
}

/// Replace a user's permissions, then redistribute the key of every
/// collection the calling administrator holds.
pub async fn update_permissions(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path(email): Path<String>,
    AppJson(body): AppJson<UpdatePermissionsRequest>,
) -> Result<Json<JSend<PermissionRecord>>, ApiError> {
    require_admin(&state, &session.email)?;
    if state.db.get_user(&email).map_err(|e| ApiError::internal(e.to_string()))?.is_none() {
        return Err(ApiError::not_found(format!("User {email} not found")));
    }

    let record = PermissionRecord {
        administrator: body.administrator,
        editor: body.editor,
        teams: body.teams,
    };
    state
        .db
        .put_permissions(&email, &record)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    for collection in state.collections.list().await? {
        if state.keyrings.contains(&session.id, collection.id()) {
            state
                .keys
                .distribute_collection_key(&session, &collection.description)
                .await?;
        }
    }
    Ok(JSend::success(record))
}
