use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::response::ApiError;
use crate::sessions::Session;
use crate::AppState;

pub const SESSION_HEADER: &str = "x-session-token";

/// The caller's live session, resolved from the `X-Session-Token` header.
pub struct CurrentSession(pub Session);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing session token"))?;

        state
            .sessions
            .get(token)
            .map(CurrentSession)
            .ok_or_else(|| ApiError::unauthorized("Session expired or unknown"))
    }
}
