use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::api::response::ApiError;
use crate::content_store::ContentStoreError;
use crate::AppState;

/// Serve published content by URI.
/// Route: GET /content/*uri
pub async fn serve_published(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(uri): axum::extract::Path<String>,
) -> Result<Response, ApiError> {
    let data = state.content.get(&uri).await.map_err(|e| match e {
        ContentStoreError::NotFound(_) => ApiError::not_found("Content not found"),
        ContentStoreError::InvalidUri(_) => ApiError::bad_request(e.to_string()),
        _ => ApiError::internal(format!("Failed to retrieve content: {e}")),
    })?;

    let byte_size = data.len() as u64;
    let mut response = (StatusCode::OK, data).into_response();
    let headers = response.headers_mut();

    let mime = mime_guess::from_path(&uri).first_or_octet_stream();
    headers.insert(
        header::CONTENT_TYPE,
        mime.essence_str()
            .parse()
            .unwrap_or(header::HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(byte_size));

    // Published content changes on every release, so keep caching short
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("public, max-age=60"),
    );

    Ok(response)
}
