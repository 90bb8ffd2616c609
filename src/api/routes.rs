use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize;

    Router::new()
        // Sessions
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        // Collections
        .route("/collections", get(handlers::list_collections))
        .route("/collections", post(handlers::create_collection))
        .route("/collections/:id", get(handlers::get_collection))
        .route("/collections/:id", delete(handlers::delete_collection))
        .route("/collections/:id/teams", put(handlers::update_teams))
        .route("/collections/:id/approve", post(handlers::approve))
        .route("/collections/:id/unlock", post(handlers::unlock))
        .route("/collections/:id/publish", post(handlers::publish))
        // Collection content
        .route(
            "/collections/:id/content/*uri",
            post(handlers::create_content).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/collections/:id/content/*uri",
            put(handlers::edit_content).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/collections/:id/content/*uri", get(handlers::read_content))
        .route("/collections/:id/content/*uri", delete(handlers::delete_content))
        .route("/collections/:id/complete/*uri", post(handlers::complete_content))
        .route("/collections/:id/review/*uri", post(handlers::review_content))
        .route("/collections/:id/move", post(handlers::move_content))
        .route("/collections/:id/deletes/*uri", post(handlers::mark_for_deletion))
        .route("/collections/:id/deletes/*uri", delete(handlers::cancel_deletion))
        // Published content
        .route("/content/*uri", get(handlers::serve_published))
        // Administration
        .route("/users", post(handlers::create_user))
        .route("/users/:email/permissions", put(handlers::update_permissions))
        .route("/_internal/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
