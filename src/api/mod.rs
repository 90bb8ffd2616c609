mod auth;
pub mod handlers;
pub mod response;
mod routes;

pub use auth::{CurrentSession, SESSION_HEADER};
pub use routes::create_router;
