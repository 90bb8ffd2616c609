mod admin;
mod collections;
mod content;
mod published;
mod session;

pub use admin::{create_user, health, update_permissions};
pub use collections::{
    approve, create_collection, delete_collection, get_collection, list_collections, publish,
    unlock, update_teams,
};
pub use content::{
    cancel_deletion, complete_content, create_content, delete_content, edit_content,
    mark_for_deletion, move_content, read_content, review_content,
};
pub use published::serve_published;
pub use session::{login, logout};
