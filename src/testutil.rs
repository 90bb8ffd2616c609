//! Shared test helpers for in-crate tests.

use std::sync::Arc;

use crate::config::{Config, StorageConfig};
use crate::content_store::LocalStore;
use crate::{AppState, Collaborators};

/// Create a test AppState with a temporary database, collection root and
/// local content store.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    let config = Config {
        storage: StorageConfig {
            data_dir: temp_dir.path().join("data").to_string_lossy().to_string(),
            collections_path: temp_dir.path().join("collections").to_string_lossy().to_string(),
            content_path: temp_dir.path().join("content").to_string_lossy().to_string(),
        },
        kdf_iterations: 1_000,
        ..Config::default()
    };

    let content = LocalStore::new(&config.storage.content_path).expect("Failed to create test content store");
    let (state, _worker) =
        AppState::build(config, Arc::new(content), Collaborators::default()).expect("Failed to build test state");
    state
}
