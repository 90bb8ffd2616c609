use crate::collections::CollectionDescription;
use crate::storage::Database;

/// Access-control queries keyed by user email.
pub trait PermissionService: Send + Sync {
    fn is_administrator(&self, email: &str) -> bool;
    fn can_edit(&self, email: &str) -> bool;
    fn can_view(&self, email: &str, collection: &CollectionDescription) -> bool;
}

impl PermissionService for Database {
    fn is_administrator(&self, email: &str) -> bool {
        match self.get_permissions(email) {
            Ok(record) => record.administrator,
            Err(e) => {
                tracing::warn!(email, error = %e, "Permission lookup failed");
                false
            }
        }
    }

    fn can_edit(&self, email: &str) -> bool {
        match self.get_permissions(email) {
            Ok(record) => record.administrator || record.editor,
            Err(e) => {
                tracing::warn!(email, error = %e, "Permission lookup failed");
                false
            }
        }
    }

    /// Administrators and editors see every collection; everyone else needs a
    /// team the collection has been shared with.
    fn can_view(&self, email: &str, collection: &CollectionDescription) -> bool {
        match self.get_permissions(email) {
            Ok(record) => {
                record.administrator
                    || record.editor
                    || !record.teams.is_disjoint(&collection.teams)
            }
            Err(e) => {
                tracing::warn!(email, error = %e, "Permission lookup failed");
                false
            }
        }
    }
}
