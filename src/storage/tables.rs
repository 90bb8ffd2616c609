use redb::TableDefinition;

/// Users: email -> UserRecord (msgpack)
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Persisted keyrings: email -> StoredKeyring (msgpack)
pub const KEYRINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("keyrings");

/// Access rights: email -> PermissionRecord (msgpack)
pub const PERMISSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("permissions");
