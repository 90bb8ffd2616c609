use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::{normalize_email, PermissionRecord, StoredKeyring, UserRecord};
use super::tables::*;

impl Database {
    // ========================================================================
    // Users
    // ========================================================================

    pub fn put_user(&self, user: &UserRecord) -> Result<(), DatabaseError> {
        debug_assert!(!user.email.is_empty(), "user email must not be empty");

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(USERS)?;
            let data = rmp_serde::to_vec_named(user)?;
            table.insert(user.email.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_user(&self, email: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let email = normalize_email(email);
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(email.as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Every registered user, ordered by email
    pub fn list_users(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        let mut users = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            users.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(users)
    }

    // ========================================================================
    // Keyrings
    // ========================================================================

    pub fn get_keyring(&self, email: &str) -> Result<StoredKeyring, DatabaseError> {
        let email = normalize_email(email);
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(KEYRINGS)?;

        match table.get(email.as_str())? {
            Some(data) => Ok(rmp_serde::from_slice(data.value())?),
            None => Ok(StoredKeyring::default()),
        }
    }

    /// Read-modify-write of one user's keyring inside a single write transaction.
    pub fn update_keyring<F, R>(&self, email: &str, update: F) -> Result<R, DatabaseError>
    where
        F: FnOnce(&mut StoredKeyring) -> R,
    {
        let email = normalize_email(email);
        let write_txn = self.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(KEYRINGS)?;
            let mut keyring: StoredKeyring = match table.get(email.as_str())? {
                Some(data) => rmp_serde::from_slice(data.value())?,
                None => StoredKeyring::default(),
            };

            let result = update(&mut keyring);

            let data = rmp_serde::to_vec_named(&keyring)?;
            table.insert(email.as_str(), data.as_slice())?;
            result
        };
        write_txn.commit()?;
        Ok(result)
    }

    /// Drop a collection's key from every persisted keyring. Returns how many
    /// keyrings held it.
    pub fn remove_key_everywhere(&self, collection_id: &str) -> Result<usize, DatabaseError> {
        let write_txn = self.begin_write()?;
        let mut removed = 0;
        {
            let table = write_txn.open_table(KEYRINGS)?;
            let mut holders: Vec<(String, StoredKeyring)> = Vec::new();
            for result in table.iter()? {
                let (key, value) = result?;
                let keyring: StoredKeyring = rmp_serde::from_slice(value.value())?;
                if keyring.contains(collection_id) {
                    holders.push((key.value().to_string(), keyring));
                }
            }
            drop(table);

            let mut table = write_txn.open_table(KEYRINGS)?;
            for (email, mut keyring) in holders {
                keyring.keys.remove(collection_id);
                let data = rmp_serde::to_vec_named(&keyring)?;
                table.insert(email.as_str(), data.as_slice())?;
                removed += 1;
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }

    // ========================================================================
    // Permissions
    // ========================================================================

    pub fn put_permissions(
        &self,
        email: &str,
        permissions: &PermissionRecord,
    ) -> Result<(), DatabaseError> {
        let email = normalize_email(email);
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(PERMISSIONS)?;
            let data = rmp_serde::to_vec_named(permissions)?;
            table.insert(email.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Permissions for `email`; users without a record have none.
    pub fn get_permissions(&self, email: &str) -> Result<PermissionRecord, DatabaseError> {
        let email = normalize_email(email);
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PERMISSIONS)?;

        match table.get(email.as_str())? {
            Some(data) => Ok(rmp_serde::from_slice(data.value())?),
            None => Ok(PermissionRecord::default()),
        }
    }
}
