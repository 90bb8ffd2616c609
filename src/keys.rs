//! Collection key distribution.
//!
//! Each user holds a persisted keyring of collection keys sealed to their
//! identity. While a session is live its keyring is also held decrypted in the
//! [`KeyringCache`], so access changes apply without logging in again.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::collections::CollectionDescription;
use crate::crypto::{CollectionKey, SealedKey};
use crate::error::{ReleaseError, Result};
use crate::locks::KeyedLocks;
use crate::permissions::PermissionService;
use crate::sessions::{Session, Sessions};
use crate::storage::models::normalize_email;
use crate::storage::Database;

/// A decrypted keyring: collection id -> key.
pub type Keyring = HashMap<String, CollectionKey>;

/// Copy entries of `source` into `target`: those named in `collection_ids`, or
/// all of them.
pub fn transfer_keyring(target: &mut Keyring, source: &Keyring, collection_ids: Option<&[String]>) {
    match collection_ids {
        Some(ids) => {
            for id in ids {
                if let Some(key) = source.get(id) {
                    target.insert(id.clone(), key.clone());
                }
            }
        }
        None => {
            target.extend(source.iter().map(|(id, key)| (id.clone(), key.clone())));
        }
    }
}

/// Decrypted keyrings of live sessions, keyed by session id.
#[derive(Default)]
pub struct KeyringCache {
    keyrings: RwLock<HashMap<String, Keyring>>,
}

impl KeyringCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_key(&self, session_id: &str, collection_id: &str) -> Option<CollectionKey> {
        self.keyrings
            .read()
            .get(session_id)
            .and_then(|keyring| keyring.get(collection_id).cloned())
    }

    pub fn contains(&self, session_id: &str, collection_id: &str) -> bool {
        self.keyrings
            .read()
            .get(session_id)
            .is_some_and(|keyring| keyring.contains_key(collection_id))
    }

    /// Merge `keyring` into whatever the session already holds.
    pub fn install(&self, session_id: &str, keyring: &Keyring) {
        let mut keyrings = self.keyrings.write();
        let target = keyrings.entry(session_id.to_string()).or_default();
        transfer_keyring(target, keyring, None);
    }

    pub fn put_key(&self, session_id: &str, collection_id: &str, key: CollectionKey) {
        self.keyrings
            .write()
            .entry(session_id.to_string())
            .or_default()
            .insert(collection_id.to_string(), key);
    }

    pub fn remove_key(&self, session_id: &str, collection_id: &str) {
        if let Some(keyring) = self.keyrings.write().get_mut(session_id) {
            keyring.remove(collection_id);
        }
    }

    pub fn remove_key_everywhere(&self, collection_id: &str) {
        for keyring in self.keyrings.write().values_mut() {
            keyring.remove(collection_id);
        }
    }

    /// Discard a session's keyring at logout or expiry.
    pub fn remove(&self, session_id: &str) -> Option<Keyring> {
        self.keyrings.write().remove(session_id)
    }
}

pub struct KeyManager {
    db: Database,
    permissions: Arc<dyn PermissionService>,
    sessions: Arc<Sessions>,
    cache: Arc<KeyringCache>,
    user_locks: KeyedLocks,
}

impl KeyManager {
    pub fn new(
        db: Database,
        permissions: Arc<dyn PermissionService>,
        sessions: Arc<Sessions>,
        cache: Arc<KeyringCache>,
    ) -> Self {
        Self {
            db,
            permissions,
            sessions,
            cache,
            user_locks: KeyedLocks::new(),
        }
    }

    pub fn cache(&self) -> &KeyringCache {
        &self.cache
    }

    /// Authenticate `email` and decrypt their stored keyring.
    ///
    /// Entries that fail to open are skipped: they were sealed to an identity
    /// the user no longer has.
    pub fn open_keyring(&self, email: &str, password: &str) -> Result<Keyring> {
        let email = normalize_email(email);
        let user = self
            .db
            .get_user(&email)?
            .ok_or_else(|| ReleaseError::Unauthorized("invalid email or password".to_string()))?;
        let identity = user
            .identity
            .unlock(password)
            .map_err(|_| ReleaseError::Unauthorized("invalid email or password".to_string()))?;

        let stored = self.db.get_keyring(&email)?;
        let mut keyring = Keyring::with_capacity(stored.keys.len());
        for (collection_id, sealed) in &stored.keys {
            match identity.open_key(sealed) {
                Ok(key) => {
                    keyring.insert(collection_id.clone(), key);
                }
                Err(e) => {
                    tracing::warn!(email = %email, collection_id = %collection_id, error = %e, "Skipping unreadable keyring entry");
                }
            }
        }
        Ok(keyring)
    }

    /// Authenticate and open a session holding the user's decrypted keyring.
    ///
    /// The user's keyring lock is held from reading the stored keyring until
    /// the session's cache is populated, so a concurrent redistribution
    /// either lands in the stored keyring first or finds the live session.
    pub async fn start_session(&self, email: &str, password: &str) -> Result<Session> {
        let _guard = self.user_locks.lock(&normalize_email(email)).await;
        let keyring = self.open_keyring(email, password)?;
        let session = self.sessions.create(email)?;
        self.cache.install(&session.id, &keyring);
        Ok(session)
    }

    /// Populate a session's cached keyring from the user's stored one.
    pub async fn unlock_session(&self, session: &Session, password: &str) -> Result<()> {
        let _guard = self.user_locks.lock(&session.email).await;
        let keyring = self.open_keyring(&session.email, password)?;
        self.cache.install(&session.id, &keyring);
        tracing::debug!(email = %session.email, keys = keyring.len(), "Session keyring unlocked");
        Ok(())
    }

    /// Generate the key for a new collection, hand it to the creator's session
    /// and distribute it.
    pub async fn assign_new_key(&self, session: &Session, collection: &CollectionDescription) -> Result<CollectionKey> {
        let key = CollectionKey::generate()?;
        self.cache.put_key(&session.id, &collection.id, key.clone());
        self.distribute_collection_key(session, collection).await?;
        Ok(key)
    }

    /// Give the collection key to every user who should hold it and take it
    /// from everyone else, in stored keyrings and live sessions alike.
    pub async fn distribute_collection_key(&self, session: &Session, collection: &CollectionDescription) -> Result<()> {
        let key = self.cache.get_key(&session.id, &collection.id).ok_or_else(|| {
            ReleaseError::Unauthorized(format!(
                "{} does not hold the key for collection {}",
                session.email, collection.id
            ))
        })?;

        let mut granted = 0;
        let mut revoked = 0;
        for user in self.db.list_users()? {
            let should_have = self.permissions.is_administrator(&user.email)
                || self.permissions.can_view(&user.email, collection);
            let sealed: Option<SealedKey> = match should_have {
                true => Some(user.identity.seal_key(&key)?),
                false => None,
            };

            let _guard = self.user_locks.lock(&user.email).await;
            self.db.update_keyring(&user.email, |keyring| match sealed {
                Some(sealed) => {
                    keyring.keys.insert(collection.id.clone(), sealed);
                }
                None => {
                    keyring.keys.remove(&collection.id);
                }
            })?;

            for live in self.sessions.active_for(&user.email) {
                if should_have {
                    self.cache.put_key(&live.id, &collection.id, key.clone());
                } else {
                    self.cache.remove_key(&live.id, &collection.id);
                }
            }

            if should_have {
                granted += 1;
            } else {
                revoked += 1;
            }
        }

        tracing::info!(
            collection_id = %collection.id,
            granted,
            revoked,
            "Collection key distributed"
        );
        Ok(())
    }

    /// Remove a collection's key from every keyring, stored and cached.
    pub fn revoke_collection_key(&self, collection_id: &str) -> Result<usize> {
        let removed = self.db.remove_key_everywhere(collection_id)?;
        self.cache.remove_key_everywhere(collection_id);
        tracing::info!(collection_id, keyrings = removed, "Collection key revoked");
        Ok(removed)
    }

    /// Drop expired sessions together with their cached keyrings.
    pub fn expire_sessions(&self) -> usize {
        let expired = self.sessions.expire();
        for session in &expired {
            self.cache.remove(&session.id);
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "Expired sessions removed");
        }
        expired.len()
    }

    /// Log out: forget the session and its decrypted keyring.
    pub fn end_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
        self.cache.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_subset_or_all() {
        let a = CollectionKey::generate().unwrap();
        let b = CollectionKey::generate().unwrap();
        let source: Keyring = [("a".to_string(), a.clone()), ("b".to_string(), b.clone())]
            .into_iter()
            .collect();

        let mut subset = Keyring::new();
        transfer_keyring(&mut subset, &source, Some(&["b".to_string(), "missing".to_string()]));
        assert_eq!(subset.len(), 1);
        assert_eq!(subset.get("b"), Some(&b));

        let mut all = Keyring::new();
        transfer_keyring(&mut all, &source, None);
        assert_eq!(all, source);
    }

    #[test]
    fn cache_tracks_sessions() {
        let cache = KeyringCache::new();
        let key = CollectionKey::generate().unwrap();
        cache.put_key("s1", "c1", key.clone());
        cache.put_key("s2", "c1", key.clone());
        assert_eq!(cache.get_key("s1", "c1"), Some(key));

        cache.remove_key("s1", "c1");
        assert!(!cache.contains("s1", "c1"));
        assert!(cache.contains("s2", "c1"));

        cache.remove_key_everywhere("c1");
        assert!(!cache.contains("s2", "c1"));
        assert!(cache.remove("s2").is_some());
        assert!(cache.remove("s2").is_none());
    }

    #[tokio::test]
    async fn login_waits_for_pending_keyring_updates() {
        use crate::storage::models::PermissionRecord;
        use std::time::Duration;

        let temp = tempfile::TempDir::new().unwrap();
        let state = crate::testutil::test_state(&temp);
        state
            .register_user("editor@example.com", "Editor", "pw", &PermissionRecord::editor())
            .unwrap();

        let guard = state.keys.user_locks.lock("editor@example.com").await;
        let login = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.login("Editor@Example.com", "pw").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!login.is_finished());
        assert!(state.sessions.active_for("editor@example.com").is_empty());

        drop(guard);
        let session = login.await.unwrap().unwrap();
        assert_eq!(session.email, "editor@example.com");
        assert_eq!(state.sessions.active_for("editor@example.com").len(), 1);
    }
}
