use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{CryptoError, SealedIdentity, SealedKey};

/// Emails are compared case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A registered user stored in redb
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub email: String,
    pub name: String,
    pub identity: SealedIdentity,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Create a user with a fresh key pair sealed under `password`.
    pub fn new(
        email: &str,
        name: &str,
        password: &str,
        kdf_iterations: u32,
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            email: normalize_email(email),
            name: name.to_string(),
            identity: SealedIdentity::generate(password, kdf_iterations)?,
            created_at: Utc::now(),
        })
    }
}

/// A user's persisted keyring: collection id -> key sealed to the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredKeyring {
    #[serde(default)]
    pub keys: BTreeMap<String, SealedKey>,
}

impl StoredKeyring {
    pub fn contains(&self, collection_id: &str) -> bool {
        self.keys.contains_key(collection_id)
    }
}

/// What a user may do. Team ids match `CollectionDescription::teams`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    #[serde(default)]
    pub administrator: bool,
    #[serde(default)]
    pub editor: bool,
    #[serde(default)]
    pub teams: BTreeSet<String>,
}

impl PermissionRecord {
    pub fn administrator() -> Self {
        Self {
            administrator: true,
            editor: true,
            teams: BTreeSet::new(),
        }
    }

    pub fn editor() -> Self {
        Self {
            editor: true,
            ..Default::default()
        }
    }

    pub fn viewer<I, S>(teams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            teams: teams.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}
