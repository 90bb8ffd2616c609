use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::crypto::{random_token, CryptoError};
use crate::storage::models::normalize_email;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub email: String,
    pub started: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

/// In-memory session table with a sliding expiry.
pub struct Sessions {
    sessions: RwLock<HashMap<String, Session>>,
    timeout: Duration,
}

impl Sessions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub fn create(&self, email: &str) -> Result<Session, CryptoError> {
        let now = Utc::now();
        let session = Session {
            id: random_token()?,
            email: normalize_email(email),
            started: now,
            last_access: now,
        };
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    /// Resolve a token, refreshing its expiry. Expired sessions resolve to `None`
    /// and are left for [`Sessions::expire`] to collect.
    pub fn get(&self, token: &str) -> Option<Session> {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(token)?;
        if now - session.last_access > self.timeout {
            return None;
        }
        session.last_access = now;
        Some(session.clone())
    }

    pub fn remove(&self, token: &str) -> Option<Session> {
        self.sessions.write().remove(token)
    }

    /// Live sessions belonging to `email`.
    pub fn active_for(&self, email: &str) -> Vec<Session> {
        let email = normalize_email(email);
        let now = Utc::now();
        self.sessions
            .read()
            .values()
            .filter(|s| s.email == email && now - s.last_access <= self.timeout)
            .cloned()
            .collect()
    }

    /// Remove and return every expired session.
    pub fn expire(&self) -> Vec<Session> {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| now - s.last_access > self.timeout)
            .map(|s| s.id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| sessions.remove(id))
            .collect()
    }
}
