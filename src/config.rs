use std::time::Duration;

use thiserror::Error;

use crate::crypto::DEFAULT_KDF_ITERATIONS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub approval: ApprovalConfig,
    pub collaborators: CollaboratorConfig,
    /// Maximum content upload size in bytes
    pub max_upload_size: u64,
    pub session_timeout_minutes: i64,
    /// PBKDF2 rounds for newly created user identities
    pub kdf_iterations: u32,
    pub scheduler_interval_secs: u64,
    pub admin: Option<AdminConfig>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// redb database directory
    pub data_dir: String,
    /// Collection working trees
    pub collections_path: String,
    /// Published content
    pub content_path: String,
}

#[derive(Debug, Clone)]
pub struct ApprovalConfig {
    pub queue_capacity: usize,
    pub step_timeout_secs: u64,
    /// Directory names whose reviewed subtrees are zipped at approval
    pub archive_dirs: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CollaboratorConfig {
    pub renderer_url: Option<String>,
    pub notification_urls: Vec<String>,
}

#[derive(Clone)]
pub struct AdminConfig {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("email", &self.email)
            .field("password", &"..")
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            collections_path: "./collections".to_string(),
            content_path: "./content".to_string(),
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            step_timeout_secs: 300,
            archive_dirs: vec!["timeseries".to_string()],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            approval: ApprovalConfig::default(),
            collaborators: CollaboratorConfig::default(),
            max_upload_size: 50 * 1024 * 1024, // 50MB
            session_timeout_minutes: 60,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            scheduler_interval_secs: 30,
            admin: None,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or(defaults.server.bind_address);

        let storage = StorageConfig {
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.storage.data_dir),
            collections_path: std::env::var("COLLECTIONS_PATH")
                .unwrap_or(defaults.storage.collections_path),
            content_path: std::env::var("CONTENT_PATH").unwrap_or(defaults.storage.content_path),
        };

        let approval = ApprovalConfig {
            queue_capacity: env_or("APPROVAL_QUEUE_CAPACITY", defaults.approval.queue_capacity),
            step_timeout_secs: env_or(
                "APPROVAL_STEP_TIMEOUT_SECS",
                defaults.approval.step_timeout_secs,
            ),
            archive_dirs: env_list("ARCHIVE_DIRS").unwrap_or(defaults.approval.archive_dirs),
        };

        let collaborators = CollaboratorConfig {
            renderer_url: std::env::var("RENDERER_URL").ok().filter(|s| !s.trim().is_empty()),
            notification_urls: env_list("NOTIFICATION_URLS").unwrap_or_default(),
        };

        let admin = match (std::env::var("ADMIN_EMAIL"), std::env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) => Some(AdminConfig { email, password }),
            (Err(_), Err(_)) => None,
            _ => {
                return Err(ConfigError::ValidationError(
                    "ADMIN_EMAIL and ADMIN_PASSWORD must be set together".to_string(),
                ))
            }
        };

        let config = Config {
            server: ServerConfig { bind_address },
            storage,
            approval,
            collaborators,
            max_upload_size: env_or("MAX_UPLOAD_SIZE", defaults.max_upload_size),
            session_timeout_minutes: env_or(
                "SESSION_TIMEOUT_MINUTES",
                defaults.session_timeout_minutes,
            ),
            kdf_iterations: env_or("KDF_ITERATIONS", defaults.kdf_iterations),
            scheduler_interval_secs: env_or(
                "SCHEDULER_INTERVAL_SECS",
                defaults.scheduler_interval_secs,
            ),
            admin,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.approval.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "APPROVAL_QUEUE_CAPACITY must be greater than zero".to_string(),
            ));
        }

        if self.approval.step_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "APPROVAL_STEP_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        if self.session_timeout_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "SESSION_TIMEOUT_MINUTES must be greater than zero".to_string(),
            ));
        }

        if self.kdf_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "KDF_ITERATIONS must be greater than zero".to_string(),
            ));
        }

        if self.scheduler_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "SCHEDULER_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        if let Some(admin) = &self.admin {
            if admin.email.trim().is_empty() || admin.password.is_empty() {
                return Err(ConfigError::ValidationError(
                    "ADMIN_EMAIL and ADMIN_PASSWORD cannot be empty".to_string(),
                ));
            }
        }

        if self.storage.collections_path == self.storage.content_path {
            return Err(ConfigError::ValidationError(
                "COLLECTIONS_PATH and CONTENT_PATH must differ".to_string(),
            ));
        }

        if self.kdf_iterations < DEFAULT_KDF_ITERATIONS {
            tracing::warn!(
                "KDF_ITERATIONS is {}, below the recommended {}.",
                self.kdf_iterations,
                DEFAULT_KDF_ITERATIONS
            );
        }

        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.approval.step_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut config = Config::default();
        config.approval.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn shared_paths_rejected() {
        let mut config = Config::default();
        config.storage.content_path = config.storage.collections_path.clone();
        assert!(config.validate().is_err());
    }
}
