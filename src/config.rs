//! Runtime configuration: which record store to talk to and how.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{AppError, AppResult};
use crate::fetch::DEFAULT_PAGE_SIZE;
use crate::session::{RestAuth, SessionProvider, StaticSession};
use crate::store::{MemoryStore, RecordStore, RestStore, SqliteStore};

pub const ENV_BACKEND: &str = "PIPADMIN_BACKEND";
pub const ENV_DB_PATH: &str = "PIPADMIN_DB_PATH";
pub const ENV_PAGE_SIZE: &str = "PIPADMIN_PAGE_SIZE";
pub const ENV_HTTP_TIMEOUT: &str = "PIPADMIN_HTTP_TIMEOUT_SECS";
pub const ENV_LOG_DIR: &str = "PIPADMIN_LOG_DIR";
pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_KEY: &str = "SUPABASE_ANON_KEY";

/// The hosted backend never returns more than this many rows per request.
pub const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown backend `{0}` (expected rest, sqlite or memory)")]
    UnknownBackend(String),
    #[error("{name} must be a whole number, got `{value}`")]
    NotANumber { name: &'static str, value: String },
    #[error("page size must be between 1 and {max}, got {0}", max = MAX_PAGE_SIZE)]
    PageSize(usize),
    #[error("HTTP timeout must be greater than 0")]
    ZeroTimeout,
    #[error("the rest backend needs {0}")]
    Missing(&'static str),
    #[error("supabase url must start with http:// or https://, got `{0}`")]
    BadUrl(String),
    #[error("cannot read config file {path}: {message}")]
    File { path: String, message: String },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::UnknownBackend(_) => "CONFIG/BACKEND",
            ConfigError::NotANumber { .. } => "CONFIG/NUMBER",
            ConfigError::PageSize(_) => "CONFIG/PAGE_SIZE",
            ConfigError::ZeroTimeout => "CONFIG/TIMEOUT",
            ConfigError::Missing(_) => "CONFIG/MISSING",
            ConfigError::BadUrl(_) => "CONFIG/URL",
            ConfigError::File { .. } => "CONFIG/FILE",
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::new(err.code(), err.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Rest,
    Sqlite,
    Memory,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rest" | "supabase" => Ok(Backend::Rest),
            "sqlite" => Ok(Backend::Sqlite),
            "memory" => Ok(Backend::Memory),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Rest => "rest",
            Backend::Sqlite => "sqlite",
            Backend::Memory => "memory",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: Backend,
    /// SQLite file for the `sqlite` backend. Defaults under the user data dir.
    pub db_path: Option<PathBuf>,
    pub page_size: usize,
    pub http_timeout_secs: u64,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            db_path: None,
            page_size: DEFAULT_PAGE_SIZE,
            http_timeout_secs: 30,
            supabase_url: None,
            supabase_anon_key: None,
            log_dir: None,
        }
    }
}

fn parse_number<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::NotANumber {
        name,
        value: value.to_string(),
    })
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from a key lookup. Unset and blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();
        if let Some(raw) = get(ENV_BACKEND) {
            config.backend = raw.parse()?;
        }
        if let Some(raw) = get(ENV_DB_PATH) {
            config.db_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = get(ENV_PAGE_SIZE) {
            config.page_size = parse_number(ENV_PAGE_SIZE, &raw)?;
        }
        if let Some(raw) = get(ENV_HTTP_TIMEOUT) {
            config.http_timeout_secs = parse_number(ENV_HTTP_TIMEOUT, &raw)?;
        }
        if let Some(raw) = get(ENV_LOG_DIR) {
            config.log_dir = Some(PathBuf::from(raw));
        }
        config.supabase_url = get(ENV_SUPABASE_URL);
        config.supabase_anon_key = get(ENV_SUPABASE_KEY);
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |message: String| ConfigError::File {
            path: path.display().to_string(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| file_error(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::PageSize(self.page_size));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.backend == Backend::Rest {
            let url = self
                .supabase_url
                .as_deref()
                .ok_or(ConfigError::Missing(ENV_SUPABASE_URL))?;
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::BadUrl(url.to_string()));
            }
            if self.supabase_anon_key.is_none() {
                return Err(ConfigError::Missing(ENV_SUPABASE_KEY));
            }
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("pipadmin")
                .join("pipadmin.sqlite3")
        })
    }

    /// Connect the configured store and its matching session provider.
    pub async fn connect(&self) -> AppResult<Connection> {
        self.validate()?;
        match self.backend {
            Backend::Rest => {
                let url = self.supabase_url.as_deref().unwrap_or_default();
                let key = self.supabase_anon_key.as_deref().unwrap_or_default();
                let store = Arc::new(RestStore::new(url, key, self.http_timeout())?);
                let auth = RestAuth::new(url, key, self.http_timeout())?.with_store(store.clone());
                Ok(Connection {
                    store,
                    session: Arc::new(auth),
                })
            }
            Backend::Sqlite => {
                let pool = crate::db::open_sqlite_pool(&self.resolved_db_path()).await?;
                Ok(Connection {
                    store: Arc::new(SqliteStore::new(pool)),
                    session: Arc::new(StaticSession::new()),
                })
            }
            Backend::Memory => Ok(Connection {
                store: Arc::new(MemoryStore::new()),
                session: Arc::new(StaticSession::new()),
            }),
        }
    }
}

/// A connected store plus the session provider that goes with it.
#[derive(Clone)]
pub struct Connection {
    pub store: Arc<dyn RecordStore>,
    pub session: Arc<dyn SessionProvider>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn memory_backend_needs_nothing_else() {
        let config = AppConfig::from_lookup(lookup(&[(ENV_BACKEND, "Memory")])).expect("config");
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.page_size, 1000);
    }

    #[test]
    fn rest_backend_requires_url_and_key() {
        let err = AppConfig::from_lookup(lookup(&[])).expect_err("url missing");
        assert_eq!(err, ConfigError::Missing(ENV_SUPABASE_URL));
        let err = AppConfig::from_lookup(lookup(&[(ENV_SUPABASE_URL, "db.example")]))
            .expect_err("scheme");
        assert_eq!(err.code(), "CONFIG/URL");
        let config = AppConfig::from_lookup(lookup(&[
            (ENV_SUPABASE_URL, "https://abc.supabase.co"),
            (ENV_SUPABASE_KEY, "anon"),
            (ENV_HTTP_TIMEOUT, "5"),
        ]))
        .expect("config");
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn page_size_is_bounded_by_backend_cap() {
        let err = AppConfig::from_lookup(lookup(&[(ENV_BACKEND, "sqlite"), (ENV_PAGE_SIZE, "5000")]))
            .expect_err("too large");
        assert_eq!(err, ConfigError::PageSize(5000));
        let err = AppConfig::from_lookup(lookup(&[(ENV_BACKEND, "sqlite"), (ENV_PAGE_SIZE, "ten")]))
            .expect_err("text");
        assert!(matches!(err, ConfigError::NotANumber { .. }));
        let app: AppError = err.into();
        assert_eq!(app.code(), "CONFIG/NUMBER");
    }
}
