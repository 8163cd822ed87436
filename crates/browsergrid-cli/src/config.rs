//! Process configuration, read once at startup from the environment
//! variables in spec.md §6 (spec.md §9 "Global mutable state").

use std::env;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
const DEFAULT_CONNECTION_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_BROWSER_URL: &str = "chromium";
const DEFAULT_REDIS_DB: u32 = 0;
/// spec.md §5: "N task-worker threads per queue (configurable, default
/// small — 5–10)".
const DEFAULT_WORKER_CONCURRENCY: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Process-wide configuration, immutable once loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// `Some` selects the Postgres `MetadataStorePort` adapter; `None`
    /// falls back to the in-memory adapter (dev / `--store memory`
    /// equivalent, spec.md §9).
    pub database_url: Option<String>,
    /// `Some` selects the Redis `TaskBrokerPort` adapter; `None` falls
    /// back to the in-memory adapter.
    pub redis_addr: Option<String>,
    pub redis_password: Option<String>,
    pub redis_db: u32,
    pub api_key: Option<String>,
    /// The browser executable `LocalProcessDriver` spawns for
    /// `ProviderKind::Local` sessions.
    pub browser_url: String,
    pub max_message_size: usize,
    pub connection_timeout_seconds: u64,
    /// Number of concurrent task-worker threads spawned per queue
    /// (spec.md §5).
    pub worker_concurrency: u32,
}

impl Config {
    /// Loads configuration from the process environment, applying the
    /// defaults spec.md §9b calls for where the source leaves a value
    /// unspecified.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_env("PORT", DEFAULT_PORT)?;
        let max_message_size = parse_env("MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE)?;
        let connection_timeout_seconds = parse_env("CONNECTION_TIMEOUT_SECONDS", DEFAULT_CONNECTION_TIMEOUT_SECONDS)?;
        let redis_db = parse_env("REDIS_DB", DEFAULT_REDIS_DB)?;
        let worker_concurrency = parse_env("WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY)?;

        Ok(Self {
            port,
            database_url: non_empty_env("DATABASE_URL"),
            redis_addr: non_empty_env("REDIS_ADDR"),
            redis_password: non_empty_env("REDIS_PASSWORD"),
            redis_db,
            api_key: non_empty_env("BROWSERGRID_API_KEY").or_else(|| non_empty_env("API_KEY")),
            browser_url: env::var("BROWSER_URL").unwrap_or_else(|_| DEFAULT_BROWSER_URL.to_string()),
            max_message_size,
            connection_timeout_seconds,
            worker_concurrency,
        })
    }

    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }

    /// Builds a `redis://` URL out of `redis_addr`/`redis_password`/
    /// `redis_db`, since `RedisBroker::connect` takes a single connection
    /// string but the env vars carry the parts separately (spec.md §6).
    #[must_use]
    pub fn redis_url(&self) -> Option<String> {
        let addr = self.redis_addr.as_ref()?;
        let addr = addr.strip_prefix("redis://").unwrap_or(addr);
        let auth = self
            .redis_password
            .as_ref()
            .map(|pw| format!(":{pw}@"))
            .unwrap_or_default();
        Some(format!("redis://{auth}{addr}/{}", self.redis_db))
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_combines_password_and_db() {
        let config = Config {
            port: 8080,
            database_url: None,
            redis_addr: Some("localhost:6379".into()),
            redis_password: Some("hunter2".into()),
            redis_db: 3,
            api_key: None,
            browser_url: DEFAULT_BROWSER_URL.into(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            connection_timeout_seconds: DEFAULT_CONNECTION_TIMEOUT_SECONDS,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
        };
        assert_eq!(config.redis_url().as_deref(), Some("redis://:hunter2@localhost:6379/3"));
    }

    #[test]
    fn redis_url_omits_auth_segment_without_password() {
        let config = Config {
            port: 8080,
            database_url: None,
            redis_addr: Some("localhost:6379".into()),
            redis_password: None,
            redis_db: 0,
            api_key: None,
            browser_url: DEFAULT_BROWSER_URL.into(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            connection_timeout_seconds: DEFAULT_CONNECTION_TIMEOUT_SECONDS,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
        };
        assert_eq!(config.redis_url().as_deref(), Some("redis://localhost:6379/0"));
    }

    #[test]
    fn redis_url_is_none_without_redis_addr() {
        let config = Config {
            port: 8080,
            database_url: None,
            redis_addr: None,
            redis_password: None,
            redis_db: 0,
            api_key: None,
            browser_url: DEFAULT_BROWSER_URL.into(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            connection_timeout_seconds: DEFAULT_CONNECTION_TIMEOUT_SECONDS,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
        };
        assert!(config.redis_url().is_none());
    }
}
