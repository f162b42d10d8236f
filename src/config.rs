//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Connection settings for the Listmonk instance.
#[derive(Debug, Clone)]
pub struct ListmonkConfig {
    /// Base URL, e.g. `https://lists.example.com`.
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Per-request timeout. `None` leaves the transport default in place.
    pub timeout: Option<Duration>,
}

/// Worker pool settings for the persistent task queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of tasks executing at once.
    pub concurrency: usize,
    /// How often idle workers look for due tasks.
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Process-wide configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listmonk: ListmonkConfig,
    pub queue: QueueConfig,
    pub port: u16,
    pub database_path: PathBuf,
    /// Browser origin allowed by CORS; also the base of public webhook URLs.
    pub frontend_url: Option<String>,
    /// Reject signatures older than this. `None` disables the check.
    pub webhook_max_age: Option<Duration>,
    pub stats_cache_ttl: Duration,
    /// Directory for daily rolling log files.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_url = get("LISTMONK_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("LISTMONK_URL".into()))?
            .trim_end_matches('/')
            .to_string();

        let listmonk = ListmonkConfig {
            base_url,
            username: get("LISTMONK_USERNAME"),
            password: get("LISTMONK_PASSWORD").map(SecretString::from),
            timeout: parse_opt::<u64>(&get, "LISTMONK_TIMEOUT_SECS")?.map(Duration::from_secs),
        };

        let defaults = QueueConfig::default();
        let concurrency =
            parse_opt::<usize>(&get, "WORKER_CONCURRENCY")?.unwrap_or(defaults.concurrency);
        if concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WORKER_CONCURRENCY".into(),
                message: "must be at least 1".into(),
            });
        }
        let queue = QueueConfig {
            concurrency,
            poll_interval: parse_opt::<u64>(&get, "QUEUE_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        };

        Ok(Self {
            listmonk,
            queue,
            port: parse_opt::<u16>(&get, "PORT")?.unwrap_or(8080),
            database_path: get("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/connector.db")),
            frontend_url: get("FRONTEND_URL").map(|u| u.trim_end_matches('/').to_string()),
            webhook_max_age: parse_opt::<u64>(&get, "WEBHOOK_MAX_AGE_SECS")?
                .map(Duration::from_secs),
            stats_cache_ttl: Duration::from_secs(
                parse_opt::<u64>(&get, "STATS_CACHE_TTL_SECS")?.unwrap_or(300),
            ),
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_opt<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}
