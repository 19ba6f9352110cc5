//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use projections::DEFAULT_MAX_CONFLICT_RETRIES;
use read_model::DEFAULT_PAGE_SIZE;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
/// - `DATABASE_URL` — PostgreSQL connection string; unset selects the
///   in-memory store
/// - `DATABASE_MAX_CONNECTIONS` — pool size (default: `5`)
/// - `DEFAULT_PAGE_SIZE` — page size for queries without a limit (default: `20`)
/// - `MAX_CONFLICT_RETRIES` — commit retries per event (default: `8`)
/// - `PROJECTION_TIMEOUT_MS` — deadline for handling one event (default: `5000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub default_page_size: u32,
    pub max_conflict_retries: u32,
    pub projection_timeout: Duration,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: env_or("LOG_FORMAT", defaults.log_format),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            database_max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            default_page_size: env_or("DEFAULT_PAGE_SIZE", defaults.default_page_size),
            max_conflict_retries: env_or("MAX_CONFLICT_RETRIES", defaults.max_conflict_retries),
            projection_timeout: Duration::from_millis(env_or(
                "PROJECTION_TIMEOUT_MS",
                defaults.projection_timeout.as_millis() as u64,
            )),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 5,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            projection_timeout: Duration::from_millis(5000),
        }
    }
}
