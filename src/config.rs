//! Host configuration and runtime options.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DEFAULT_WORKER_COUNT: usize = 2;
pub const DEFAULT_POOL_NAME: &str = "sqlbridge";

/// Numeric log level mirrored from the host: 0 none, 1 sql, 2 verbose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum LogLevel {
    #[default]
    None,
    Sql,
    Verbose,
}

impl LogLevel {
    pub fn has_sql(self) -> bool {
        self >= Self::Sql
    }

    pub fn has_verbose(self) -> bool {
        self >= Self::Verbose
    }
}

impl From<LogLevel> for u8 {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::None => 0,
            LogLevel::Sql => 1,
            LogLevel::Verbose => 2,
        }
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Sql),
            2 => Ok(Self::Verbose),
            other => Err(format!("unsupported log level: {other}")),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "0" | "none" => Ok(Self::None),
            "1" | "sql" => Ok(Self::Sql),
            "2" | "verbose" => Ok(Self::Verbose),
            other => Err(format!("unsupported log level: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub write_ahead_logging: bool,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub databases_path: Option<PathBuf>,
    #[serde(default = "default_pool_name")]
    pub pool_name: String,
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

fn default_pool_name() -> String {
    DEFAULT_POOL_NAME.to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            write_ahead_logging: false,
            log_level: LogLevel::None,
            databases_path: None,
            pool_name: default_pool_name(),
        }
    }
}

impl BridgeConfig {
    /// Build a config from `SQLBRIDGE_*` environment variables, loading a
    /// `.env` file first when one exists.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Some(raw) = env_value("SQLBRIDGE_WORKERS") {
            match raw.parse::<usize>() {
                Ok(count) if count > 0 => config.worker_count = count,
                _ => tracing::warn!("ignoring invalid SQLBRIDGE_WORKERS value: {raw}"),
            }
        }
        if let Some(raw) = env_value("SQLBRIDGE_WAL_ENABLED") {
            config.write_ahead_logging = matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(raw) = env_value("SQLBRIDGE_LOG_LEVEL") {
            match raw.parse::<LogLevel>() {
                Ok(level) => config.log_level = level,
                Err(e) => tracing::warn!("ignoring SQLBRIDGE_LOG_LEVEL: {e}"),
            }
        }
        if let Some(raw) = env_value("SQLBRIDGE_DATABASES_PATH") {
            config.databases_path = Some(PathBuf::from(raw));
        }
        config
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Options that callers can change at runtime through the `options` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    pub query_as_map_list: bool,
    pub log_level: LogLevel,
    pub thread_priority: Option<i32>,
    pub thread_count: usize,
}

impl Options {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            query_as_map_list: false,
            log_level: config.log_level,
            thread_priority: None,
            thread_count: config.worker_count.max(1),
        }
    }
}

/// Platform default directory for database files.
pub fn default_databases_path() -> PathBuf {
    if let Some(path) = env_value("SQLBRIDGE_DATABASES_PATH") {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(app_data) = std::env::var("APPDATA") {
            return PathBuf::from(app_data).join("sqlbridge").join("databases");
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".sqlbridge").join("databases");
    }

    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".sqlbridge").join("databases");
    }

    PathBuf::from("databases")
}
