//! Typed settings loaded from an optional file, then `CSA_`-prefixed
//! environment variables (`CSA_LOGGING__LEVEL=debug`).

use crate::sync::{RetryPolicy, SyncOptions};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "csa";
const DEFAULT_LOCAL_DIR: &str = "data";
const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_RETRY_INITIAL_MS: u64 = 1_000;
const DEFAULT_RETRY_MAX_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl SettingsError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub replication: RetryPolicy,
    pub logging: LoggingSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Directory holding the per-user local cache files.
    pub local_dir: PathBuf,
    pub remote_only: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    pub database: RawDatabaseSettings,
    pub replication: RawReplicationSettings,
    pub logging: RawLoggingSettings,
    pub http: RawHttpSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawDatabaseSettings {
    pub local_dir: Option<PathBuf>,
    pub remote_only: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawReplicationSettings {
    pub retry_initial_ms: Option<u64>,
    pub retry_max_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawLoggingSettings {
    pub level: Option<String>,
    pub json: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawHttpSettings {
    pub addr: Option<String>,
}

/// Loads `csa.{toml,json,...}` from the working directory if present, then
/// `config_file` when given, then the environment.
pub fn load(config_file: Option<&Path>) -> Result<Settings, SettingsError> {
    let mut builder =
        Config::builder().add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false));
    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix("CSA")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

impl Settings {
    pub fn from_raw(raw: RawSettings) -> Result<Self, SettingsError> {
        Ok(Self {
            database: DatabaseSettings {
                local_dir: raw
                    .database
                    .local_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_DIR)),
                remote_only: raw.database.remote_only.unwrap_or(false),
            },
            replication: build_retry_policy(raw.replication)?,
            logging: build_logging_settings(raw.logging)?,
            http: build_http_settings(raw.http)?,
        })
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            remote_only: self.database.remote_only,
            retry: self.replication,
        }
    }
}

fn build_retry_policy(raw: RawReplicationSettings) -> Result<RetryPolicy, SettingsError> {
    let initial = raw.retry_initial_ms.unwrap_or(DEFAULT_RETRY_INITIAL_MS);
    let max = raw.retry_max_ms.unwrap_or(DEFAULT_RETRY_MAX_MS.max(initial));
    if initial == 0 {
        return Err(SettingsError::invalid(
            "replication.retry_initial_ms",
            "must be positive",
        ));
    }
    if max < initial {
        return Err(SettingsError::invalid(
            "replication.retry_max_ms",
            format!("{max} is below retry_initial_ms {initial}"),
        ));
    }
    Ok(RetryPolicy {
        initial: Duration::from_millis(initial),
        max: Duration::from_millis(max),
    })
}

fn build_logging_settings(raw: RawLoggingSettings) -> Result<LoggingSettings, SettingsError> {
    let level = match raw.level {
        Some(level) => LevelFilter::from_str(level.trim()).map_err(|err| {
            SettingsError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };
    let format = if raw.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    Ok(LoggingSettings { level, format })
}

fn build_http_settings(raw: RawHttpSettings) -> Result<HttpSettings, SettingsError> {
    let addr = raw.addr.as_deref().unwrap_or(DEFAULT_HTTP_ADDR);
    let addr = addr
        .parse()
        .map_err(|err| SettingsError::invalid("http.addr", format!("'{addr}': {err}")))?;
    Ok(HttpSettings { addr })
}
