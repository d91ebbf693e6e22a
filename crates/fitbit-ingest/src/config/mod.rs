//! Configuration for the ingestion pipeline
//!
//! Loaded from a TOML file (default `~/.config/fitbit-ingest/config.toml`),
//! then overridden by `FITBIT_INGEST_*` environment variables. The default
//! start date is deliberately a required field: falling back to "now" on a
//! fresh environment would silently skip the whole dataset.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;

use crate::error::{IngestError, Result};

/// Default configuration directory name
const CONFIG_DIR_NAME: &str = "fitbit-ingest";

/// Get the configuration directory path
/// Returns ~/.config/fitbit-ingest on Unix, ~/Library/Application Support/fitbit-ingest on macOS
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join(CONFIG_DIR_NAME))
        .ok_or_else(|| IngestError::config("Could not determine config directory"))
}

/// Get the data directory path for the embedded database and watermark files
/// Returns ~/.local/share/fitbit-ingest on Unix, ~/Library/Application Support/fitbit-ingest on macOS
pub fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|p| p.join(CONFIG_DIR_NAME))
        .ok_or_else(|| IngestError::config("Could not determine data directory"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &PathBuf) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Which storage backend receives the normalized records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Influx,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Sqlite => f.write_str("sqlite"),
            BackendKind::Influx => f.write_str("influx"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Directory holding the per-(metric, user) source documents
    pub data_dir: PathBuf,

    /// Directory holding the plain-text watermark files
    pub watermark_dir: PathBuf,

    /// Watermark value assumed when neither port has one (required)
    pub default_start_date: NaiveDate,

    /// Last day catch-up and follow modes will process (inclusive)
    pub horizon_date: NaiveDate,

    /// Sleep between passes in follow mode
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Users known to the dataset
    #[serde(default = "default_users")]
    pub users: Vec<String>,

    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    #[serde(default)]
    pub sqlite: Option<SqliteConfig>,

    #[serde(default)]
    pub influx: Option<InfluxConfig>,
}

fn default_poll_interval() -> u64 {
    300
}

fn default_users() -> Vec<String> {
    vec!["1".to_string(), "2".to_string()]
}

fn default_backend() -> BackendKind {
    BackendKind::Sqlite
}

impl IngestConfig {
    /// Load from the given path, or the default config location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_dir()?.join("config.toml"),
        };
        let raw = fs::read_to_string(&path).map_err(|e| {
            IngestError::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&raw)
            .map_err(|e| IngestError::config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Environment overrides, applied after the file is parsed
    fn apply_env(&mut self) {
        if let Ok(v) = env::var("FITBIT_INGEST_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("FITBIT_INGEST_WATERMARK_DIR") {
            self.watermark_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("FITBIT_INGEST_BACKEND") {
            match v.as_str() {
                "sqlite" => self.backend = BackendKind::Sqlite,
                "influx" => self.backend = BackendKind::Influx,
                other => log::warn!("Ignoring unknown FITBIT_INGEST_BACKEND: {}", other),
            }
        }
        if let Ok(v) = env::var("FITBIT_INGEST_SQLITE_PATH") {
            self.sqlite = Some(SqliteConfig { path: PathBuf::from(v) });
        }
        if let Ok(url) = env::var("FITBIT_INGEST_INFLUX_URL") {
            let base = self.influx.take();
            self.influx = Some(InfluxConfig {
                url,
                token: env::var("FITBIT_INGEST_INFLUX_TOKEN")
                    .ok()
                    .or(base.as_ref().map(|c| c.token.clone()))
                    .unwrap_or_default(),
                org: env::var("FITBIT_INGEST_INFLUX_ORG")
                    .ok()
                    .or(base.as_ref().map(|c| c.org.clone()))
                    .unwrap_or_default(),
                bucket: env::var("FITBIT_INGEST_INFLUX_BUCKET")
                    .ok()
                    .or(base.as_ref().map(|c| c.bucket.clone()))
                    .unwrap_or_default(),
            });
        }
    }

    /// Default watermark as a timestamp (midnight of the configured date)
    pub fn default_start(&self) -> NaiveDateTime {
        self.default_start_date.and_time(NaiveTime::MIN)
    }

    /// SQLite database location, falling back to the standard data directory
    pub fn sqlite_path(&self) -> Result<PathBuf> {
        match &self.sqlite {
            Some(c) => Ok(c.path.clone()),
            None => Ok(data_dir()?.join("metrics.db")),
        }
    }

    /// Influx connection settings; required when the influx backend is active
    pub fn influx(&self) -> Result<&InfluxConfig> {
        self.influx
            .as_ref()
            .ok_or_else(|| IngestError::config("backend = \"influx\" requires an [influx] section"))
    }
}
