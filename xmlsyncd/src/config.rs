use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DRIVE_FOLDER: &str = "Uploads_XML";
pub const DEFAULT_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 60;
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 2;

const CONFIG_DIR: &str = "xmlsync";
const CONFIG_FILENAME: &str = "config.json";
const LOG_SUBDIR: &str = "logs";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration directory is unavailable")]
    MissingConfigDir,
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("source directory is not set")]
    SourceDirUnset,
    #[error("source directory does not exist: {0}")]
    SourceDirMissing(PathBuf),
    #[error("source path is not a directory: {0}")]
    SourceNotDirectory(PathBuf),
    #[error("source directory is not readable: {path}: {source}")]
    SourceDirUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("destination folder name is empty")]
    EmptyFolderName,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenBackend {
    #[default]
    File,
    Keyring,
}

/// Settings for one synchronization pass. Keys mirror the on-disk document;
/// anything missing falls back to [`SyncConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(rename = "credentials_file")]
    pub credentials_path: PathBuf,
    #[serde(rename = "source_directory")]
    pub source_dir: PathBuf,
    #[serde(rename = "drive_folder")]
    pub destination_folder: String,
    #[serde(rename = "update_interval")]
    pub interval_secs: u64,
    #[serde(rename = "retry_backoff")]
    pub retry_backoff_secs: u64,
    pub upload_concurrency: usize,
    pub auto_start: bool,
    pub token_backend: TokenBackend,
    /// Directory for the rotating log file; empty means the state dir.
    #[serde(rename = "log_directory")]
    pub log_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::new(),
            source_dir: PathBuf::new(),
            destination_folder: DEFAULT_DRIVE_FOLDER.to_string(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            retry_backoff_secs: DEFAULT_RETRY_BACKOFF_SECS,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            auto_start: false,
            token_backend: TokenBackend::File,
            log_dir: PathBuf::new(),
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Wait after a failed pass; never longer than the regular interval.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs.max(1)).min(self.interval())
    }

    pub fn upload_concurrency(&self) -> usize {
        self.upload_concurrency.max(1)
    }

    /// Fails unless `source_dir` is an existing, listable directory.
    pub async fn check_source_dir(&self) -> Result<&Path, ConfigError> {
        let dir = self.source_dir.as_path();
        if dir.as_os_str().is_empty() {
            return Err(ConfigError::SourceDirUnset);
        }
        let metadata = match tokio::fs::metadata(dir).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::SourceDirMissing(dir.to_path_buf()));
            }
            Err(source) => {
                return Err(ConfigError::SourceDirUnreadable {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        };
        if !metadata.is_dir() {
            return Err(ConfigError::SourceNotDirectory(dir.to_path_buf()));
        }
        tokio::fs::read_dir(dir)
            .await
            .map_err(|source| ConfigError::SourceDirUnreadable {
                path: dir.to_path_buf(),
                source,
            })?;
        Ok(dir)
    }

    /// The configured folder name, verbatim. Drive keeps surrounding
    /// whitespace, so it is reported rather than stripped.
    pub fn check_destination(&self) -> Result<&str, ConfigError> {
        let name = self.destination_folder.as_str();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyFolderName);
        }
        if trimmed.len() != name.len() {
            tracing::warn!(
                folder = ?name,
                "destination folder name has leading or trailing whitespace"
            );
        }
        Ok(name)
    }

    /// Where the log file goes, if anywhere.
    pub fn log_dir(&self) -> Option<PathBuf> {
        if !self.log_dir.as_os_str().is_empty() {
            return Some(self.log_dir.clone());
        }
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .map(|dir| dir.join(CONFIG_DIR).join(LOG_SUBDIR))
    }

    /// Applies `XMLSYNC_*` overrides; `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides<F>(&mut self, lookup: F, home: &Path)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("XMLSYNC_CREDENTIALS_FILE") {
            self.credentials_path = expand_with_home(&value, home);
        }
        if let Some(value) = lookup("XMLSYNC_SOURCE_DIR") {
            self.source_dir = expand_with_home(&value, home);
        }
        if let Some(value) = lookup("XMLSYNC_DRIVE_FOLDER").filter(|v| !v.trim().is_empty()) {
            self.destination_folder = value;
        }
        if let Some(value) = parse_positive(lookup("XMLSYNC_INTERVAL_SECS")) {
            self.interval_secs = value;
        }
        if let Some(value) = parse_positive(lookup("XMLSYNC_RETRY_BACKOFF_SECS")) {
            self.retry_backoff_secs = value;
        }
        if let Some(value) = parse_positive(lookup("XMLSYNC_UPLOAD_CONCURRENCY")) {
            self.upload_concurrency = value as usize;
        }
        if let Some(value) = lookup("XMLSYNC_AUTO_START") {
            self.auto_start = parse_bool(&value);
        }
        if let Some(value) = lookup("XMLSYNC_LOG_DIR") {
            self.log_dir = expand_with_home(&value, home);
        }
        self.credentials_path = expand_with_home(&self.credentials_path.to_string_lossy(), home);
        self.source_dir = expand_with_home(&self.source_dir.to_string_lossy(), home);
        self.log_dir = expand_with_home(&self.log_dir.to_string_lossy(), home);
    }

    fn normalize(mut self) -> Self {
        if self.interval_secs == 0 {
            self.interval_secs = DEFAULT_INTERVAL_SECS;
        }
        if self.retry_backoff_secs == 0 {
            self.retry_backoff_secs = DEFAULT_RETRY_BACKOFF_SECS;
        }
        if self.upload_concurrency == 0 {
            self.upload_concurrency = DEFAULT_UPLOAD_CONCURRENCY;
        }
        self
    }
}

/// JSON-backed configuration document.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn at_default_location() -> Result<Self, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::MissingConfigDir)?;
        Ok(Self::new(dir.join(CONFIG_DIR).join(CONFIG_FILENAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document; a missing file yields the defaults.
    pub fn load(&self) -> Result<SyncConfig, ConfigError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SyncConfig::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let config: SyncConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Ok(config.normalize())
    }

    /// File contents with `XMLSYNC_*` environment overrides on top.
    pub fn load_effective(&self) -> Result<SyncConfig, ConfigError> {
        let mut config = self.load()?;
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        config.apply_overrides(|name| std::env::var(name).ok(), &home);
        Ok(config)
    }

    pub fn save(&self, config: &SyncConfig) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, json).map_err(write_err)?;
        Ok(())
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn parse_positive(value: Option<String>) -> Option<u64> {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
