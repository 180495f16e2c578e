// Environment-sourced configuration

use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime settings, read from the process environment with sensible
/// defaults. Variable names map directly onto field names
/// (`DATA_DIR` → `data_dir`, `LOG_MAX_SIZE` → `log_max_size`, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base directory for runtime data; logs default to `<data_dir>/logs`.
    pub data_dir: String,
    /// Overrides the logs directory entirely when set.
    pub logs_dir: Option<String>,
    /// Max log file size in MB before rotation.
    pub log_max_size: u64,
    /// Number of rotated files to keep.
    pub log_max_backups: usize,
    /// Max age of rotated files in days.
    pub log_max_age: u64,
    /// Compress rotated files with gzip.
    pub log_compress: bool,
    /// `error` | `info` | `debug`; anything else falls back to `info`.
    pub log_level: String,
    /// Enables the live log broadcast hook.
    pub log_broadcast: bool,
    /// Path to the rclone binary.
    pub rclone_path: String,
    /// Base64-encoded 32-byte AES-256-GCM key for provider credentials.
    pub gomft_encryption_key: Option<String>,
    /// Grace period `stop()` waits for in-flight runs, in seconds.
    pub shutdown_grace_seconds: u64,
}

impl Settings {
    /// Load settings from the environment on top of the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("data_dir", "./data")?
            .set_default("log_max_size", 10)?
            .set_default("log_max_backups", 5)?
            .set_default("log_max_age", 30)?
            .set_default("log_compress", true)?
            .set_default("log_level", "info")?
            .set_default("log_broadcast", true)?
            .set_default("rclone_path", "rclone")?
            .set_default("shutdown_grace_seconds", 30)?
            .add_source(Environment::default().try_parsing(true));

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Effective logs directory: the override when present, `<data_dir>/logs`
    /// otherwise.
    pub fn logs_dir(&self) -> PathBuf {
        match &self.logs_dir {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => Path::new(&self.data_dir).join("logs"),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            logs_dir: None,
            log_max_size: 10,
            log_max_backups: 5,
            log_max_age: 30,
            log_compress: true,
            log_level: "info".to_string(),
            log_broadcast: true,
            rclone_path: "rclone".to_string(),
            gomft_encryption_key: None,
            shutdown_grace_seconds: 30,
        }
    }
}
