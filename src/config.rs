//! Host configuration.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};

const APP_DIR_NAME: &str = "fastrack";
const DATABASE_FILE: &str = "fastrack.sqlite3";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    /// Period of the foreground timer tick.
    pub tick_interval: Duration,
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            tick_interval: Duration::from_secs(1),
            debug: false,
        }
    }
}

impl AppConfig {
    /// Uses `data_dir` when given, else the platform data directory.
    pub fn new(data_dir: Option<PathBuf>, debug: bool) -> Self {
        Self {
            data_dir: data_dir.unwrap_or_else(default_data_dir),
            debug,
            ..Self::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    pub fn ensure_data_dir(&self) -> Result<&Path> {
        fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("failed to create data directory {}", self.data_dir.display())
        })?;
        Ok(&self.data_dir)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }
}

/// `<local data dir>/fastrack`, or `./fastrack` when the platform has none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}
