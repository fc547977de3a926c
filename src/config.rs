use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "WORK_METRICS_DATA_DIR";
pub const LOG_LEVEL_ENV: &str = "WORK_METRICS_LOG";
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Optional `config.yaml` inside the data directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
struct FileConfig {
    database_file: Option<String>,
    log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    pub log_level: String,
}

impl AppConfig {
    /// Resolves configuration from, in increasing precedence: built-in
    /// defaults, `config.yaml`, environment variables, explicit overrides.
    pub fn load(data_dir_override: Option<PathBuf>, log_level_override: Option<String>) -> AppResult<Self> {
        Self::resolve(data_dir_override, log_level_override, |key| std::env::var(key).ok())
    }

    pub fn resolve(
        data_dir_override: Option<PathBuf>,
        log_level_override: Option<String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> AppResult<Self> {
        let data_dir = data_dir_override
            .or_else(|| env(DATA_DIR_ENV).filter(|raw| !raw.trim().is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("data"));

        let file = read_file_config(&data_dir.join(CONFIG_FILE_NAME))?;

        let database_file = file
            .database_file
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "db.sqlite".to_string());
        let log_level = log_level_override
            .or_else(|| env(LOG_LEVEL_ENV))
            .or(file.log_level)
            .filter(|level| !level.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());

        Ok(Self {
            data_dir,
            database_file,
            log_level,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn read_file_config(path: &Path) -> AppResult<FileConfig> {
    if !path.is_file() {
        return Ok(FileConfig::default());
    }
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&raw)
        .map_err(|error| AppError::validation("config", format!("{}: {}", path.display(), error)))
}
