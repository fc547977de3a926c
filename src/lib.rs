pub mod aggregate;
pub mod config;
pub mod db;
pub mod errors;
pub mod grid;
pub mod models;
pub mod service;
pub mod session;
pub mod store;
pub mod trend;

use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the JSON file logger under `<data_dir>/logs`, rolled daily.
///
/// `log_level` accepts any `EnvFilter` directive; an unparsable one falls
/// back to `info`.
pub fn init_tracing(config: &AppConfig) -> Result<(), String> {
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "metrics.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
