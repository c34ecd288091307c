use anyhow::Context;
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Logging setup for a daqrt process.
///
/// Environment variables: `DAQRT_LOG_LEVEL`, `DAQRT_LOG_DIR`,
/// `DAQRT_LOG_PREFIX`, `DAQRT_LOG_ROLLING` (`daily`/`hourly`/`minutely`).
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct LogConfig {
    pub level: String,
    pub file_dir: Option<String>,
    pub file_prefix: Option<String>,
    pub rolling: Option<String>,
    #[serde(default)]
    pub max_files: usize,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self {
            level: std::env::var("DAQRT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            file_dir: std::env::var("DAQRT_LOG_DIR").ok(),
            file_prefix: std::env::var("DAQRT_LOG_PREFIX").ok(),
            rolling: std::env::var("DAQRT_LOG_ROLLING").ok(),
            max_files: 2,
        }
    }

    fn rotation(&self) -> Rotation {
        match self.rolling.as_deref() {
            Some("hourly") => Rotation::HOURLY,
            Some("minutely") => Rotation::MINUTELY,
            _ => Rotation::DAILY,
        }
    }

    /// Install the global tracing subscriber. Keep the returned guard alive
    /// for the lifetime of the process when logging to files.
    pub fn init(&self) -> anyhow::Result<Option<WorkerGuard>> {
        let level = Level::from_str(&self.level).unwrap_or(Level::INFO);

        let Some(dir) = self.file_dir.as_deref() else {
            let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
            return Ok(None);
        };

        let appender: RollingFileAppender = RollingFileAppender::builder()
            .rotation(self.rotation())
            .max_log_files(self.max_files.max(1))
            .filename_prefix(self.file_prefix.as_deref().unwrap_or(""))
            .build(dir)
            .with_context(|| format!("failed to create rolling appender in {dir}"))?;

        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(writer)
            .try_init();

        tracing::info!(dir, rotation = ?self.rolling, "logging to rolling files");
        Ok(Some(guard))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
            file_prefix: None,
            rolling: Some("daily".to_string()),
            max_files: 2,
        }
    }
}
