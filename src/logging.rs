use std::path::PathBuf;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{env_bool, non_empty_var};

const LOG_FILE_PREFIX: &str = "cognitive-engine.log";

/// Keeps the non-blocking file writer alive; drop it last.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub filter: String,
    pub file: Option<FileLogSettings>,
}

#[derive(Debug, Clone)]
pub struct FileLogSettings {
    pub dir: PathBuf,
    pub rotation: Rotation,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            file: None,
        }
    }
}

impl LogSettings {
    /// `RUST_LOG`, plus `ENABLE_FILE_LOGS`, `LOG_DIR` and `LOG_ROTATION` for the file sink.
    pub fn from_env() -> Self {
        let filter = non_empty_var("RUST_LOG").unwrap_or_else(|| "info".to_string());
        let file = env_bool("ENABLE_FILE_LOGS").unwrap_or(false).then(|| FileLogSettings {
            dir: non_empty_var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs")),
            rotation: non_empty_var("LOG_ROTATION")
                .and_then(|value| parse_rotation(&value))
                .unwrap_or(Rotation::DAILY),
        });
        Self { filter, file }
    }
}

pub fn parse_rotation(value: &str) -> Option<Rotation> {
    match value.trim().to_ascii_lowercase().as_str() {
        "minutely" => Some(Rotation::MINUTELY),
        "hourly" => Some(Rotation::HOURLY),
        "daily" => Some(Rotation::DAILY),
        "never" => Some(Rotation::NEVER),
        _ => None,
    }
}

fn file_writer(settings: &FileLogSettings) -> Option<(NonBlocking, WorkerGuard)> {
    if let Err(err) = std::fs::create_dir_all(&settings.dir) {
        eprintln!("failed to create log directory {}: {err}", settings.dir.display());
        return None;
    }
    let appender = RollingFileAppender::new(settings.rotation.clone(), &settings.dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}

/// Installs the global subscriber: stdout always, a rolling file when configured.
/// A bad filter falls back to `info`; an unusable log directory falls back to stdout only.
pub fn init_tracing(settings: &LogSettings) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let (writer, guard) = match settings.file.as_ref().and_then(file_writer) {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };
    let file_layer = writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();

    guard.map(|guard| FileLogGuard { _guard: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rotation_accepts_known_names() {
        assert_eq!(parse_rotation("hourly"), Some(Rotation::HOURLY));
        assert_eq!(parse_rotation(" Daily "), Some(Rotation::DAILY));
        assert_eq!(parse_rotation("never"), Some(Rotation::NEVER));
        assert_eq!(parse_rotation("weekly"), None);
    }

    #[test]
    fn test_default_settings_log_to_stdout_only() {
        let settings = LogSettings::default();
        assert_eq!(settings.filter, "info");
        assert!(settings.file.is_none());
    }

    #[test]
    fn test_unusable_log_dir_yields_no_writer() {
        let blocker = std::env::temp_dir().join(format!("cognitive-engine-log-{}", std::process::id()));
        std::fs::write(&blocker, b"not a directory").unwrap();
        let settings = FileLogSettings {
            dir: blocker.join("nested"),
            rotation: Rotation::NEVER,
        };
        assert!(file_writer(&settings).is_none());
        std::fs::remove_file(&blocker).unwrap();
    }
}
