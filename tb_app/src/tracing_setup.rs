use std::io;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::config_loader::ThrottleConfigFile;

pub const DEFAULT_LOG_DIR: &str = "./logs";

/// Logging settings resolved from a [`ThrottleConfigFile`]
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub dir: String,
    pub level: Level,
    pub stdout: bool,
    pub rotation: Rotation,
}

impl LogSettings {
    pub fn from_config(config: &ThrottleConfigFile) -> Self {
        Self {
            dir: config.log_dir.clone().unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()),
            level: parse_level(config.log_level.as_deref(), Level::INFO),
            stdout: config.log_stdout.unwrap_or(true),
            rotation: parse_rotation(config.log_rotation.as_deref()),
        }
    }
}

/// Install a global subscriber writing to a rolling file, and to stdout when enabled
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init(app_name: &str, settings: &LogSettings) -> WorkerGuard {
    let _ = std::fs::create_dir_all(&settings.dir);

    let file_appender = RollingFileAppender::new(settings.rotation.clone(), &settings.dir, format!("{app_name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::builder().with_default_directive(settings.level.into()).from_env_lossy();

    let file_layer = fmt::layer().with_writer(non_blocking).with_target(true).with_line_number(true).with_ansi(false).compact();

    // Verdicts are printed to stdout by the caller, so the console copy stays terse
    let stdout_layer = settings.stdout.then(|| fmt::layer().with_writer(io::stdout).with_target(false).without_time().compact());

    tracing_subscriber::registry().with(env_filter).with(file_layer).with(stdout_layer).init();

    guard
}

/// Parse a level name from config, falling back to `default` on anything unrecognised
pub fn parse_level(name: Option<&str>, default: Level) -> Level {
    name.and_then(|n| n.parse().ok()).unwrap_or(default)
}

/// Parse a rotation name from config, defaulting to hourly files
pub fn parse_rotation(name: Option<&str>) -> Rotation {
    match name.map(str::to_ascii_lowercase).as_deref() {
        Some("minutely") => Rotation::MINUTELY,
        Some("daily") => Rotation::DAILY,
        Some("never") => Rotation::NEVER,
        _ => Rotation::HOURLY,
    }
}
