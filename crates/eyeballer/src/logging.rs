//! # Logging
//!
//! Structured logging through `tracing`. The library only emits events;
//! binaries call [`init_logging`] once to install a subscriber.

use crate::errors::{EyeballError, Result};
use std::fmt;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level emitted.
    pub level: LogLevel,

    /// Include the module path of each event.
    pub include_target: bool,

    /// Use ANSI colors.
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Debug level, with targets.
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            ..Default::default()
        }
    }

    /// Errors only.
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            ..Default::default()
        }
    }

    /// Replace the level.
    pub fn with_level(
        self,
        level: LogLevel,
    ) -> Self {
        Self { level, ..self }
    }
}

/// Log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Everything.
    Trace,
    /// Per-batch progress.
    Debug,
    /// Per-epoch progress and results.
    #[default]
    Info,
    /// Skipped images and degraded metrics.
    Warn,
    /// Fatal failures.
    Error,
}

impl LogLevel {
    /// The matching `tracing` level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = EyeballError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(EyeballError::InvalidConfig(format!(
                "unknown log level '{other}'"
            ))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        EyeballError::InvalidConfig(format!("failed to initialize logging: {e}"))
    })
}
