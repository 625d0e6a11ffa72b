//! Subscriber setup for the `tracing` events emitted by spcore and sptrack.

use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::error::TrackResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// one line per event
    #[default]
    Compact,
    /// multi-line, human readable
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// write to this file instead of stderr
    pub file: Option<PathBuf>,
    /// directive string such as "spcore=debug,sptrack=info", wins over `level`
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig { level: LogLevel::Info, format: LogFormat::Compact, file: None, filter: None }
    }
}

impl LogConfig {
    /// raise the level to debug when `verbose` is set, keeping format, file and filter
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        if verbose {
            self.level = LogLevel::Debug;
        }
        self
    }

    fn env_filter(&self) -> EnvFilter {
        // RUST_LOG overrides the configured level
        EnvFilter::try_from_default_env().unwrap_or_else(|_| match &self.filter {
            Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(self.level.to_string())),
            None => EnvFilter::new(self.level.to_string()),
        })
    }
}

/// install the global subscriber
///
/// A subscriber that is already installed stays in place, so calling this
/// twice is harmless.
///
/// Arguments:
///
/// * `config` - level, format and destination
///
/// Returns:
///
/// * `TrackResult<()>` - an io error when the log file cannot be created
pub fn init_logging(config: &LogConfig) -> TrackResult<()> {
    let writer = match &config.file {
        Some(path) => BoxMakeWriter::new(Mutex::new(File::create(path)?)),
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let ansi = config.file.is_none();

    let result = match config.format {
        LogFormat::Compact => {
            let layer = tracing_subscriber::fmt::layer().compact().with_ansi(ansi).with_writer(writer);
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(config.env_filter()).with(layer))
        }
        LogFormat::Pretty => {
            let layer = tracing_subscriber::fmt::layer().pretty().with_ansi(ansi).with_writer(writer);
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(config.env_filter()).with(layer))
        }
    };
    if result.is_err() {
        tracing::debug!("global subscriber already installed");
    }
    Ok(())
}
