//! Logging setup.
//!
//! The daemon reads a small TOML file (the `logfile` configuration key)
//! describing where and how much to log:
//!
//! ```toml
//! level = "emud=info,emu_core=info"   # EnvFilter directive
//! file = "/var/log/emud.log"          # optional, stderr when absent
//! ansi = false
//! ```
//!
//! `RUST_LOG` takes precedence over `level`. A logging problem never stops the
//! daemon: it is reported on stderr and output falls back to stderr, still
//! filtered by `RUST_LOG` when set and by [`DEFAULT_FILTER`] otherwise.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Filter used when no logging configuration can be applied.
pub const DEFAULT_FILTER: &str = "emud=info,emu_core=info,emu_protocol=info";

/// Contents of the logging configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive string
    pub level: String,
    /// Append log output to this file instead of stderr
    pub file: Option<PathBuf>,
    /// Colored output (ignored for file output)
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_FILTER.to_string(),
            file: None,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Loads a logging configuration file.
    pub fn load(path: &Path) -> Result<Self, LoggingError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoggingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| LoggingError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Where log output ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
    /// The configuration could not be applied; stderr with `RUST_LOG` or the
    /// default filter.
    Fallback { reason: String },
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to read logging config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed logging config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid log filter {directive:?}: {source}")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("Failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

/// Parses an `EnvFilter` directive string.
pub fn parse_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directive).map_err(|source| LoggingError::Filter {
        directive: directive.to_string(),
        source,
    })
}

/// Installs the global subscriber described by the file at `path`.
///
/// Must be called at most once per process.
pub fn init(path: &Path) -> LogTarget {
    match LoggingConfig::load(path).and_then(|config| install(&config)) {
        Ok(target) => target,
        Err(e) => {
            eprintln!("emud: {e}; logging to stderr");
            let _ = tracing_subscriber::fmt()
                .with_env_filter(fallback_filter())
                .with_writer(io::stderr)
                .try_init();
            LogTarget::Fallback {
                reason: e.to_string(),
            }
        }
    }
}

/// `RUST_LOG` when it is set and valid, [`DEFAULT_FILTER`] otherwise.
pub fn fallback_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn install(config: &LoggingConfig) -> Result<LogTarget, LoggingError> {
    let directive =
        std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| config.level.clone());
    let filter = parse_filter(&directive)?;

    match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::LogFile {
                    path: path.clone(),
                    source,
                })?;

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
                .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))?;

            Ok(LogTarget::File(path.clone()))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .with_ansi(config.ansi)
                .try_init()
                .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))?;

            Ok(LogTarget::Stderr)
        }
    }
}
