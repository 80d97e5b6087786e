//! Configuration resolution.
//!
//! The effective configuration is built from three layers, later layers
//! overriding earlier ones key by key:
//!
//! ```text
//! built-in defaults  <  [core-daemon] table of the config file  <  command-line flags
//! ```
//!
//! Values are kept as strings (the file and the command line are both
//! textual sources) together with the layer they came from. The resolver
//! validates every numeric and boolean key before returning, so a bad value
//! is reported before any listener is created.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use thiserror::Error;

/// Config file read when `--configfile` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/core/core.toml";

/// Table of the config file holding the daemon options.
pub const CONFIG_SECTION: &str = "core-daemon";

/// Default control port of the primary and datagram listeners.
pub const DEFAULT_PORT: u16 = 4038;

/// Default port of the control API listener.
pub const DEFAULT_GRPC_PORT: u16 = 50051;

/// Host used when no listen address is configured.
pub const DEFAULT_HOST: &str = "localhost";

/// Logging configuration read when `--logfile` is not given.
pub const DEFAULT_LOG_CONFIG: &str = "/etc/core/logging.toml";

// ============================================================================
// Command line
// ============================================================================

/// emud - emulation control daemon
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "emud", version, about)]
pub struct CliArgs {
    /// Configuration file to read
    #[arg(short = 'f', long = "configfile", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Control port of the stream and datagram listeners
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Number of request handling threads (informational)
    #[arg(short = 'n', long = "numthreads", value_name = "COUNT")]
    pub num_threads: Option<u32>,

    /// Use Open vSwitch bridges instead of Linux bridges
    #[arg(long)]
    pub ovs: bool,

    /// Port of the control API listener
    #[arg(long = "grpc-port", value_name = "PORT")]
    pub grpc_port: Option<u16>,

    /// Address of the control API listener
    #[arg(long = "grpc-address", value_name = "HOST")]
    pub grpc_address: Option<String>,

    /// Logging configuration file
    #[arg(short = 'l', long = "logfile", value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

impl CliArgs {
    /// Flags that were explicitly given, as (key, string value) pairs.
    pub fn overrides(&self) -> Vec<(ConfigKey, String)> {
        let mut overrides = Vec::new();

        if let Some(port) = self.port {
            overrides.push((ConfigKey::Port, port.to_string()));
        }
        if let Some(threads) = self.num_threads {
            overrides.push((ConfigKey::NumThreads, threads.to_string()));
        }
        if self.ovs {
            overrides.push((ConfigKey::Ovs, true.to_string()));
        }
        if let Some(port) = self.grpc_port {
            overrides.push((ConfigKey::GrpcPort, port.to_string()));
        }
        if let Some(address) = &self.grpc_address {
            overrides.push((ConfigKey::GrpcAddress, address.clone()));
        }
        if let Some(path) = &self.log_file {
            overrides.push((ConfigKey::LogFile, path.display().to_string()));
        }

        overrides
    }
}

// ============================================================================
// Keys and sources
// ============================================================================

/// The fixed set of configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigKey {
    Port,
    ListenAddr,
    NumThreads,
    GrpcPort,
    GrpcAddress,
    LogFile,
    Ovs,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        Self::Port,
        Self::ListenAddr,
        Self::NumThreads,
        Self::GrpcPort,
        Self::GrpcAddress,
        Self::LogFile,
        Self::Ovs,
    ];

    /// Name of the key in the config file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Port => "port",
            Self::ListenAddr => "listenaddr",
            Self::NumThreads => "numthreads",
            Self::GrpcPort => "grpcport",
            Self::GrpcAddress => "grpcaddress",
            Self::LogFile => "logfile",
            Self::Ovs => "ovs",
        }
    }

    /// Built-in default value.
    pub fn default_value(&self) -> String {
        match self {
            Self::Port => DEFAULT_PORT.to_string(),
            Self::ListenAddr => DEFAULT_HOST.to_string(),
            Self::NumThreads => "1".to_string(),
            Self::GrpcPort => DEFAULT_GRPC_PORT.to_string(),
            Self::GrpcAddress => DEFAULT_HOST.to_string(),
            Self::LogFile => DEFAULT_LOG_CONFIG.to_string(),
            Self::Ovs => false.to_string(),
        }
    }

    /// Looks up a key by its file name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Layer a value came from, in increasing precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigSource {
    Default,
    File,
    CommandLine,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::File => "file",
            Self::CommandLine => "command line",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while resolving configuration. All are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config file {path}: [{section}] must be a table of key/value pairs")]
    InvalidSection { path: PathBuf, section: String },

    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: ConfigKey, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.as_str().to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Effective configuration
// ============================================================================

/// Fully resolved key/value mapping.
///
/// Every key of [`ConfigKey::ALL`] is present.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    values: BTreeMap<ConfigKey, (String, ConfigSource)>,
    config_file: PathBuf,
    file_loaded: bool,
    ignored_keys: Vec<String>,
}

impl EffectiveConfig {
    /// Configuration made only of built-in defaults.
    pub fn defaults(config_file: impl Into<PathBuf>) -> Self {
        let values = ConfigKey::ALL
            .iter()
            .map(|key| (*key, (key.default_value(), ConfigSource::Default)))
            .collect();
        Self {
            values,
            config_file: config_file.into(),
            file_loaded: false,
            ignored_keys: Vec::new(),
        }
    }

    fn set(&mut self, key: ConfigKey, value: String, source: ConfigSource) {
        self.values.insert(key, (value, source));
    }

    /// Returns the config with one key replaced, as if given on the command line.
    pub fn with_override(mut self, key: ConfigKey, value: impl Into<String>) -> Self {
        self.set(key, value.into(), ConfigSource::CommandLine);
        self
    }

    /// Value of a key.
    pub fn get(&self, key: ConfigKey) -> &str {
        self.values
            .get(&key)
            .map(|(value, _)| value.as_str())
            .unwrap_or_default()
    }

    /// Layer the value of a key came from.
    pub fn source(&self, key: ConfigKey) -> ConfigSource {
        self.values
            .get(&key)
            .map(|(_, source)| *source)
            .unwrap_or(ConfigSource::Default)
    }

    /// Iterates over (key, value, source) in key order.
    pub fn iter(&self) -> impl Iterator<Item = (ConfigKey, &str, ConfigSource)> + '_ {
        self.values
            .iter()
            .map(|(key, (value, source))| (*key, value.as_str(), *source))
    }

    /// Config file consulted during resolution.
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Whether the config file existed and was read.
    pub fn file_loaded(&self) -> bool {
        self.file_loaded
    }

    /// Keys of the config section that are not recognised.
    pub fn ignored_keys(&self) -> &[String] {
        &self.ignored_keys
    }

    /// Checks that every numeric and boolean key parses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_number::<u16>(ConfigKey::Port, self.get(ConfigKey::Port))?;
        parse_number::<u16>(ConfigKey::GrpcPort, self.get(ConfigKey::GrpcPort))?;
        parse_bool(ConfigKey::Ovs, self.get(ConfigKey::Ovs))?;

        let threads = self.get(ConfigKey::NumThreads);
        if parse_number::<u32>(ConfigKey::NumThreads, threads)? == 0 {
            return Err(ConfigError::invalid(
                ConfigKey::NumThreads,
                threads,
                "must be at least 1",
            ));
        }
        Ok(())
    }

    // Typed accessors. `validate` has run by the time a resolved config is
    // handed out, so the fallbacks are never taken for resolver output.

    pub fn port(&self) -> u16 {
        parse_number(ConfigKey::Port, self.get(ConfigKey::Port)).unwrap_or(DEFAULT_PORT)
    }

    /// Raw listen host; may be empty (see `ListenAddress::primary`).
    pub fn listen_addr(&self) -> &str {
        self.get(ConfigKey::ListenAddr).trim()
    }

    pub fn num_threads(&self) -> u32 {
        parse_number(ConfigKey::NumThreads, self.get(ConfigKey::NumThreads)).unwrap_or(1)
    }

    pub fn grpc_port(&self) -> u16 {
        parse_number(ConfigKey::GrpcPort, self.get(ConfigKey::GrpcPort)).unwrap_or(DEFAULT_GRPC_PORT)
    }

    pub fn grpc_address(&self) -> &str {
        self.get(ConfigKey::GrpcAddress).trim()
    }

    pub fn log_file(&self) -> PathBuf {
        PathBuf::from(self.get(ConfigKey::LogFile))
    }

    pub fn ovs(&self) -> bool {
        parse_bool(ConfigKey::Ovs, self.get(ConfigKey::Ovs)).unwrap_or(false)
    }
}

fn parse_number<T: std::str::FromStr>(key: ConfigKey, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(key, value, e.to_string()))
}

fn parse_bool(key: ConfigKey, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected a boolean")),
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Merges defaults, the config file and command-line flags.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    default_file: PathBuf,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_FILE)
    }
}

impl ConfigResolver {
    /// Creates a resolver that reads `default_file` unless `--configfile` is given.
    pub fn new(default_file: impl Into<PathBuf>) -> Self {
        Self {
            default_file: default_file.into(),
        }
    }

    /// Resolves the effective configuration.
    ///
    /// A missing config file or a missing `[core-daemon]` table is not an
    /// error; the file then contributes nothing.
    pub fn resolve(&self, args: &CliArgs) -> Result<EffectiveConfig, ConfigError> {
        let path = args
            .config_file
            .clone()
            .unwrap_or_else(|| self.default_file.clone());

        let mut config = EffectiveConfig::defaults(&path);

        if let Some(section) = load_section(&path)? {
            config.file_loaded = true;
            for (name, value) in section {
                match ConfigKey::from_name(&name) {
                    Some(key) => config.set(key, value, ConfigSource::File),
                    None => config.ignored_keys.push(name),
                }
            }
        }

        for (key, value) in args.overrides() {
            config.set(key, value, ConfigSource::CommandLine);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Reads the `[core-daemon]` table of a config file.
///
/// Returns `None` if the file does not exist.
fn load_section(path: &Path) -> Result<Option<BTreeMap<String, String>>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let document: toml::Table = content.parse().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let table = match document.get(CONFIG_SECTION) {
        None => return Ok(Some(BTreeMap::new())),
        Some(toml::Value::Table(table)) => table,
        Some(_) => {
            return Err(ConfigError::InvalidSection {
                path: path.to_path_buf(),
                section: CONFIG_SECTION.to_string(),
            })
        }
    };

    let mut section = BTreeMap::new();
    for (name, value) in table {
        let value = match value {
            toml::Value::String(s) => s.clone(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            toml::Value::Datetime(d) => d.to_string(),
            toml::Value::Array(_) | toml::Value::Table(_) => {
                return Err(ConfigError::InvalidValue {
                    key: name.clone(),
                    value: value.to_string(),
                    reason: "expected a scalar value".to_string(),
                })
            }
        };
        section.insert(name.clone(), value);
    }

    Ok(Some(section))
}
