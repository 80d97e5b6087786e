//! Integration tests for configuration precedence.
//!
//! Defaults < `[core-daemon]` table of the config file < command-line flags,
//! applied independently for every key.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::io::Write;
use std::path::Path;

use clap::Parser;
use emud::config::{CliArgs, ConfigKey, ConfigResolver, ConfigSource, DEFAULT_CONFIG_FILE};
use emud::listener::ListenAddress;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

/// Writes `contents` to `core.toml` in a fresh temp dir.
fn config_dir(contents: &str) -> TempDir {
    let dir = tempfile::tempdir().expect("create temp dir");
    let mut file = std::fs::File::create(dir.path().join("core.toml")).expect("create config");
    file.write_all(contents.as_bytes()).expect("write config");
    dir
}

fn parse_args(config: &Path, extra: &[&str]) -> CliArgs {
    let path = config.display().to_string();
    let mut argv = vec!["emud", "-f", path.as_str()];
    argv.extend_from_slice(extra);
    CliArgs::try_parse_from(argv).expect("parse args")
}

// ============================================================================
// Precedence
// ============================================================================

#[test]
fn test_file_port_and_cli_grpc_port_combine() {
    let dir = config_dir("[core-daemon]\nport = 9000\n");
    let args = parse_args(&dir.path().join("core.toml"), &["--grpc-port", "6000"]);

    let config = ConfigResolver::default().resolve(&args).unwrap();

    assert_eq!(config.port(), 9000);
    assert_eq!(config.source(ConfigKey::Port), ConfigSource::File);
    assert_eq!(config.grpc_port(), 6000);
    assert_eq!(config.source(ConfigKey::GrpcPort), ConfigSource::CommandLine);
    assert_eq!(config.listen_addr(), "localhost");
    assert_eq!(config.source(ConfigKey::ListenAddr), ConfigSource::Default);
}

#[test]
fn test_every_key_takes_highest_source() {
    let dir = config_dir(
        "[core-daemon]\n\
         port = 4100\n\
         listenaddr = \"10.0.0.1\"\n\
         numthreads = 2\n\
         grpcport = 50100\n\
         grpcaddress = \"10.0.0.2\"\n\
         logfile = \"/srv/emud/logging.toml\"\n\
         ovs = false\n",
    );
    let args = parse_args(
        &dir.path().join("core.toml"),
        &["-p", "4200", "-n", "8", "--ovs", "-l", "/tmp/logging.toml"],
    );

    let config = ConfigResolver::default().resolve(&args).unwrap();

    assert_eq!(config.port(), 4200);
    assert_eq!(config.num_threads(), 8);
    assert!(config.ovs());
    assert_eq!(config.log_file(), Path::new("/tmp/logging.toml"));

    assert_eq!(config.listen_addr(), "10.0.0.1");
    assert_eq!(config.grpc_port(), 50100);
    assert_eq!(config.grpc_address(), "10.0.0.2");
    for key in [ConfigKey::ListenAddr, ConfigKey::GrpcPort, ConfigKey::GrpcAddress] {
        assert_eq!(config.source(key), ConfigSource::File, "{key}");
    }
}

#[test]
fn test_absent_ovs_flag_keeps_file_value() {
    let dir = config_dir("[core-daemon]\novs = true\n");
    let args = parse_args(&dir.path().join("core.toml"), &[]);

    let config = ConfigResolver::default().resolve(&args).unwrap();
    assert!(config.ovs());
    assert_eq!(config.source(ConfigKey::Ovs), ConfigSource::File);
}

#[test]
fn test_missing_config_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let args = parse_args(&dir.path().join("missing.toml"), &["--port", "4500"]);

    let config = ConfigResolver::default().resolve(&args).unwrap();
    assert!(!config.file_loaded());
    assert_eq!(config.port(), 4500);
    assert_eq!(config.grpc_port(), 50051);
    assert_eq!(config.num_threads(), 1);
    assert!(!config.ovs());
    assert_eq!(config.grpc_address(), "localhost");
}

#[test]
fn test_default_path_used_without_flag() {
    let resolver = ConfigResolver::default();
    let config = resolver.resolve(&CliArgs::default());

    // The host may or may not have a system config; either way the default
    // path is the one consulted.
    if let Ok(config) = config {
        assert_eq!(config.config_file(), Path::new(DEFAULT_CONFIG_FILE));
    }

    let dir = config_dir("[core-daemon]\nport = 4600\n");
    let config = ConfigResolver::new(dir.path().join("core.toml"))
        .resolve(&CliArgs::default())
        .unwrap();
    assert_eq!(config.port(), 4600);
}

// ============================================================================
// Listen address consumption
// ============================================================================

#[test]
fn test_empty_listen_addr_binds_localhost() {
    let dir = config_dir("[core-daemon]\nlistenaddr = \"\"\nport = 9000\n");
    let args = parse_args(&dir.path().join("core.toml"), &[]);

    let config = ConfigResolver::default().resolve(&args).unwrap();
    assert_eq!(config.listen_addr(), "");
    assert_eq!(
        ListenAddress::primary(&config),
        ListenAddress::new("localhost", 9000)
    );
}

#[test]
fn test_control_api_address_is_independent() {
    let dir = config_dir("[core-daemon]\nlistenaddr = \"0.0.0.0\"\n");
    let args = parse_args(
        &dir.path().join("core.toml"),
        &["--grpc-address", "127.0.0.1", "--grpc-port", "6001"],
    );

    let config = ConfigResolver::default().resolve(&args).unwrap();
    assert_eq!(
        ListenAddress::primary(&config),
        ListenAddress::new("0.0.0.0", 4038)
    );
    assert_eq!(
        ListenAddress::control_api(&config),
        ListenAddress::new("127.0.0.1", 6001)
    );
}

// ============================================================================
// Fatal errors
// ============================================================================

#[test]
fn test_malformed_file_is_fatal() {
    let dir = config_dir("[core-daemon]\nport = = 1\n");
    let args = parse_args(&dir.path().join("core.toml"), &[]);
    assert!(ConfigResolver::default().resolve(&args).is_err());
}

#[test]
fn test_invalid_port_in_file_is_fatal() {
    let dir = config_dir("[core-daemon]\nport = 70000\n");
    let args = parse_args(&dir.path().join("core.toml"), &[]);

    let err = ConfigResolver::default().resolve(&args).unwrap_err();
    assert!(err.to_string().contains("port"));
}

#[test]
fn test_unreadable_config_path_is_fatal() {
    // A directory exists but cannot be read as a file.
    let dir = tempfile::tempdir().unwrap();
    let args = parse_args(dir.path(), &[]);
    assert!(ConfigResolver::default().resolve(&args).is_err());
}

// ============================================================================
// Shipped samples
// ============================================================================

#[test]
fn test_sample_configs_load() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config");

    let args = parse_args(&root.join("core.toml"), &[]);
    let config = ConfigResolver::default().resolve(&args).unwrap();
    assert!(config.file_loaded());
    assert!(config.ignored_keys().is_empty());
    assert_eq!(config.port(), 4038);

    let logging = emud::logging::LoggingConfig::load(&root.join("logging.toml")).unwrap();
    assert!(logging.file.is_none());
    assert!(emud::logging::parse_filter(&logging.level).is_ok());
}
