//! Logging initialisation without a logging config file.
//!
//! Installs the global subscriber, so it lives in its own test binary.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use emud::logging::{self, LogTarget};
use tracing::Level;

#[test]
fn test_missing_logging_config_still_honours_rust_log() {
    std::env::set_var("RUST_LOG", "emud=debug");
    let dir = tempfile::tempdir().unwrap();

    let target = logging::init(&dir.path().join("logging.toml"));

    assert!(matches!(target, LogTarget::Fallback { .. }));
    assert!(tracing::enabled!(target: "emud", Level::DEBUG));
    assert!(!tracing::enabled!(target: "emud", Level::TRACE));
}
