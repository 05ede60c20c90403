//! Configuration parsing, defaults and validation.

use std::path::PathBuf;
use std::time::Duration;

use mph_session::config::LogFormat;
use mph_session::{AppError, SessionConfig};

#[test]
fn empty_document_yields_defaults() {
    let config = SessionConfig::from_toml_str("").expect("empty config is valid");

    assert_eq!(config, SessionConfig::default());
    assert_eq!(config.version, "5.3");
    assert_eq!(config.timeout(), Duration::from_secs(60));
    assert_eq!(config.poll_interval(), Duration::from_millis(1000));
    assert_eq!(config.grace_period(), Duration::from_millis(3000));
    assert_eq!(config.bridge.command, "comsol-bridge");
    assert!(!config.rebuild);
    assert!(!config.logging.debug);
    assert_eq!(config.logging.format, LogFormat::Text);
}

#[test]
fn full_document_is_parsed() {
    let raw = r#"
version = "6.1"
timeout_seconds = 120
rebuild = true

[polling]
interval_ms = 250
grace_ms = 500

[logging]
debug = true
format = "json"

[bridge]
command = "/opt/bridge/bin/bridge"
args = ["--quiet"]

[installs]
"6.1" = "/opt/comsol61/multiphysics"
"#;
    let config = SessionConfig::from_toml_str(raw).expect("valid config");

    assert_eq!(config.version, "6.1");
    assert_eq!(config.timeout(), Duration::from_secs(120));
    assert!(config.rebuild);
    assert_eq!(config.poll_interval(), Duration::from_millis(250));
    assert_eq!(config.grace_period(), Duration::from_millis(500));
    assert!(config.logging.debug);
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.bridge.args, ["--quiet"]);
    assert_eq!(
        config.installs.get("6.1"),
        Some(&PathBuf::from("/opt/comsol61/multiphysics"))
    );
}

#[test]
fn zero_timeout_is_rejected() {
    let err = SessionConfig::from_toml_str("timeout_seconds = 0").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("timeout_seconds")));
}

#[test]
fn zero_poll_interval_is_rejected() {
    let err = SessionConfig::from_toml_str("[polling]\ninterval_ms = 0").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("interval_ms")));
}

#[test]
fn blank_bridge_command_is_rejected() {
    let err = SessionConfig::from_toml_str("[bridge]\ncommand = \"  \"").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("bridge.command")));
}

#[test]
fn unknown_version_is_left_to_session_start() {
    let config = SessionConfig::from_toml_str("version = \"0.0\"").expect("not validated here");
    assert_eq!(config.version, "0.0");
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = SessionConfig::from_toml_str("version = [").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mph-session.toml");
    std::fs::write(&path, "version = \"5.4\"\n").unwrap();

    let config = SessionConfig::load_from_path(&path).unwrap();
    assert_eq!(config.version, "5.4");
}

#[test]
fn load_from_missing_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = SessionConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("failed to read config")));
}
