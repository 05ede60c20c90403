//! Install root lookup and derived names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mph_session::registry::{
    frontend_executable, progid, root_env_var, InstallRegistry, TableRegistry,
    MODEL_UTIL_OBJECT, SERVER_UTIL_OBJECT,
};
use mph_session::{AppError, SessionConfig};
use serial_test::serial;

#[test]
fn configured_root_is_returned() {
    let registry = TableRegistry::new(HashMap::from([(
        "5.3".to_owned(),
        PathBuf::from("/opt/comsol53"),
    )]));

    assert_eq!(registry.root_dir("5.3").unwrap(), Path::new("/opt/comsol53"));
}

#[test]
fn registry_from_config_uses_installs_table() {
    let mut config = SessionConfig::default();
    config
        .installs
        .insert("5.4".into(), PathBuf::from("/opt/comsol54"));

    let registry = TableRegistry::from_config(&config);
    assert_eq!(registry.root_dir("5.4").unwrap(), Path::new("/opt/comsol54"));
}

#[test]
#[serial]
fn environment_variable_is_the_fallback() {
    let var = root_env_var("9.8");
    assert_eq!(var, "COMSOL98_ROOT");
    std::env::set_var(&var, "/srv/comsol98");

    let found = TableRegistry::default().root_dir("9.8");
    std::env::remove_var(&var);

    assert_eq!(found.unwrap(), Path::new("/srv/comsol98"));
}

#[test]
#[serial]
fn unknown_version_is_a_version_error() {
    std::env::remove_var(root_env_var("9.7"));
    let err = TableRegistry::default().root_dir("9.7").unwrap_err();
    assert!(matches!(err, AppError::Version(ref msg) if msg.contains("9.7")));
}

#[test]
fn empty_version_is_a_version_error() {
    let err = TableRegistry::default().root_dir("").unwrap_err();
    assert!(matches!(err, AppError::Version(_)));
}

#[test]
fn progids_follow_vendor_naming() {
    assert_eq!(progid(SERVER_UTIL_OBJECT, "5.3"), "comsolcom.comsolutil.53");
    assert_eq!(progid(MODEL_UTIL_OBJECT, "5.3"), "comsolcom.modelutil.53");
}

#[cfg(unix)]
#[test]
fn frontend_executable_lives_under_bin() {
    assert_eq!(
        frontend_executable(Path::new("/opt/comsol53")),
        Path::new("/opt/comsol53/bin/comsol")
    );
}

#[cfg(windows)]
#[test]
fn frontend_executable_lives_under_bin() {
    assert_eq!(
        frontend_executable(Path::new(r"C:\COMSOL53")),
        Path::new(r"C:\COMSOL53\bin\win64\comsol.exe")
    );
}
