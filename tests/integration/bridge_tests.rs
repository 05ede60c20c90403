//! Bridge channel against a shell helper speaking the NDJSON protocol.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use mph_session::config::BridgeConfig;
use mph_session::registry::TableRegistry;
use mph_session::rpc::bridge::BridgeFactory;
use mph_session::rpc::facade::{ModelUtil, Remote};
use mph_session::rpc::ChannelFactory;
use mph_session::AppError;
use tempfile::TempDir;

const HELPER: &str = r#"#!/bin/sh
echo "bridge helper 1.0 ready"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed 's/.*"id":\([0-9][0-9]*\).*/\1/')
  case "$line" in
    *'"dispatch"'*'comsolcom.modelutil.53'*) printf '{"id":%s,"result":null}\n' "$id" ;;
    *'"dispatch"'*) printf '{"id":%s,"error":{"message":"Invalid class string."}}\n' "$id" ;;
    *'"method":"tags"'*) printf '{"id":%s,"result":["Model1","Model2"]}\n' "$id" ;;
    *) printf '{"id":%s,"error":{"message":"Unknown method.","detail":"no such call."}}\n' "$id" ;;
  esac
done
"#;

fn helper(dir: &TempDir) -> BridgeConfig {
    let path = dir.path().join("bridge.sh");
    fs::write(&path, HELPER).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    BridgeConfig {
        command: path.to_string_lossy().into_owned(),
        args: Vec::new(),
    }
}

fn registry(dir: &TempDir) -> Arc<TableRegistry> {
    let root: PathBuf = dir.path().to_path_buf();
    Arc::new(TableRegistry::new(HashMap::from([
        ("5.3".to_owned(), root.clone()),
        ("6.0".to_owned(), root),
    ])))
}

#[tokio::test]
async fn resolved_channel_answers_calls() {
    let dir = tempfile::tempdir().unwrap();
    let factory = BridgeFactory::new(helper(&dir), registry(&dir));

    let channel = factory.resolve("5.3", false).await.expect("5.3 is registered");
    let mu = ModelUtil::new(Remote::new(channel, true));

    assert_eq!(mu.tags().await.unwrap(), ["Model1", "Model2"]);

    let err = mu.disconnect().await.expect_err("helper rejects disconnect");
    assert_eq!(err, AppError::Api("Unknown method: no such call".into()));
}

#[tokio::test]
async fn unregistered_interface_is_a_version_error() {
    let dir = tempfile::tempdir().unwrap();
    let factory = BridgeFactory::new(helper(&dir), registry(&dir));

    let err = factory
        .resolve("6.0", false)
        .await
        .expect_err("6.0 has no registered interface");

    match err {
        AppError::Version(msg) => assert!(msg.contains("Invalid class string"), "got {msg}"),
        other => panic!("expected version error, got {other:?}"),
    }
}

#[tokio::test]
async fn uninstalled_version_fails_before_spawning_helper() {
    let dir = tempfile::tempdir().unwrap();
    let config = BridgeConfig {
        command: dir.path().join("missing-helper").to_string_lossy().into_owned(),
        args: Vec::new(),
    };
    let factory = BridgeFactory::new(config, registry(&dir));

    let err = factory
        .resolve("4.2", false)
        .await
        .expect_err("4.2 is not installed");

    assert!(matches!(err, AppError::Version(_)), "got {err:?}");
}
